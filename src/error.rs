use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 网关错误类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GatewayError {
    /// 内部错误
    Internal(String),
    /// 参数校验失败
    Validation(String),
    /// 签名校验失败
    SignatureInvalid(String),
    /// 鉴权失败，禁止操作
    Unauthorized(String),
    /// 令牌无效
    TokenInvalid,
    /// 刷新令牌无效
    RefreshTokenInvalid,
    /// 令牌刷新失败
    TokenRefreshFailed,
    /// 操作过于频繁
    RateLimited(String),
    /// 设备不存在或被禁用
    DeviceNotFound(String),
    /// 资源未找到
    NotFound(String),
    /// 超时
    Timeout(String),
    /// 协议错误（设备上报无法解析）
    Protocol(String),
    /// 会话数达到上限
    CapacityExceeded(String),
    /// 存储错误
    Store(String),
    /// 序列化错误
    Serialization(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Internal(msg) => write!(f, "Internal error: {}", msg),
            GatewayError::Validation(msg) => write!(f, "Validation failed: {}", msg),
            GatewayError::SignatureInvalid(msg) => write!(f, "Signature invalid: {}", msg),
            GatewayError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            GatewayError::TokenInvalid => write!(f, "Invalid token"),
            GatewayError::RefreshTokenInvalid => write!(f, "Invalid refresh token"),
            GatewayError::TokenRefreshFailed => write!(f, "Token refresh failed"),
            GatewayError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            GatewayError::DeviceNotFound(key) => write!(f, "Device not found: {}", key),
            GatewayError::NotFound(msg) => write!(f, "Not found: {}", msg),
            GatewayError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            GatewayError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            GatewayError::CapacityExceeded(msg) => write!(f, "Capacity exceeded: {}", msg),
            GatewayError::Store(msg) => write!(f, "Store error: {}", msg),
            GatewayError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl StdError for GatewayError {}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for GatewayError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        GatewayError::Timeout(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, GatewayError>;

/// 错误代码
///
/// 返回给接入方的业务错误码，与网关错误一一对应
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 成功
    Success = 200,
    /// 内部错误
    Internal = 500,
    /// 参数校验失败
    Validation = 250005,
    /// 操作过于频繁
    RateLimited = 250006,
    /// 令牌无效
    TokenInvalid = 250007,
    /// 令牌刷新失败
    TokenRefreshFailed = 250010,
    /// 刷新令牌无效
    RefreshTokenInvalid = 250011,
    /// 设备不存在或被禁用
    DeviceNotFound = 250012,
    /// 签名校验失败
    SignatureInvalid = 250019,
    /// 鉴权失败，禁止操作
    Unauthorized = 250020,
    /// 资源未找到
    NotFound = 250023,
    /// 超时
    Timeout = 250024,
    /// 协议错误
    Protocol = 250025,
    /// 会话数达到上限
    CapacityExceeded = 250026,
    /// 存储错误
    Store = 250027,
    /// 序列化错误
    Serialization = 250028,
}

impl From<&GatewayError> for ErrorCode {
    fn from(error: &GatewayError) -> Self {
        match error {
            GatewayError::Internal(_) => ErrorCode::Internal,
            GatewayError::Validation(_) => ErrorCode::Validation,
            GatewayError::SignatureInvalid(_) => ErrorCode::SignatureInvalid,
            GatewayError::Unauthorized(_) => ErrorCode::Unauthorized,
            GatewayError::TokenInvalid => ErrorCode::TokenInvalid,
            GatewayError::RefreshTokenInvalid => ErrorCode::RefreshTokenInvalid,
            GatewayError::TokenRefreshFailed => ErrorCode::TokenRefreshFailed,
            GatewayError::RateLimited(_) => ErrorCode::RateLimited,
            GatewayError::DeviceNotFound(_) => ErrorCode::DeviceNotFound,
            GatewayError::NotFound(_) => ErrorCode::NotFound,
            GatewayError::Timeout(_) => ErrorCode::Timeout,
            GatewayError::Protocol(_) => ErrorCode::Protocol,
            GatewayError::CapacityExceeded(_) => ErrorCode::CapacityExceeded,
            GatewayError::Store(_) => ErrorCode::Store,
            GatewayError::Serialization(_) => ErrorCode::Serialization,
        }
    }
}

/// 错误响应
///
/// 由传输层负责封帧，网关内部只组装结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: ErrorCode,
    /// 错误消息
    pub message: String,
    /// 时间戳
    pub timestamp: u64,
}

impl ErrorResponse {
    /// 创建错误响应
    pub fn new(error: &GatewayError) -> Self {
        Self {
            code: ErrorCode::from(error),
            message: error.to_string(),
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}
