//! 设备登记与跨设备授权流程
//!
//! 登记负责把设备投影写进存储；授权请求需要双方设备各自
//! 出示当前有效的访问令牌，并通过应用密钥的 HMAC 签名校验。

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::auth::TokenManager;
use crate::device::{
    AuthorizationGrant, DeviceAuthorizationGraph, DeviceDirectory, DeviceInfo, GrantStatus,
};
use crate::error::{GatewayError, Result};
use crate::security;

/// 跨设备授权请求
///
/// 由授权方与被授权方共同签署：两个令牌证明双方身份，
/// sign 是应用后台对全部业务字段的 HMAC 签名
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeDeviceRequest {
    pub authorizing_device_key: String,
    pub authorizing_device_token: String,
    pub authorized_device_key: String,
    pub authorized_device_token: String,
    pub start_time: u64,
    pub end_time: u64,
    /// 1 生效 / 0 失效
    pub status: u8,
    pub app_key: String,
    pub sign: String,
}

impl AuthorizeDeviceRequest {
    /// 参与签名的字段（sign 本身除外）
    fn signed_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("authorizing_device_key", self.authorizing_device_key.clone()),
            ("authorizing_device_token", self.authorizing_device_token.clone()),
            ("authorized_device_key", self.authorized_device_key.clone()),
            ("authorized_device_token", self.authorized_device_token.clone()),
            ("start_time", self.start_time.to_string()),
            ("end_time", self.end_time.to_string()),
            ("status", self.status.to_string()),
            ("app_key", self.app_key.clone()),
        ]
    }

    /// 用应用密钥计算本请求的签名（供接入方拼装请求）
    pub fn compute_sign(&self, app_secret: &str) -> String {
        security::sign_fields(&self.signed_fields(), app_secret)
    }
}

pub struct DeviceService {
    directory: Arc<DeviceDirectory>,
    authorization: Arc<DeviceAuthorizationGraph>,
    token_manager: Arc<TokenManager>,
    /// 应用签名密钥
    app_secret: String,
}

impl DeviceService {
    pub fn new(
        directory: Arc<DeviceDirectory>,
        authorization: Arc<DeviceAuthorizationGraph>,
        token_manager: Arc<TokenManager>,
        app_secret: String,
    ) -> Self {
        Self {
            directory,
            authorization,
            token_manager,
            app_secret,
        }
    }

    /// 登记设备并写入网关侧投影
    pub async fn register_device(
        &self,
        device_key: &str,
        mac: &str,
        product_key: &str,
        product_version: &str,
        name: Option<String>,
    ) -> Result<DeviceInfo> {
        if device_key.trim().is_empty() {
            return Err(GatewayError::Validation("device_key 为必填项".to_string()));
        }
        if product_key.trim().is_empty() {
            return Err(GatewayError::Validation("product_key 为必填项".to_string()));
        }
        if !is_valid_mac(mac) {
            return Err(GatewayError::Validation(format!("MAC 地址格式无效: {}", mac)));
        }

        let device = DeviceInfo {
            device_key: device_key.to_string(),
            mac: mac.to_string(),
            product_key: product_key.to_string(),
            product_version: product_version.to_string(),
            name,
        };
        self.directory.save(&device).await?;

        info!("📟 设备登记: device={}, product={}", device_key, product_key);
        Ok(device)
    }

    /// 处理跨设备授权请求
    pub async fn authorize_device(
        &self,
        request: &AuthorizeDeviceRequest,
    ) -> Result<AuthorizationGrant> {
        if request.authorizing_device_key.trim().is_empty()
            || request.authorized_device_key.trim().is_empty()
        {
            return Err(GatewayError::Validation(
                "授权双方的 device_key 为必填项".to_string(),
            ));
        }

        let status = match request.status {
            1 => GrantStatus::Active,
            0 => GrantStatus::Inactive,
            other => {
                return Err(GatewayError::Validation(format!(
                    "授权状态无效: {}",
                    other
                )));
            }
        };

        if !security::verify_signature(&request.signed_fields(), &self.app_secret, &request.sign) {
            return Err(GatewayError::SignatureInvalid(
                "签名校验失败".to_string(),
            ));
        }

        // 两个令牌都必须有效，且归属各自声称的设备
        self.require_owned_token(&request.authorizing_device_token, &request.authorizing_device_key)
            .await?;
        self.require_owned_token(&request.authorized_device_token, &request.authorized_device_key)
            .await?;

        Ok(self.authorization.grant(
            &request.authorizing_device_key,
            &request.authorized_device_key,
            request.start_time,
            request.end_time,
            status,
        ))
    }

    /// 解除授权
    pub fn unauthorize_device(
        &self,
        authorizing_device_key: &str,
        authorized_device_key: &str,
    ) -> Result<()> {
        self.authorization
            .revoke_grant(authorizing_device_key, authorized_device_key)
    }

    /// 设备的「谁授权了我」列表
    pub fn authorized_list(&self, device_key: &str) -> Vec<AuthorizationGrant> {
        self.authorization.list_authorized_for(device_key)
    }

    /// 设备的「我授权了谁」列表
    pub fn authorizing_list(&self, device_key: &str) -> Vec<AuthorizationGrant> {
        self.authorization.list_authorizing_by(device_key)
    }

    async fn require_owned_token(&self, token: &str, device_key: &str) -> Result<()> {
        match self.token_manager.validate(token).await? {
            Some(info) if info.device_key == device_key => Ok(()),
            _ => Err(GatewayError::TokenInvalid),
        }
    }
}

/// 校验 MAC 地址格式（六组两位十六进制，: 或 - 分隔）
fn is_valid_mac(mac: &str) -> bool {
    let bytes = mac.as_bytes();
    if bytes.len() != 17 {
        return false;
    }

    let sep = bytes[2];
    if sep != b':' && sep != b'-' {
        return false;
    }

    for (i, b) in bytes.iter().enumerate() {
        if i % 3 == 2 {
            if *b != sep {
                return false;
            }
        } else if !b.is_ascii_hexdigit() {
            return false;
        }
    }
    true
}
