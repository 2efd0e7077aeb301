//! 令牌申请流程
//!
//! 包装令牌生命周期管理器的对外三步：申请访问令牌、
//! 换发刷新令牌、用刷新令牌刷新访问令牌。每一步都先做
//! 入参校验、设备存在性校验，申请入口还带 20 分钟频控。

use std::sync::Arc;

use tracing::info;

use crate::auth::{TokenInfo, TokenManager};
use crate::device::DeviceDirectory;
use crate::error::{GatewayError, Result};
use crate::gateway::ActionRateLimiter;

pub struct TokenService {
    token_manager: Arc<TokenManager>,
    directory: Arc<DeviceDirectory>,
    rate_limiter: ActionRateLimiter,
    /// 访问令牌有效期（秒）
    access_ttl_secs: u64,
    /// 刷新令牌有效期（秒）
    refresh_ttl_secs: u64,
}

impl TokenService {
    pub fn new(
        token_manager: Arc<TokenManager>,
        directory: Arc<DeviceDirectory>,
        rate_limiter: ActionRateLimiter,
        access_ttl_secs: u64,
        refresh_ttl_secs: u64,
    ) -> Self {
        Self {
            token_manager,
            directory,
            rate_limiter,
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    fn require_key(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(GatewayError::Validation(format!("{} 为必填项", field)));
        }
        Ok(())
    }

    async fn require_device(&self, device_key: &str) -> Result<()> {
        if self.directory.find(device_key).await?.is_none() {
            return Err(GatewayError::DeviceNotFound(device_key.to_string()));
        }
        Ok(())
    }

    /// 申请访问令牌
    ///
    /// 吊销设备的全部存活令牌后签发新的访问令牌，保证设备
    /// 任何时刻最多持有一个有效的访问令牌
    pub async fn request_access_token(&self, device_key: &str) -> Result<TokenInfo> {
        Self::require_key(device_key, "device_key")?;

        if !self.rate_limiter.allow_token_request(device_key).await? {
            return Err(GatewayError::RateLimited(
                "操作过于频繁，请稍后再试".to_string(),
            ));
        }

        self.require_device(device_key).await?;

        let revoked = self.token_manager.revoke_all(device_key).await?;
        let token = self
            .token_manager
            .issue_access_token(device_key, None, self.access_ttl_secs)
            .await?;

        info!(
            "🎫 设备申请令牌: device={}, revoked={}",
            device_key, revoked
        );
        Ok(token)
    }

    /// 换发刷新令牌（需要当前有效的访问令牌证明设备身份）
    pub async fn grant_refresh_token(
        &self,
        device_key: &str,
        access_token: &str,
    ) -> Result<TokenInfo> {
        Self::require_key(device_key, "device_key")?;
        Self::require_key(access_token, "access_token")?;

        let device = self
            .directory
            .find(device_key)
            .await?
            .ok_or_else(|| GatewayError::DeviceNotFound(device_key.to_string()))?;

        match self.token_manager.validate(access_token).await? {
            Some(info) if info.device_key == device_key => {}
            _ => return Err(GatewayError::TokenInvalid),
        }

        self.token_manager
            .issue_refresh_token(device_key, Some(device.product_key), self.refresh_ttl_secs)
            .await
    }

    /// 用刷新令牌换取新的访问令牌
    pub async fn refresh_access_token(
        &self,
        device_key: &str,
        refresh_token: &str,
    ) -> Result<TokenInfo> {
        Self::require_key(device_key, "device_key")?;
        Self::require_key(refresh_token, "refresh_token")?;

        self.require_device(device_key).await?;

        match self.token_manager.validate(refresh_token).await? {
            Some(info) if info.device_key == device_key => {}
            _ => return Err(GatewayError::RefreshTokenInvalid),
        }

        self.token_manager
            .refresh_access_token(refresh_token)
            .await?
            .ok_or(GatewayError::TokenRefreshFailed)
    }
}
