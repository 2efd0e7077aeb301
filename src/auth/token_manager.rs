//! 令牌生命周期管理
//!
//! 签发、轮换、校验、吊销设备持有的不透明令牌。
//! 同一设备同一类型的令牌最多只有一个存活：签发新令牌前
//! 先吊销该类型的全部旧令牌（无并存宽限期）。

use std::sync::Arc;

use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::infra::KvStore;

/// 访问令牌默认有效期（秒）
pub const ACCESS_TOKEN_TTL_SECS: u64 = 3600;
/// 刷新令牌默认有效期（秒）
pub const REFRESH_TOKEN_TTL_SECS: u64 = 604800;

/// 访问令牌随机字节数（hex 编码后 64 字符）
const ACCESS_TOKEN_BYTES: usize = 32;
/// 刷新令牌随机字节数（hex 编码后 80 字符）
const REFRESH_TOKEN_BYTES: usize = 40;

const TOKEN_KEY_PREFIX: &str = "oauth2:token:";

/// 令牌类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    #[serde(rename = "access_token")]
    Access,
    #[serde(rename = "refresh_token")]
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access_token",
            TokenKind::Refresh => "refresh_token",
        }
    }
}

/// 令牌信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    /// 令牌值（随机 hex 字符串）
    pub token: String,
    /// 令牌类型
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// 有效期（秒）
    pub expires_in: u64,
    /// 创建时间戳（毫秒）
    pub created_at: i64,
    /// 所属设备
    pub device_key: String,
    /// 授权范围
    pub scope: Option<String>,
}

impl TokenInfo {
    /// 判断在给定时刻是否存活
    ///
    /// 到期瞬间仍然有效（now == created_at + ttl），与存储层的
    /// TTL 剔除口径一致：存储剔除只会晚于这里的判定，不会早于。
    pub fn is_live_at(&self, now_ms: i64) -> bool {
        now_ms <= self.created_at + (self.expires_in as i64) * 1000
    }
}

/// 令牌生命周期管理器
///
/// 令牌记录本体由键值存储持有（带 TTL），这里只维护
/// (device, kind) -> 存活令牌集合 的二级索引，用于批量吊销。
pub struct TokenManager {
    store: Arc<dyn KvStore>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// 令牌记录键
    fn record_key(token: &str) -> String {
        format!("{}{}", TOKEN_KEY_PREFIX, token)
    }

    /// 设备令牌索引键（按类型区分）
    fn index_key(device_key: &str, kind: TokenKind) -> String {
        format!("{}user:{}:{}", TOKEN_KEY_PREFIX, device_key, kind.as_str())
    }

    /// 生成随机令牌值
    fn generate_value(byte_len: usize) -> String {
        let mut bytes = vec![0u8; byte_len];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// 吊销设备的某一类型的全部存活令牌，返回吊销数量
    async fn invalidate_kind(&self, device_key: &str, kind: TokenKind) -> Result<usize> {
        let index_key = Self::index_key(device_key, kind);
        let tokens = self.store.smembers(&index_key).await?;

        for token in &tokens {
            self.store.delete(&Self::record_key(token)).await?;
            self.store.srem(&index_key, token).await?;
        }

        if !tokens.is_empty() {
            debug!(
                "🗑️ 吊销令牌: device={}, kind={}, count={}",
                device_key,
                kind.as_str(),
                tokens.len()
            );
        }

        Ok(tokens.len())
    }

    /// 签发令牌（先轮换后写入）
    ///
    /// 轮换是「先吊销、再签发」两步，不是原子交换。两个并发的
    /// 签发请求理论上可以交错，短暂留下两个存活令牌；轮换只由
    /// 设备自身发起，这个窗口可以接受，这里不加每设备锁。
    async fn issue(
        &self,
        device_key: &str,
        scope: Option<String>,
        kind: TokenKind,
        expires_in: u64,
        byte_len: usize,
    ) -> Result<TokenInfo> {
        self.invalidate_kind(device_key, kind).await?;

        let info = TokenInfo {
            token: Self::generate_value(byte_len),
            kind,
            expires_in,
            created_at: Utc::now().timestamp_millis(),
            device_key: device_key.to_string(),
            scope,
        };

        let record = serde_json::to_string(&info)?;
        self.store
            .set_ex(&Self::record_key(&info.token), &record, expires_in)
            .await?;
        self.store
            .sadd(&Self::index_key(device_key, kind), &info.token)
            .await?;

        info!(
            "🎫 签发令牌: device={}, kind={}, expires_in={}s",
            device_key,
            kind.as_str(),
            expires_in
        );

        Ok(info)
    }

    /// 签发访问令牌（吊销该设备全部存活访问令牌）
    pub async fn issue_access_token(
        &self,
        device_key: &str,
        scope: Option<String>,
        expires_in: u64,
    ) -> Result<TokenInfo> {
        self.issue(device_key, scope, TokenKind::Access, expires_in, ACCESS_TOKEN_BYTES)
            .await
    }

    /// 签发刷新令牌（吊销该设备全部存活刷新令牌）
    pub async fn issue_refresh_token(
        &self,
        device_key: &str,
        scope: Option<String>,
        expires_in: u64,
    ) -> Result<TokenInfo> {
        self.issue(device_key, scope, TokenKind::Refresh, expires_in, REFRESH_TOKEN_BYTES)
            .await
    }

    /// 校验令牌
    ///
    /// 接受裸令牌或带 `Bearer ` 前缀的完整头。记录存在但已过期时
    /// 视同不存在（读时惰性判定，不依赖存储层 TTL 剔除及时性）。
    pub async fn validate(&self, token: &str) -> Result<Option<TokenInfo>> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Ok(None);
        }

        let record = match self.store.get(&Self::record_key(token)).await? {
            Some(record) => record,
            None => return Ok(None),
        };

        let info: TokenInfo = match serde_json::from_str(&record) {
            Ok(info) => info,
            Err(e) => {
                warn!("⚠️ 令牌记录损坏: {}", e);
                return Ok(None);
            }
        };

        if info.is_live_at(Utc::now().timestamp_millis()) {
            Ok(Some(info))
        } else {
            Ok(None)
        }
    }

    /// 使用刷新令牌换取新的访问令牌
    ///
    /// 刷新令牌缺失、过期或类型不符时返回 None；
    /// 成功时为同一设备签发全新的访问令牌（触发访问令牌轮换）。
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<Option<TokenInfo>> {
        let info = match self.validate(refresh_token).await? {
            Some(info) if info.kind == TokenKind::Refresh => info,
            _ => return Ok(None),
        };

        let access = self
            .issue_access_token(&info.device_key, info.scope.clone(), ACCESS_TOKEN_TTL_SECS)
            .await?;
        Ok(Some(access))
    }

    /// 吊销指定令牌，返回令牌是否存在（重复吊销返回 false，不报错）
    pub async fn revoke(&self, token: &str) -> Result<bool> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();

        let record = match self.store.get(&Self::record_key(token)).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        let removed = self.store.delete(&Self::record_key(token)).await?;
        if let Ok(info) = serde_json::from_str::<TokenInfo>(&record) {
            self.store
                .srem(&Self::index_key(&info.device_key, info.kind), token)
                .await?;
        }

        Ok(removed)
    }

    /// 吊销设备的全部存活令牌（两种类型），返回吊销数量
    pub async fn revoke_all(&self, device_key: &str) -> Result<usize> {
        let access = self.invalidate_kind(device_key, TokenKind::Access).await?;
        let refresh = self.invalidate_kind(device_key, TokenKind::Refresh).await?;
        Ok(access + refresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::MemoryStore;

    fn manager() -> TokenManager {
        TokenManager::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_issue_and_validate() {
        let manager = manager();

        let issued = manager
            .issue_access_token("dev-1", None, ACCESS_TOKEN_TTL_SECS)
            .await
            .unwrap();
        assert_eq!(issued.kind, TokenKind::Access);
        assert_eq!(issued.token.len(), ACCESS_TOKEN_BYTES * 2);

        let validated = manager.validate(&issued.token).await.unwrap().unwrap();
        assert_eq!(validated.device_key, "dev-1");
    }

    #[tokio::test]
    async fn test_bearer_prefix_is_stripped() {
        let manager = manager();

        let issued = manager
            .issue_access_token("dev-1", None, ACCESS_TOKEN_TTL_SECS)
            .await
            .unwrap();

        let wrapped = format!("Bearer {}", issued.token);
        assert!(manager.validate(&wrapped).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rotation_invalidates_previous_access_token() {
        let manager = manager();

        let first = manager
            .issue_access_token("dev-1", None, ACCESS_TOKEN_TTL_SECS)
            .await
            .unwrap();
        let second = manager
            .issue_access_token("dev-1", None, ACCESS_TOKEN_TTL_SECS)
            .await
            .unwrap();

        // 旧令牌失效，新令牌有效
        assert!(manager.validate(&first.token).await.unwrap().is_none());
        let validated = manager.validate(&second.token).await.unwrap().unwrap();
        assert_eq!(validated.token, second.token);
    }

    #[tokio::test]
    async fn test_rotation_does_not_cross_owners() {
        let manager = manager();

        let t1 = manager
            .issue_access_token("dev-1", None, ACCESS_TOKEN_TTL_SECS)
            .await
            .unwrap();
        let t2 = manager
            .issue_access_token("dev-2", None, ACCESS_TOKEN_TTL_SECS)
            .await
            .unwrap();

        assert!(manager.validate(&t1.token).await.unwrap().is_some());
        assert!(manager.validate(&t2.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_record_reads_as_absent() {
        let store = Arc::new(MemoryStore::new());
        let manager = TokenManager::new(store.clone());

        // 直接写入一条创建时间在两小时前、有效期一小时的记录，
        // 存储层 TTL 尚未剔除，惰性判定也必须视为不存在
        let stale = TokenInfo {
            token: "deadbeef".to_string(),
            kind: TokenKind::Access,
            expires_in: 3600,
            created_at: Utc::now().timestamp_millis() - 7_200_000,
            device_key: "dev-1".to_string(),
            scope: None,
        };
        store
            .set(
                &TokenManager::record_key("deadbeef"),
                &serde_json::to_string(&stale).unwrap(),
            )
            .await
            .unwrap();

        assert!(manager.validate("deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_requires_refresh_kind() {
        let manager = manager();

        let access = manager
            .issue_access_token("dev-1", None, ACCESS_TOKEN_TTL_SECS)
            .await
            .unwrap();

        // 用访问令牌换取新访问令牌：拒绝
        assert!(manager
            .refresh_access_token(&access.token)
            .await
            .unwrap()
            .is_none());
        // 不存在的令牌：拒绝
        assert!(manager
            .refresh_access_token("no-such-token")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_refresh_rotates_access_token() {
        let manager = manager();

        let old_access = manager
            .issue_access_token("dev-1", None, ACCESS_TOKEN_TTL_SECS)
            .await
            .unwrap();
        let refresh = manager
            .issue_refresh_token("dev-1", Some("pk-1".to_string()), REFRESH_TOKEN_TTL_SECS)
            .await
            .unwrap();

        let new_access = manager
            .refresh_access_token(&refresh.token)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(new_access.kind, TokenKind::Access);
        assert_eq!(new_access.device_key, "dev-1");
        assert_eq!(new_access.scope.as_deref(), Some("pk-1"));
        // 旧访问令牌被轮换掉，刷新令牌自身仍有效
        assert!(manager.validate(&old_access.token).await.unwrap().is_none());
        assert!(manager.validate(&refresh.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let manager = manager();

        let issued = manager
            .issue_access_token("dev-1", None, ACCESS_TOKEN_TTL_SECS)
            .await
            .unwrap();

        assert!(manager.revoke(&issued.token).await.unwrap());
        assert!(!manager.revoke(&issued.token).await.unwrap());
        assert!(!manager.revoke("never-issued").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_all_clears_both_kinds() {
        let manager = manager();

        manager
            .issue_access_token("dev-1", None, ACCESS_TOKEN_TTL_SECS)
            .await
            .unwrap();
        manager
            .issue_refresh_token("dev-1", None, REFRESH_TOKEN_TTL_SECS)
            .await
            .unwrap();

        assert_eq!(manager.revoke_all("dev-1").await.unwrap(), 2);
        assert_eq!(manager.revoke_all("dev-1").await.unwrap(), 0);
    }
}
