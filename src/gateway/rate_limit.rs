use std::sync::Arc;

use crate::error::Result;
use crate::infra::KvStore;

/// 同一 (设备, 动作) 两次操作的最小间隔（秒）
const ACTION_MIN_INTERVAL_SECS: u64 = 1;
/// 同一设备两次申请令牌的最小间隔（秒）
const TOKEN_MIN_INTERVAL_SECS: u64 = 1200;

/// 操作频控
///
/// 用存储的原子 SET NX EX 实现：写入成功与否就是放行与否，
/// 不存在先读后写的竞态窗口。
#[derive(Clone)]
pub struct ActionRateLimiter {
    store: Arc<dyn KvStore>,
}

impl ActionRateLimiter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// 设备操作频控，返回 true 表示放行
    pub async fn allow_action(&self, device_key: &str, action: &str) -> Result<bool> {
        let key = format!("rate_limit:{}:{}", device_key, action);
        self.store
            .set_if_absent(&key, "1", ACTION_MIN_INTERVAL_SECS)
            .await
    }

    /// 令牌申请频控，返回 true 表示放行
    pub async fn allow_token_request(&self, device_key: &str) -> Result<bool> {
        let key = format!("rate_limit:token:{}", device_key);
        self.store
            .set_if_absent(&key, "1", TOKEN_MIN_INTERVAL_SECS)
            .await
    }
}
