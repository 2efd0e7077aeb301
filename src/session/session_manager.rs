use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::error::{GatewayError, Result};

/// 会话底层句柄
///
/// 包装传输层的会话对象，网关只在淘汰时回调 close
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// 关闭底层传输会话
    async fn close(&self);
}

/// 会话条目
struct SessionEntry {
    handle: Arc<dyn SessionHandle>,
    /// 建立时间
    created_at: DateTime<Utc>,
    /// 最后活跃时间
    last_active_at: DateTime<Utc>,
}

/// 会话管理器
///
/// 维护 session_id -> 句柄 的映射，限制并发会话总数，
/// 由后台清理任务定期淘汰空闲会话。会话不持久化，进程
/// 重启后全部丢失。
pub struct SessionManager {
    /// 会话映射：session_id -> SessionEntry
    sessions: RwLock<HashMap<String, SessionEntry>>,
    /// 最大并发会话数
    max_sessions: usize,
    /// 会话空闲超时
    idle_timeout: Duration,
}

impl SessionManager {
    /// 创建新的会话管理器
    pub fn new(max_sessions: usize, idle_timeout_secs: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            idle_timeout: Duration::seconds(idle_timeout_secs as i64),
        }
    }

    /// 登记会话
    ///
    /// 会话表已满时返回 CapacityExceeded，由调用方拒绝本次初始化
    pub async fn add_session(&self, session_id: &str, handle: Arc<dyn SessionHandle>) -> Result<()> {
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= self.max_sessions {
            tracing::warn!(
                "⚠️ 会话数达到上限: current={}, max={}",
                sessions.len(),
                self.max_sessions
            );
            return Err(GatewayError::CapacityExceeded(format!(
                "max sessions reached: {}",
                self.max_sessions
            )));
        }

        let now = Utc::now();
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                handle,
                created_at: now,
                last_active_at: now,
            },
        );

        tracing::info!("✅ 会话登记: session={}, total={}", session_id, sessions.len());
        Ok(())
    }

    /// 查询会话句柄
    pub async fn get_session(&self, session_id: &str) -> Option<Arc<dyn SessionHandle>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.handle.clone())
    }

    /// 更新活跃时间（会话不存在时静默返回）
    pub async fn refresh_session(&self, session_id: &str) {
        if let Some(entry) = self.sessions.write().await.get_mut(session_id) {
            entry.last_active_at = Utc::now();
        }
    }

    /// 移除会话（幂等）
    pub async fn remove_session(&self, session_id: &str) {
        if let Some(entry) = self.sessions.write().await.remove(session_id) {
            let lived = Utc::now().signed_duration_since(entry.created_at);
            tracing::info!(
                "🔓 会话移除: session={}, lived={}s",
                session_id,
                lived.num_seconds()
            );
        }
    }

    /// 当前会话总数
    pub async fn active_session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// 清理过期会话，返回清理数量
    ///
    /// 先摘除条目，释放锁之后再逐个回调 close，
    /// 避免在持锁期间等待传输层
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<(String, Arc<dyn SessionHandle>)> = {
            let mut sessions = self.sessions.write().await;
            let expired_ids: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| {
                    now.signed_duration_since(entry.last_active_at) > self.idle_timeout
                })
                .map(|(id, _)| id.clone())
                .collect();

            expired_ids
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|entry| (id, entry.handle)))
                .collect()
        };

        for (session_id, handle) in &expired {
            tracing::info!("🧹 清理过期会话: session={}", session_id);
            handle.close().await;
        }

        if !expired.is_empty() {
            tracing::info!("🧹 会话清理完成: 清理了 {} 个过期会话", expired.len());
        }

        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// 记录 close 是否被调用的测试句柄
    struct TestHandle {
        closed: AtomicBool,
    }

    impl TestHandle {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                closed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl SessionHandle for TestHandle {
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_add_and_get_session() {
        let manager = SessionManager::new(10, 300);
        let handle = TestHandle::new();

        manager.add_session("s-1", handle).await.unwrap();
        assert!(manager.get_session("s-1").await.is_some());
        assert!(manager.get_session("s-2").await.is_none());
        assert_eq!(manager.active_session_count().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_exceeded() {
        let manager = SessionManager::new(2, 300);

        manager.add_session("s-1", TestHandle::new()).await.unwrap();
        manager.add_session("s-2", TestHandle::new()).await.unwrap();

        let result = manager.add_session("s-3", TestHandle::new()).await;
        assert!(matches!(result, Err(GatewayError::CapacityExceeded(_))));

        // 释放一个后可以继续登记
        manager.remove_session("s-1").await;
        manager.add_session("s-3", TestHandle::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_session_is_idempotent() {
        let manager = SessionManager::new(10, 300);

        manager.add_session("s-1", TestHandle::new()).await.unwrap();
        manager.remove_session("s-1").await;
        manager.remove_session("s-1").await;
        manager.remove_session("never-added").await;

        assert_eq!(manager.active_session_count().await, 0);
    }

    #[tokio::test]
    async fn test_refresh_absent_session_is_noop() {
        let manager = SessionManager::new(10, 300);
        manager.refresh_session("missing").await;
        assert_eq!(manager.active_session_count().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_closes_idle_sessions() {
        // 超时为 0：所有会话立即视为空闲
        let manager = SessionManager::new(10, 0);
        let idle = TestHandle::new();

        manager.add_session("s-1", idle.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let cleaned = manager.cleanup_expired_sessions().await;
        assert_eq!(cleaned, 1);
        assert!(idle.closed.load(Ordering::SeqCst));
        assert!(manager.get_session("s-1").await.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_active_sessions() {
        let manager = SessionManager::new(10, 300);

        manager.add_session("s-1", TestHandle::new()).await.unwrap();
        assert_eq!(manager.cleanup_expired_sessions().await, 0);
        assert_eq!(manager.active_session_count().await, 1);
    }
}
