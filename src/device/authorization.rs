//! 设备授权关系
//!
//! 记录设备之间有方向、带时间窗口的授权：authorizing 授权
//! authorized 通过自己的令牌操作 authorizing 的能力。授权关系
//! 只失效不删除，有效性在查询时惰性判定。

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GatewayError, Result};

/// 授权状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantStatus {
    /// 已失效
    #[serde(rename = "inactive")]
    Inactive,
    /// 生效中（还需结合时间窗口判定）
    #[serde(rename = "active")]
    Active,
}

/// 授权记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    /// 授权方设备
    pub authorizing_device_key: String,
    /// 被授权方设备
    pub authorized_device_key: String,
    /// 授权类型（预留，当前只有一种）
    pub grant_type: u8,
    /// 授权状态
    pub status: GrantStatus,
    /// 生效时间（unix 秒）
    pub start_time: u64,
    /// 失效时间（unix 秒，0 表示永不过期）
    pub end_time: u64,
    /// 创建时间（unix 秒）
    pub create_time: u64,
    /// 最近更新时间（unix 秒）
    pub update_time: u64,
    /// 备注
    pub remarks: String,
}

impl AuthorizationGrant {
    /// 在给定时刻是否有效
    pub fn is_effective_at(&self, now: u64) -> bool {
        self.status == GrantStatus::Active && (self.end_time == 0 || self.end_time > now)
    }
}

/// 设备授权图
///
/// 以 (授权方, 被授权方) 有序对为键，每对最多一条记录，
/// 重复授权原地更新。entry API 保证单对记录的原子 upsert。
pub struct DeviceAuthorizationGraph {
    grants: DashMap<(String, String), AuthorizationGrant>,
}

impl DeviceAuthorizationGraph {
    pub fn new() -> Self {
        Self {
            grants: DashMap::new(),
        }
    }

    /// 建立或更新授权
    pub fn grant(
        &self,
        authorizing_device_key: &str,
        authorized_device_key: &str,
        start_time: u64,
        end_time: u64,
        status: GrantStatus,
    ) -> AuthorizationGrant {
        let now = Utc::now().timestamp() as u64;
        let key = (
            authorizing_device_key.to_string(),
            authorized_device_key.to_string(),
        );

        let grant = self
            .grants
            .entry(key)
            .and_modify(|existing| {
                existing.status = status;
                existing.start_time = start_time;
                existing.end_time = end_time;
                existing.update_time = now;
            })
            .or_insert_with(|| AuthorizationGrant {
                authorizing_device_key: authorizing_device_key.to_string(),
                authorized_device_key: authorized_device_key.to_string(),
                grant_type: 1,
                status,
                start_time,
                end_time,
                create_time: now,
                update_time: now,
                remarks: String::new(),
            })
            .value()
            .clone();

        info!(
            "🔗 设备授权更新: {} -> {}, status={:?}, window=[{}, {}]",
            authorizing_device_key, authorized_device_key, status, start_time, end_time
        );

        grant
    }

    /// 解除授权（置为失效，不删除记录）
    pub fn revoke_grant(
        &self,
        authorizing_device_key: &str,
        authorized_device_key: &str,
    ) -> Result<()> {
        let key = (
            authorizing_device_key.to_string(),
            authorized_device_key.to_string(),
        );

        let mut grant = self.grants.get_mut(&key).ok_or_else(|| {
            GatewayError::NotFound(format!(
                "no grant from {} to {}",
                authorizing_device_key, authorized_device_key
            ))
        })?;

        grant.status = GrantStatus::Inactive;
        grant.update_time = Utc::now().timestamp() as u64;

        info!(
            "🔗 设备解除授权: {} -> {}",
            authorizing_device_key, authorized_device_key
        );
        Ok(())
    }

    /// 查询「谁授权了我」：device 作为被授权方的全部有效授权
    pub fn list_authorized_for(&self, device_key: &str) -> Vec<AuthorizationGrant> {
        let now = Utc::now().timestamp() as u64;
        self.grants
            .iter()
            .filter(|entry| {
                entry.authorized_device_key == device_key && entry.is_effective_at(now)
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// 查询「我授权了谁」：device 作为授权方的全部有效授权
    pub fn list_authorizing_by(&self, device_key: &str) -> Vec<AuthorizationGrant> {
        let now = Utc::now().timestamp() as u64;
        self.grants
            .iter()
            .filter(|entry| {
                entry.authorizing_device_key == device_key && entry.is_effective_at(now)
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// 判断 target 是否已授权 caller 操作自己
    pub fn is_permitted(&self, caller_device_key: &str, target_device_key: &str) -> bool {
        self.list_authorized_for(caller_device_key)
            .iter()
            .any(|grant| grant.authorizing_device_key == target_device_key)
    }
}

impl Default for DeviceAuthorizationGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> u64 {
        Utc::now().timestamp() as u64
    }

    #[tokio::test]
    async fn test_grant_without_expiry_is_effective() {
        let graph = DeviceAuthorizationGraph::new();
        graph.grant("d1", "d2", 0, 0, GrantStatus::Active);

        let grants = graph.list_authorized_for("d2");
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].authorizing_device_key, "d1");
        assert!(graph.is_permitted("d2", "d1"));
    }

    #[tokio::test]
    async fn test_expired_grant_is_not_listed() {
        let graph = DeviceAuthorizationGraph::new();
        graph.grant("d1", "d2", now() - 100, now() - 10, GrantStatus::Active);

        assert!(graph.list_authorized_for("d2").is_empty());
        assert!(graph.list_authorizing_by("d1").is_empty());
        assert!(!graph.is_permitted("d2", "d1"));
    }

    #[tokio::test]
    async fn test_regrant_updates_in_place() {
        let graph = DeviceAuthorizationGraph::new();

        // 先授权一个已经过期的窗口，再用新窗口覆盖
        graph.grant("d1", "d2", now() - 100, now() - 10, GrantStatus::Active);
        graph.grant("d1", "d2", now(), now() + 3600, GrantStatus::Active);

        let grants = graph.list_authorized_for("d2");
        assert_eq!(grants.len(), 1);
        assert!(grants[0].end_time > now());
    }

    #[tokio::test]
    async fn test_grant_direction_matters() {
        let graph = DeviceAuthorizationGraph::new();
        graph.grant("d1", "d2", 0, 0, GrantStatus::Active);

        // d1 -> d2 的授权不允许反方向
        assert!(graph.is_permitted("d2", "d1"));
        assert!(!graph.is_permitted("d1", "d2"));
        assert_eq!(graph.list_authorizing_by("d1").len(), 1);
        assert!(graph.list_authorizing_by("d2").is_empty());
    }

    #[tokio::test]
    async fn test_revoke_grant() {
        let graph = DeviceAuthorizationGraph::new();
        graph.grant("d1", "d2", 0, 0, GrantStatus::Active);

        graph.revoke_grant("d1", "d2").unwrap();
        assert!(!graph.is_permitted("d2", "d1"));

        // 记录仍存在，重新授权可以恢复
        graph.grant("d1", "d2", 0, 0, GrantStatus::Active);
        assert!(graph.is_permitted("d2", "d1"));
    }

    #[tokio::test]
    async fn test_revoke_missing_grant_fails() {
        let graph = DeviceAuthorizationGraph::new();
        let result = graph.revoke_grant("d1", "d2");
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }
}
