use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::device::DeviceInfo;
use crate::error::Result;
use crate::infra::KvStore;

const DEVICE_INFO_KEY_PREFIX: &str = "device:info:";

/// 设备目录
///
/// `device:info:{device_key}` 投影的读写入口，
/// 前置一层本地缓存挡掉热点设备的重复查询
pub struct DeviceDirectory {
    store: Arc<dyn KvStore>,
    /// L1 本地缓存
    cache: Cache<String, DeviceInfo>,
}

impl DeviceDirectory {
    pub fn new(store: Arc<dyn KvStore>, cache_capacity: u64, cache_ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(cache_capacity)
            .time_to_live(Duration::from_secs(cache_ttl_secs))
            .build();

        Self { store, cache }
    }

    fn info_key(device_key: &str) -> String {
        format!("{}{}", DEVICE_INFO_KEY_PREFIX, device_key)
    }

    /// 写入设备信息投影（注册/更新时调用）
    pub async fn save(&self, info: &DeviceInfo) -> Result<()> {
        let record = serde_json::to_string(info)?;
        self.store
            .set(&Self::info_key(&info.device_key), &record)
            .await?;

        self.cache
            .insert(info.device_key.clone(), info.clone())
            .await;

        debug!(
            "💾 设备投影写入: device={}, product={}",
            info.device_key, info.product_key
        );
        Ok(())
    }

    /// 查询设备信息
    pub async fn find(&self, device_key: &str) -> Result<Option<DeviceInfo>> {
        if let Some(info) = self.cache.get(device_key).await {
            return Ok(Some(info));
        }

        let record = match self.store.get(&Self::info_key(device_key)).await? {
            Some(record) => record,
            None => return Ok(None),
        };

        let info: DeviceInfo = serde_json::from_str(&record)?;
        self.cache.insert(device_key.to_string(), info.clone()).await;
        Ok(Some(info))
    }
}
