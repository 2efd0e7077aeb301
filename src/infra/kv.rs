use async_trait::async_trait;

use crate::error::Result;

/// 键值存储接口
///
/// 凭证存储、设备信息投影、频控都通过这层访问共享存储。
/// `set_if_absent` 必须是原子操作，它的成败就是频控判定本身。
#[async_trait]
pub trait KvStore: Send + Sync {
    /// GET key
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// SET key value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// SET key value，并设置过期时间（秒）
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// SET key value NX EX，仅当 key 不存在时写入
    ///
    /// 返回 true 表示写入成功（key 原先不存在）
    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    /// DEL key，返回 key 是否存在
    async fn delete(&self, key: &str) -> Result<bool>;

    /// SADD key member
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    /// SREM key member
    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    /// SMEMBERS key，key 不存在时返回空列表
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
}
