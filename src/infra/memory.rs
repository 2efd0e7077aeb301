use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::infra::kv::KvStore;

/// 字符串条目（带可选过期时间）
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

/// 内存键值存储
///
/// 过期采用读时惰性剔除，与 Redis 的 TTL 行为在判定边界上保持一致。
/// 仅适合单机部署和测试，不提供持久化。
pub struct MemoryStore {
    strings: DashMap<String, Entry>,
    sets: DashMap<String, HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            strings: DashMap::new(),
            sets: DashMap::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.strings.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.strings.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let new_entry = Entry {
            value: value.to_string(),
            expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
        };

        match self.strings.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                // 已过期的条目视同不存在
                if occupied.get().is_expired() {
                    occupied.insert(new_entry);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(new_entry);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let had_string = self.strings.remove(key).is_some();
        let had_set = self.sets.remove(key).is_some();
        Ok(had_string || had_set)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();

        store.set("k1", "v1").await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), Some("v1".to_string()));

        assert!(store.delete("k1").await.unwrap());
        assert!(!store.delete("k1").await.unwrap());
        assert_eq!(store.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent_is_the_decision() {
        let store = MemoryStore::new();

        // 第一次写入成功，窗口内的第二次失败
        assert!(store.set_if_absent("lock", "1", 60).await.unwrap());
        assert!(!store.set_if_absent("lock", "1", 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_absent() {
        let store = MemoryStore::new();

        store.set_ex("k1", "v1", 0).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), None);

        // 过期后 set_if_absent 可以重新占用
        assert!(store.set_if_absent("k1", "v2", 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStore::new();

        store.sadd("s", "a").await.unwrap();
        store.sadd("s", "b").await.unwrap();
        store.sadd("s", "a").await.unwrap();

        let mut members = store.smembers("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);

        store.srem("s", "a").await.unwrap();
        assert_eq!(store.smembers("s").await.unwrap(), vec!["b".to_string()]);

        // 不存在的集合返回空
        assert!(store.smembers("missing").await.unwrap().is_empty());
    }
}
