pub mod broker;
pub mod kv;
pub mod memory;
pub mod redis;

pub use broker::{BrokerMessage, LocalBroker, MessageBroker};
pub use kv::KvStore;
pub use memory::MemoryStore;
pub use redis::RedisClient;
