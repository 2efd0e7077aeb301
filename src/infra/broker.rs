use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;

/// 经由消息代理投递的一条消息
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    /// 来源主题
    pub topic: String,
    /// 原始负载
    pub payload: Vec<u8>,
}

/// 消息代理接口
///
/// 网关只消费 publish / subscribe / unsubscribe 三个原语，
/// 连接与重连机制由具体实现自理。
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// 发布消息，返回即代表代理已确认接收
    async fn publish(&self, topic: &str, payload: &[u8], qos: u8, retain: bool) -> Result<()>;

    /// 订阅主题，返回该主题的消息接收端
    async fn subscribe(&self, topic: &str, qos: u8) -> Result<mpsc::Receiver<BrokerMessage>>;

    /// 取消订阅（幂等，重复取消不报错）
    async fn unsubscribe(&self, topic: &str) -> Result<()>;
}

/// 订阅通道的缓冲大小
const SUBSCRIPTION_BUFFER: usize = 64;

/// 进程内消息代理
///
/// 按主题维护订阅者发送端列表，publish 时逐个投递。
/// 用于测试和单机部署；生产环境接入真实 MQTT 代理时
/// 实现同一个 MessageBroker trait 即可。
pub struct LocalBroker {
    subscriptions: RwLock<HashMap<String, Vec<mpsc::Sender<BrokerMessage>>>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for LocalBroker {
    async fn publish(&self, topic: &str, payload: &[u8], _qos: u8, _retain: bool) -> Result<()> {
        let senders: Vec<mpsc::Sender<BrokerMessage>> = {
            let subscriptions = self.subscriptions.read();
            subscriptions.get(topic).cloned().unwrap_or_default()
        };

        debug!("📤 发布消息: topic={}, subscribers={}", topic, senders.len());

        for sender in senders {
            let message = BrokerMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            };
            // 订阅端已关闭或积压时丢弃，与 QoS 0/1 的尽力投递语义一致
            if let Err(e) = sender.try_send(message) {
                warn!("⚠️ 消息投递失败: topic={}, err={}", topic, e);
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: u8) -> Result<mpsc::Receiver<BrokerMessage>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        self.subscriptions
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(tx);

        debug!("📥 订阅成功: topic={}", topic);
        Ok(rx)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let removed = self.subscriptions.write().remove(topic);

        if removed.is_some() {
            debug!("🗑️ 取消订阅: topic={}", topic);
        }
        Ok(())
    }
}
