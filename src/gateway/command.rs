//! 设备指令网关
//!
//! 控制与查询共用同一条前置校验链：令牌 -> 跨设备授权 ->
//! 频控 -> 设备投影。控制是发布即完成；查询是带关联 id 的
//! 发布-等待上报往返，同一上报主题上可能同时跑着多个查询，
//! 关联 id 是唯一的分流依据。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::auth::TokenManager;
use crate::device::{DeviceAuthorizationGraph, DeviceDirectory, DeviceInfo};
use crate::error::{GatewayError, Result};
use crate::gateway::audit::AuditLog;
use crate::gateway::rate_limit::ActionRateLimiter;
use crate::gateway::topics;
use crate::infra::MessageBroker;

/// 关联 id 长度与字符表（去掉了易混淆的 I/l/O/o/0）
const TRACE_ID_LEN: usize = 8;
const TRACE_ID_CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTWXYZabcdefhijkmnprstwxyz123456789";

/// 指令结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Success,
    Warning,
    Unauthorized,
    RateLimited,
    DeviceNotFound,
    Timeout,
    ProtocolError,
    Error,
}

/// 指令结果
///
/// 所有失败都折叠成结构化结果返回，不向传输层抛错
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub device_key: String,
    pub status: CommandStatus,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl CommandOutcome {
    fn new(
        device_key: &str,
        status: CommandStatus,
        success: bool,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            success,
            device_key: device_key.to_string(),
            status,
            message: message.into(),
            data,
        }
    }

    fn failure(device_key: &str, status: CommandStatus, message: impl Into<String>) -> Self {
        Self::new(device_key, status, false, message, None)
    }
}

/// 下行消息头
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageHeader {
    trace_id: String,
    timestamp: i64,
}

/// 下行指令消息
#[derive(Debug, Serialize)]
struct CommandMessage<'a> {
    header: MessageHeader,
    body: CommandBody<'a>,
}

#[derive(Debug, Serialize)]
struct CommandBody<'a> {
    action: &'a str,
    value: &'a serde_json::Value,
}

/// 设备上报消息
#[derive(Debug, Deserialize)]
struct ReportMessage {
    header: MessageHeader,
    #[serde(default)]
    body: ReportBody,
}

#[derive(Debug, Default, Deserialize)]
struct ReportBody {
    #[serde(default)]
    properties: Vec<ReportProperty>,
}

#[derive(Debug, Deserialize)]
struct ReportProperty {
    id: String,
    value: serde_json::Value,
}

/// 设备指令网关
pub struct CommandGateway {
    token_manager: Arc<TokenManager>,
    authorization: Arc<DeviceAuthorizationGraph>,
    directory: Arc<DeviceDirectory>,
    rate_limiter: ActionRateLimiter,
    broker: Arc<dyn MessageBroker>,
    audit: Arc<AuditLog>,
    query_timeout: Duration,
}

impl CommandGateway {
    pub fn new(
        token_manager: Arc<TokenManager>,
        authorization: Arc<DeviceAuthorizationGraph>,
        directory: Arc<DeviceDirectory>,
        rate_limiter: ActionRateLimiter,
        broker: Arc<dyn MessageBroker>,
        audit: Arc<AuditLog>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            token_manager,
            authorization,
            directory,
            rate_limiter,
            broker,
            audit,
            query_timeout,
        }
    }

    /// 控制设备：发布指令，代理确认即完成，不等待设备回应
    pub async fn control(
        &self,
        token: &str,
        device_key: &str,
        action: &str,
        value: &serde_json::Value,
    ) -> CommandOutcome {
        let outcome = match self.precheck(token, device_key, action).await {
            Ok(info) => self.publish_command(&info, device_key, action, value).await,
            Err(outcome) => outcome,
        };

        self.audit.record(
            device_key,
            action,
            value,
            outcome.status,
            outcome.success,
            &outcome.message,
        );
        outcome
    }

    /// 查询设备：发布查询并等待带相同关联 id 的上报，超时放弃
    pub async fn query(
        &self,
        token: &str,
        device_key: &str,
        action: &str,
        value: &serde_json::Value,
    ) -> CommandOutcome {
        let outcome = match self.precheck(token, device_key, action).await {
            Ok(info) => self.run_query(&info, device_key, action, value).await,
            Err(outcome) => outcome,
        };

        self.audit.record(
            device_key,
            action,
            value,
            outcome.status,
            outcome.success,
            &outcome.message,
        );
        outcome
    }

    /// 前置校验链，任何一环不过直接给出最终结果
    async fn precheck(
        &self,
        token: &str,
        device_key: &str,
        action: &str,
    ) -> std::result::Result<DeviceInfo, CommandOutcome> {
        // 1. 令牌校验
        let token_info = match self.token_manager.validate(token).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                warn!("🚫 鉴权失败: device={}, action={}", device_key, action);
                return Err(CommandOutcome::failure(
                    device_key,
                    CommandStatus::Unauthorized,
                    "鉴权失败，禁止操作",
                ));
            }
            Err(e) => return Err(self.internal_outcome(device_key, e)),
        };

        // 2. 跨设备操作需要目标设备授权过调用方
        if token_info.device_key != device_key
            && !self.authorization.is_permitted(&token_info.device_key, device_key)
        {
            warn!(
                "🚫 越权操作被拒: caller={}, target={}",
                token_info.device_key, device_key
            );
            return Err(CommandOutcome::failure(
                device_key,
                CommandStatus::Unauthorized,
                "鉴权失败，禁止操作",
            ));
        }

        // 3. (设备, 动作) 频控
        match self.rate_limiter.allow_action(device_key, action).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(CommandOutcome::failure(
                    device_key,
                    CommandStatus::RateLimited,
                    "操作过于频繁，请稍后再试",
                ));
            }
            Err(e) => return Err(self.internal_outcome(device_key, e)),
        }

        // 4. 设备投影
        match self.directory.find(device_key).await {
            Ok(Some(info)) => Ok(info),
            Ok(None) => Err(CommandOutcome::failure(
                device_key,
                CommandStatus::DeviceNotFound,
                "设备不存在或被禁用",
            )),
            Err(e) => Err(self.internal_outcome(device_key, e)),
        }
    }

    fn internal_outcome(&self, device_key: &str, error: GatewayError) -> CommandOutcome {
        error!("❌ 指令执行内部错误: device={}, err={}", device_key, error);
        CommandOutcome::failure(device_key, CommandStatus::Error, "网关内部错误")
    }

    /// 生成关联 id
    fn random_trace_id() -> String {
        let mut rng = rand::thread_rng();
        (0..TRACE_ID_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..TRACE_ID_CHARSET.len());
                TRACE_ID_CHARSET[idx] as char
            })
            .collect()
    }

    fn build_command(action: &str, value: &serde_json::Value, trace_id: String) -> Result<Vec<u8>> {
        let message = CommandMessage {
            header: MessageHeader {
                trace_id,
                timestamp: Utc::now().timestamp_millis(),
            },
            body: CommandBody { action, value },
        };
        Ok(serde_json::to_vec(&message)?)
    }

    async fn publish_command(
        &self,
        info: &DeviceInfo,
        device_key: &str,
        action: &str,
        value: &serde_json::Value,
    ) -> CommandOutcome {
        let topic = topics::command_topic(&info.product_key, device_key);
        let payload = match Self::build_command(action, value, Self::random_trace_id()) {
            Ok(payload) => payload,
            Err(e) => return self.internal_outcome(device_key, e),
        };

        match self.broker.publish(&topic, &payload, 1, false).await {
            Ok(()) => {
                debug!("✅ 控制指令已发布: device={}, action={}", device_key, action);
                CommandOutcome::new(device_key, CommandStatus::Success, true, "操作已完成", None)
            }
            Err(e) => self.internal_outcome(device_key, e),
        }
    }

    async fn run_query(
        &self,
        info: &DeviceInfo,
        device_key: &str,
        action: &str,
        value: &serde_json::Value,
    ) -> CommandOutcome {
        let trace_id = Self::random_trace_id();
        let pub_topic = topics::command_topic(&info.product_key, device_key);
        let sub_topic = topics::report_topic(&info.product_key, device_key);

        // 先订阅再发布，设备的响应不会跑在订阅前面
        let mut rx = match self.broker.subscribe(&sub_topic, 1).await {
            Ok(rx) => rx,
            Err(e) => return self.internal_outcome(device_key, e),
        };

        let outcome = self
            .await_matching_report(&mut rx, &pub_topic, device_key, action, value, &trace_id)
            .await;

        // 成功、超时、解析失败，任何出口都要取消订阅，
        // 否则订阅会在反复查询中越积越多
        if let Err(e) = self.broker.unsubscribe(&sub_topic).await {
            warn!("⚠️ 取消订阅失败: topic={}, err={}", sub_topic, e);
        }

        outcome
    }

    async fn await_matching_report(
        &self,
        rx: &mut tokio::sync::mpsc::Receiver<crate::infra::BrokerMessage>,
        pub_topic: &str,
        device_key: &str,
        action: &str,
        value: &serde_json::Value,
        trace_id: &str,
    ) -> CommandOutcome {
        let payload = match Self::build_command(action, value, trace_id.to_string()) {
            Ok(payload) => payload,
            Err(e) => return self.internal_outcome(device_key, e),
        };

        if let Err(e) = self.broker.publish(pub_topic, &payload, 1, false).await {
            return self.internal_outcome(device_key, e);
        }

        let deadline = tokio::time::sleep(self.query_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return CommandOutcome::failure(
                        device_key,
                        CommandStatus::Timeout,
                        format!(
                            "查询设备超时（{}ms）：设备未上报响应",
                            self.query_timeout.as_millis()
                        ),
                    );
                }
                received = rx.recv() => {
                    let message = match received {
                        Some(message) => message,
                        None => {
                            return self.internal_outcome(
                                device_key,
                                GatewayError::Internal("report subscription closed".to_string()),
                            );
                        }
                    };

                    let report: ReportMessage = match serde_json::from_slice(&message.payload) {
                        Ok(report) => report,
                        Err(e) => {
                            error!(
                                "❌ 解析设备上报失败: device={}, err={}, raw={}",
                                device_key,
                                e,
                                String::from_utf8_lossy(&message.payload)
                            );
                            return CommandOutcome::failure(
                                device_key,
                                CommandStatus::ProtocolError,
                                "解析设备上报消息失败",
                            );
                        }
                    };

                    // 关联 id 不符：同主题上其他查询的流量，忽略继续等
                    if report.header.trace_id != trace_id {
                        continue;
                    }

                    let matched = report
                        .body
                        .properties
                        .into_iter()
                        .find(|property| property.id == action);

                    return match matched {
                        Some(property) => CommandOutcome::new(
                            device_key,
                            CommandStatus::Success,
                            true,
                            "查询成功，已收到设备响应",
                            Some(property.value),
                        ),
                        None => CommandOutcome::new(
                            device_key,
                            CommandStatus::Warning,
                            true,
                            "查询成功，但设备未返回目标属性值",
                            None,
                        ),
                    };
                }
            }
        }
    }
}
