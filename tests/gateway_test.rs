//! 网关端到端场景测试
//!
//! 用内存存储 + 进程内消息代理搭建完整组件链，
//! 再起一个假设备任务扮演响应方。

use std::sync::Arc;
use std::time::Duration;

use iotgate::auth::{TokenManager, ACCESS_TOKEN_TTL_SECS};
use iotgate::device::{DeviceAuthorizationGraph, DeviceDirectory, DeviceInfo, GrantStatus};
use iotgate::gateway::{ActionRateLimiter, AuditLog, CommandGateway, CommandStatus};
use iotgate::infra::{KvStore, LocalBroker, MemoryStore, MessageBroker};

struct Harness {
    broker: Arc<LocalBroker>,
    token_manager: Arc<TokenManager>,
    authorization: Arc<DeviceAuthorizationGraph>,
    directory: Arc<DeviceDirectory>,
    gateway: CommandGateway,
    audit_dir: std::path::PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.audit_dir).ok();
    }
}

fn harness(query_timeout_ms: u64) -> Harness {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let broker = Arc::new(LocalBroker::new());
    let token_manager = Arc::new(TokenManager::new(store.clone()));
    let authorization = Arc::new(DeviceAuthorizationGraph::new());
    let directory = Arc::new(DeviceDirectory::new(store.clone(), 16, 60));
    let audit_dir = std::env::temp_dir().join(format!("iotgate-e2e-{}", uuid::Uuid::new_v4()));

    let gateway = CommandGateway::new(
        token_manager.clone(),
        authorization.clone(),
        directory.clone(),
        ActionRateLimiter::new(store),
        broker.clone(),
        Arc::new(AuditLog::new(&audit_dir)),
        Duration::from_millis(query_timeout_ms),
    );

    Harness {
        broker,
        token_manager,
        authorization,
        directory,
        gateway,
        audit_dir,
    }
}

async fn register_device(harness: &Harness, device_key: &str) {
    harness
        .directory
        .save(&DeviceInfo {
            device_key: device_key.to_string(),
            mac: "AA:BB:CC:DD:EE:FF".to_string(),
            product_key: "pk-1".to_string(),
            product_version: "1.0".to_string(),
            name: None,
        })
        .await
        .unwrap();
}

async fn access_token(harness: &Harness, device_key: &str) -> String {
    harness
        .token_manager
        .issue_access_token(device_key, None, ACCESS_TOKEN_TTL_SECS)
        .await
        .unwrap()
        .token
}

/// 扮演设备：监听指令主题，按脚本回发上报
///
/// reply 返回 None 时保持沉默（设备不响应）
async fn spawn_device(
    harness: &Harness,
    device_key: &str,
    delay: Duration,
    reply: impl Fn(&str) -> Option<serde_json::Value> + Send + 'static,
) {
    let command_topic = format!("iot/pk-1/{}/command", device_key);
    let report_topic = format!("iot/pk-1/{}/report", device_key);

    // 先订阅再返回，保证设备不会漏掉后续指令
    let mut rx = harness.broker.subscribe(&command_topic, 1).await.unwrap();
    let broker = harness.broker.clone();

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let command: serde_json::Value = match serde_json::from_slice(&message.payload) {
                Ok(command) => command,
                Err(_) => continue,
            };
            let trace_id = command["header"]["traceId"].as_str().unwrap_or("").to_string();

            if let Some(body) = reply(&trace_id) {
                tokio::time::sleep(delay).await;
                broker
                    .publish(
                        &report_topic,
                        &serde_json::to_vec(&body).unwrap(),
                        1,
                        false,
                    )
                    .await
                    .ok();
            }
        }
    });
}

fn report_with(trace_id: &str, properties: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "header": { "traceId": trace_id, "timestamp": 0 },
        "body": { "properties": properties }
    })
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

// ---------------------------------------------------------------
// 场景 A：令牌轮换
// ---------------------------------------------------------------

#[tokio::test]
async fn scenario_a_token_rotation_end_to_end() {
    let harness = harness(5000);
    register_device(&harness, "d1").await;

    let t1 = access_token(&harness, "d1").await;
    assert!(harness.token_manager.validate(&t1).await.unwrap().is_some());

    // 再次申请后旧令牌失效，新令牌生效
    let t2 = access_token(&harness, "d1").await;
    assert!(harness.token_manager.validate(&t1).await.unwrap().is_none());
    assert!(harness.token_manager.validate(&t2).await.unwrap().is_some());
}

// ---------------------------------------------------------------
// 场景 B：授权窗口控制跨设备操作
// ---------------------------------------------------------------

#[tokio::test]
async fn scenario_b_grant_window_gates_cross_device_control() {
    let harness = harness(5000);
    register_device(&harness, "d1").await;
    register_device(&harness, "d2").await;

    let caller_token = access_token(&harness, "d2").await;

    // d1 授权 d2，窗口未过期：d2 操作 d1 成功
    harness
        .authorization
        .grant("d1", "d2", now_secs(), now_secs() + 3600, GrantStatus::Active);

    let outcome = harness
        .gateway
        .control(&caller_token, "d1", "switch_1", &serde_json::json!(1))
        .await;
    assert!(outcome.success);
    assert_eq!(outcome.status, CommandStatus::Success);

    // 窗口改为已过期：同一调用被拒（授权检查先于频控）
    harness
        .authorization
        .grant("d1", "d2", now_secs() - 3600, now_secs() - 1, GrantStatus::Active);

    let outcome = harness
        .gateway
        .control(&caller_token, "d1", "switch_1", &serde_json::json!(1))
        .await;
    assert!(!outcome.success);
    assert_eq!(outcome.status, CommandStatus::Unauthorized);
}

#[tokio::test]
async fn control_without_valid_token_is_unauthorized() {
    let harness = harness(5000);
    register_device(&harness, "d1").await;

    let outcome = harness
        .gateway
        .control("no-such-token", "d1", "switch_1", &serde_json::json!(1))
        .await;
    assert_eq!(outcome.status, CommandStatus::Unauthorized);
}

#[tokio::test]
async fn control_on_unknown_device_fails() {
    let harness = harness(5000);
    register_device(&harness, "d1").await;
    let token = access_token(&harness, "d1").await;

    // 令牌属于 d1 但目标设备没有投影
    harness
        .authorization
        .grant("ghost", "d1", 0, 0, GrantStatus::Active);

    let outcome = harness
        .gateway
        .control(&token, "ghost", "switch_1", &serde_json::json!(1))
        .await;
    assert_eq!(outcome.status, CommandStatus::DeviceNotFound);
}

// ---------------------------------------------------------------
// 场景 C：查询超时，迟到的上报被忽略
// ---------------------------------------------------------------

#[tokio::test]
async fn scenario_c_late_reply_after_timeout_is_ignored() {
    let harness = harness(200);
    register_device(&harness, "d1").await;
    let token = access_token(&harness, "d1").await;

    // 设备 600ms 后才响应，超时窗口只有 200ms
    spawn_device(&harness, "d1", Duration::from_millis(600), |trace_id| {
        Some(report_with(
            trace_id,
            serde_json::json!([{ "id": "temp", "value": 25 }]),
        ))
    })
    .await;

    let outcome = harness
        .gateway
        .query(&token, "d1", "temp", &serde_json::json!(0))
        .await;
    assert!(!outcome.success);
    assert_eq!(outcome.status, CommandStatus::Timeout);

    // 等迟到的上报真正发出：订阅已移除，消息落空，不影响任何状态
    tokio::time::sleep(Duration::from_millis(600)).await;
}

#[tokio::test]
async fn query_resolves_with_matching_report() {
    let harness = harness(2000);
    register_device(&harness, "d1").await;
    let token = access_token(&harness, "d1").await;

    spawn_device(&harness, "d1", Duration::from_millis(20), |trace_id| {
        Some(report_with(
            trace_id,
            serde_json::json!([
                { "id": "humidity", "value": 60 },
                { "id": "temp", "value": 25 }
            ]),
        ))
    })
    .await;

    let outcome = harness
        .gateway
        .query(&token, "d1", "temp", &serde_json::json!(0))
        .await;
    assert!(outcome.success);
    assert_eq!(outcome.status, CommandStatus::Success);
    assert_eq!(outcome.data, Some(serde_json::json!(25)));
}

#[tokio::test]
async fn query_with_mismatched_correlation_id_times_out() {
    let harness = harness(300);
    register_device(&harness, "d1").await;
    let token = access_token(&harness, "d1").await;

    // 设备回了别的查询的关联 id：必须被忽略而不是错误匹配
    spawn_device(&harness, "d1", Duration::from_millis(20), |_trace_id| {
        Some(report_with(
            "XXXXXXXX",
            serde_json::json!([{ "id": "temp", "value": 25 }]),
        ))
    })
    .await;

    let outcome = harness
        .gateway
        .query(&token, "d1", "temp", &serde_json::json!(0))
        .await;
    assert_eq!(outcome.status, CommandStatus::Timeout);
}

#[tokio::test]
async fn query_reports_warning_when_property_missing() {
    let harness = harness(2000);
    register_device(&harness, "d1").await;
    let token = access_token(&harness, "d1").await;

    spawn_device(&harness, "d1", Duration::from_millis(20), |trace_id| {
        Some(report_with(
            trace_id,
            serde_json::json!([{ "id": "humidity", "value": 60 }]),
        ))
    })
    .await;

    let outcome = harness
        .gateway
        .query(&token, "d1", "temp", &serde_json::json!(0))
        .await;
    assert!(outcome.success);
    assert_eq!(outcome.status, CommandStatus::Warning);
    assert_eq!(outcome.data, None);
}

#[tokio::test]
async fn query_with_unparseable_report_is_protocol_error() {
    let harness = harness(2000);
    register_device(&harness, "d1").await;
    let token = access_token(&harness, "d1").await;

    spawn_device(&harness, "d1", Duration::from_millis(20), |_trace_id| {
        Some(serde_json::json!("not an object at all"))
    })
    .await;

    let outcome = harness
        .gateway
        .query(&token, "d1", "temp", &serde_json::json!(0))
        .await;
    assert!(!outcome.success);
    assert_eq!(outcome.status, CommandStatus::ProtocolError);
}

#[tokio::test]
async fn repeated_queries_do_not_leak_subscriptions() {
    let harness = harness(2000);
    register_device(&harness, "d1").await;
    let token = access_token(&harness, "d1").await;

    spawn_device(&harness, "d1", Duration::from_millis(10), |trace_id| {
        Some(report_with(
            trace_id,
            serde_json::json!([
                { "id": "temp", "value": 25 },
                { "id": "humidity", "value": 60 }
            ]),
        ))
    })
    .await;

    // 每次查询结束订阅都被移除，下一次查询重新订阅仍然正常
    for action in ["temp", "humidity"] {
        let outcome = harness
            .gateway
            .query(&token, "d1", action, &serde_json::json!(0))
            .await;
        assert!(outcome.success, "query for {} failed", action);
    }
}

// ---------------------------------------------------------------
// 场景 D：同 (设备, 动作) 1 秒内的第二次操作被频控
// ---------------------------------------------------------------

#[tokio::test]
async fn scenario_d_second_control_within_window_is_rate_limited() {
    let harness = harness(5000);
    register_device(&harness, "d1").await;
    let token = access_token(&harness, "d1").await;

    let first = harness
        .gateway
        .control(&token, "d1", "switch_1", &serde_json::json!(1))
        .await;
    assert_eq!(first.status, CommandStatus::Success);

    let second = harness
        .gateway
        .control(&token, "d1", "switch_1", &serde_json::json!(0))
        .await;
    assert!(!second.success);
    assert_eq!(second.status, CommandStatus::RateLimited);

    // 不同动作不受影响
    let other = harness
        .gateway
        .control(&token, "d1", "switch_2", &serde_json::json!(1))
        .await;
    assert_eq!(other.status, CommandStatus::Success);
}
