use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

use crate::gateway::command::CommandStatus;

/// 一条审计记录
#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    device_key: &'a str,
    action: &'a str,
    value: &'a serde_json::Value,
    success: bool,
    status: CommandStatus,
    message: &'a str,
    timestamp: String,
}

/// 设备操作审计日志
///
/// 每个设备一个目录，按天滚动的 JSON 行文件，写入走
/// 非阻塞通道不占用请求路径。只追加，不回读。
pub struct AuditLog {
    dir: PathBuf,
    /// 设备 -> 写入端（guard 持有后台刷盘线程）
    writers: DashMap<String, (NonBlocking, WorkerGuard)>,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writers: DashMap::new(),
        }
    }

    /// 设备 key 用作目录名，滤掉路径分隔等字符
    fn sanitize(device_key: &str) -> String {
        device_key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn writer_for(&self, device_key: &str) -> NonBlocking {
        let safe_key = Self::sanitize(device_key);
        let entry = self.writers.entry(safe_key.clone()).or_insert_with(|| {
            let appender = tracing_appender::rolling::daily(self.dir.join(&safe_key), "audit.log");
            tracing_appender::non_blocking(appender)
        });
        entry.0.clone()
    }

    /// 记录一次设备操作
    pub fn record(
        &self,
        device_key: &str,
        action: &str,
        value: &serde_json::Value,
        status: CommandStatus,
        success: bool,
        message: &str,
    ) {
        let entry = AuditEntry {
            device_key,
            action,
            value,
            success,
            status,
            message,
            timestamp: Utc::now().to_rfc3339(),
        };

        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                warn!("⚠️ 审计记录序列化失败: {}", e);
                return;
            }
        };

        let mut writer = self.writer_for(device_key);
        if let Err(e) = writeln!(writer, "{}", line) {
            warn!("⚠️ 审计日志写入失败: device={}, err={}", device_key, e);
        }
    }
}
