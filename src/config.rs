use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// 网关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// 服务名称
    pub name: String,
    /// 监听地址（由传输层使用）
    pub host: String,
    /// 监听端口（由传输层使用）
    pub port: u16,
    /// 日志级别
    pub log_level: String,
    /// 最大并发会话数
    pub max_sessions: usize,
    /// 会话空闲超时（秒）
    pub session_timeout_secs: u64,
    /// 会话清理周期（秒）
    pub session_sweep_interval_secs: u64,
    /// 设备查询超时（毫秒）
    pub query_timeout_ms: u64,
    /// 访问令牌有效期（秒）
    pub access_token_ttl_secs: u64,
    /// 刷新令牌有效期（秒）
    pub refresh_token_ttl_secs: u64,
    /// 应用签名密钥（跨设备授权请求的 HMAC 密钥）
    pub app_secret: String,
    /// 设备审计日志目录
    pub audit_dir: String,
    /// 设备信息 L1 缓存容量
    pub device_cache_capacity: u64,
    /// 设备信息 L1 缓存有效期（秒）
    pub device_cache_ttl_secs: u64,
    /// Redis 配置（缺省时使用内存存储，仅适合单机/测试）
    pub redis: Option<RedisConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "iotgate".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9090,
            log_level: "info".to_string(),
            max_sessions: 100,
            session_timeout_secs: 300,
            session_sweep_interval_secs: 60,
            query_timeout_ms: 5000,
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 604800,
            app_secret: "change_me".to_string(),
            audit_dir: "./logs".to_string(),
            device_cache_capacity: 1024,
            device_cache_ttl_secs: 300,
            redis: None,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 配置文件加载
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| "配置文件格式错误")?;

        Ok(toml_config.into())
    }

    /// 从环境变量合并配置（IOTGATE_ 前缀）
    pub fn merge_from_env(&mut self) {
        if let Ok(host) = env::var("IOTGATE_HOST") {
            self.host = host;
        }
        if let Ok(port) = env::var("IOTGATE_PORT") {
            self.port = port.parse().unwrap_or(self.port);
        }
        if let Ok(log_level) = env::var("IOTGATE_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(max_sessions) = env::var("IOTGATE_MAX_SESSIONS") {
            self.max_sessions = max_sessions.parse().unwrap_or(self.max_sessions);
        }
        if let Ok(timeout) = env::var("IOTGATE_SESSION_TIMEOUT") {
            self.session_timeout_secs = timeout.parse().unwrap_or(self.session_timeout_secs);
        }
        if let Ok(secret) = env::var("IOTGATE_APP_SECRET") {
            self.app_secret = secret;
        }
        if let Ok(redis_url) = env::var("REDIS_URL") {
            self.redis = Some(RedisConfig {
                url: redis_url,
                ..RedisConfig::default()
            });
        }
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(max_sessions) = cli.max_sessions {
            self.max_sessions = max_sessions;
        }
        if let Some(redis_url) = &cli.redis_url {
            self.redis = Some(RedisConfig {
                url: redis_url.clone(),
                ..RedisConfig::default()
            });
        }
        if let Some(secret) = &cli.app_secret {
            self.app_secret = secret.clone();
        }
        if let Some(log_level) = cli.get_log_level() {
            self.log_level = log_level;
        }
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if let Some(config_file) = &cli.config_file {
            if Path::new(config_file).exists() {
                info!("📄 从配置文件加载: {}", config_file);
                Self::from_toml_file(config_file)?
            } else {
                tracing::warn!("⚠️ 配置文件不存在: {}", config_file);
                Self::new()
            }
        } else if Path::new("config.toml").exists() {
            info!("📄 从默认配置文件加载: config.toml");
            Self::from_toml_file("config.toml")?
        } else {
            Self::new()
        };

        config.merge_from_env();
        config.merge_from_cli(cli);

        Ok(config)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// 连接 URL
    pub url: String,
    /// 连接池大小
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// 最小空闲连接数
    #[serde(default = "default_min_idle")]
    pub min_idle: u32,
    /// 建立连接超时（秒）
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// 单条命令执行超时（毫秒）
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// 空闲连接回收时间（秒）
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_pool_size() -> u32 {
    16
}

fn default_min_idle() -> u32 {
    2
}

fn default_connection_timeout_secs() -> u64 {
    5
}

fn default_command_timeout_ms() -> u64 {
    1000
}

fn default_idle_timeout_secs() -> u64 {
    300
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            pool_size: default_pool_size(),
            min_idle: default_min_idle(),
            connection_timeout_secs: default_connection_timeout_secs(),
            command_timeout_ms: default_command_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl RedisConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// TOML 配置文件结构（用于反序列化）
#[derive(Debug, Deserialize)]
struct TomlConfig {
    server: Option<TomlServerConfig>,
    session: Option<TomlSessionConfig>,
    token: Option<TomlTokenConfig>,
    gateway: Option<TomlGatewayConfig>,
    redis: Option<RedisConfig>,
    logging: Option<TomlLoggingConfig>,
}

#[derive(Debug, Deserialize)]
struct TomlServerConfig {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    app_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlSessionConfig {
    max_sessions: Option<usize>,
    timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlTokenConfig {
    access_ttl_secs: Option<u64>,
    refresh_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlGatewayConfig {
    query_timeout_ms: Option<u64>,
    audit_dir: Option<String>,
    device_cache_capacity: Option<u64>,
    device_cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TomlLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

impl From<TomlConfig> for GatewayConfig {
    fn from(toml: TomlConfig) -> Self {
        let mut config = GatewayConfig::default();

        if let Some(server) = toml.server {
            if let Some(name) = server.name {
                config.name = name;
            }
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
            if let Some(secret) = server.app_secret {
                config.app_secret = secret;
            }
        }

        if let Some(session) = toml.session {
            if let Some(max) = session.max_sessions {
                config.max_sessions = max;
            }
            if let Some(timeout) = session.timeout_secs {
                config.session_timeout_secs = timeout;
            }
            if let Some(interval) = session.sweep_interval_secs {
                config.session_sweep_interval_secs = interval;
            }
        }

        if let Some(token) = toml.token {
            if let Some(ttl) = token.access_ttl_secs {
                config.access_token_ttl_secs = ttl;
            }
            if let Some(ttl) = token.refresh_ttl_secs {
                config.refresh_token_ttl_secs = ttl;
            }
        }

        if let Some(gateway) = toml.gateway {
            if let Some(timeout) = gateway.query_timeout_ms {
                config.query_timeout_ms = timeout;
            }
            if let Some(dir) = gateway.audit_dir {
                config.audit_dir = dir;
            }
            if let Some(capacity) = gateway.device_cache_capacity {
                config.device_cache_capacity = capacity;
            }
            if let Some(ttl) = gateway.device_cache_ttl_secs {
                config.device_cache_ttl_secs = ttl;
            }
        }

        if let Some(logging) = toml.logging {
            if let Some(level) = logging.level {
                config.log_level = level;
            }
        }

        config.redis = toml.redis;
        config
    }
}

/// 在完整配置加载前快速读取 config.toml 的 [logging] 段
///
/// 日志系统必须在配置加载之前初始化，否则加载过程中的日志会丢失
pub fn load_early_logging_config(config_file: Option<&str>) -> TomlLoggingConfig {
    let path = config_file.unwrap_or("config.toml");
    if !Path::new(path).exists() {
        return TomlLoggingConfig::default();
    }

    #[derive(Deserialize)]
    struct LoggingOnly {
        logging: Option<TomlLoggingConfig>,
    }

    fs::read_to_string(path)
        .ok()
        .and_then(|content| toml::from_str::<LoggingOnly>(&content).ok())
        .and_then(|c| c.logging)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_roundtrip() {
        let toml_str = r#"
[server]
name = "iotgate-test"
port = 9099
app_secret = "secret-1"

[session]
max_sessions = 8
timeout_secs = 60

[gateway]
query_timeout_ms = 1200
"#;
        let parsed: TomlConfig = toml::from_str(toml_str).unwrap();
        let config: GatewayConfig = parsed.into();

        assert_eq!(config.name, "iotgate-test");
        assert_eq!(config.port, 9099);
        assert_eq!(config.max_sessions, 8);
        assert_eq!(config.session_timeout_secs, 60);
        assert_eq!(config.query_timeout_ms, 1200);
        // 未配置的段保持默认值
        assert_eq!(config.access_token_ttl_secs, 3600);
        assert!(config.redis.is_none());
    }
}
