use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::auth::TokenManager;
use crate::config::GatewayConfig;
use crate::device::{DeviceAuthorizationGraph, DeviceDirectory};
use crate::error::Result;
use crate::gateway::{ActionRateLimiter, AuditLog, CommandGateway};
use crate::infra::{KvStore, LocalBroker, MemoryStore, MessageBroker, RedisClient};
use crate::service::{DeviceService, TokenService};
use crate::session::SessionManager;

/// 网关运行统计
#[derive(Debug, Clone)]
pub struct GatewayStats {
    pub active_sessions: usize,
    pub uptime_seconds: i64,
}

/// 网关服务器
///
/// 持有全部组件并负责装配：存储在最前，代理其次，
/// 四个核心组件在最后，与依赖方向一致。
pub struct GatewayServer {
    config: GatewayConfig,
    session_manager: Arc<SessionManager>,
    token_manager: Arc<TokenManager>,
    authorization: Arc<DeviceAuthorizationGraph>,
    directory: Arc<DeviceDirectory>,
    command_gateway: Arc<CommandGateway>,
    token_service: Arc<TokenService>,
    device_service: Arc<DeviceService>,
    started_at: DateTime<Utc>,
}

impl GatewayServer {
    /// 创建网关服务器（叶子组件先行）
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        info!("🔧 初始化网关组件...");

        // 1. 键值存储
        let store: Arc<dyn KvStore> = match &config.redis {
            Some(redis_config) => Arc::new(RedisClient::new(redis_config).await?),
            None => {
                warn!("⚠️ 未配置 Redis，使用内存存储（仅适合单机/测试）");
                Arc::new(MemoryStore::new())
            }
        };

        // 2. 消息代理（生产环境替换为真实代理的 MessageBroker 实现）
        let broker: Arc<dyn MessageBroker> = Arc::new(LocalBroker::new());

        // 3. 核心组件
        let token_manager = Arc::new(TokenManager::new(store.clone()));
        let session_manager = Arc::new(SessionManager::new(
            config.max_sessions,
            config.session_timeout_secs,
        ));
        let authorization = Arc::new(DeviceAuthorizationGraph::new());
        let directory = Arc::new(DeviceDirectory::new(
            store.clone(),
            config.device_cache_capacity,
            config.device_cache_ttl_secs,
        ));
        let rate_limiter = ActionRateLimiter::new(store.clone());
        let audit = Arc::new(AuditLog::new(&config.audit_dir));

        let command_gateway = Arc::new(CommandGateway::new(
            token_manager.clone(),
            authorization.clone(),
            directory.clone(),
            rate_limiter.clone(),
            broker,
            audit,
            config.query_timeout(),
        ));

        let token_service = Arc::new(TokenService::new(
            token_manager.clone(),
            directory.clone(),
            rate_limiter,
            config.access_token_ttl_secs,
            config.refresh_token_ttl_secs,
        ));

        let device_service = Arc::new(DeviceService::new(
            directory.clone(),
            authorization.clone(),
            token_manager.clone(),
            config.app_secret.clone(),
        ));

        info!("✅ 网关组件初始化完成");

        Ok(Self {
            config,
            session_manager,
            token_manager,
            authorization,
            directory,
            command_gateway,
            token_service,
            device_service,
            started_at: Utc::now(),
        })
    }

    /// 启动会话清理任务
    fn spawn_session_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let session_manager = self.session_manager.clone();
        let sweep_interval = Duration::from_secs(self.config.session_sweep_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            // 第一次 tick 立即完成，跳过
            ticker.tick().await;

            loop {
                ticker.tick().await;
                session_manager.cleanup_expired_sessions().await;
            }
        })
    }

    /// 运行网关直至收到退出信号
    pub async fn run(&self) -> Result<()> {
        let sweeper = self.spawn_session_sweeper();

        info!(
            "🚀 网关已就绪: name={}, max_sessions={}, query_timeout={}ms",
            self.config.name, self.config.max_sessions, self.config.query_timeout_ms
        );

        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("⚠️ 等待退出信号失败: {}", e);
        }

        info!("🛑 收到退出信号，网关关闭中...");
        sweeper.abort();

        Ok(())
    }

    /// 运行统计（供健康检查输出）
    pub async fn stats(&self) -> GatewayStats {
        GatewayStats {
            active_sessions: self.session_manager.active_session_count().await,
            uptime_seconds: Utc::now()
                .signed_duration_since(self.started_at)
                .num_seconds(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    pub fn token_manager(&self) -> &Arc<TokenManager> {
        &self.token_manager
    }

    pub fn authorization(&self) -> &Arc<DeviceAuthorizationGraph> {
        &self.authorization
    }

    pub fn directory(&self) -> &Arc<DeviceDirectory> {
        &self.directory
    }

    pub fn command_gateway(&self) -> &Arc<CommandGateway> {
        &self.command_gateway
    }

    pub fn token_service(&self) -> &Arc<TokenService> {
        &self.token_service
    }

    pub fn device_service(&self) -> &Arc<DeviceService> {
        &self.device_service
    }
}
