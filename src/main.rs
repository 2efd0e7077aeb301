use anyhow::{Context, Result};
use iotgate::{
    cli::{Cli, Commands},
    config::{self, GatewayConfig},
    logging,
    server::GatewayServer,
};
use std::process;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(command) = &cli.command {
        match command {
            Commands::GenerateConfig { path } => {
                return generate_config(path);
            }
            Commands::ShowConfig => {
                return show_config(&cli);
            }
        }
    }

    // 快速读取 config.toml 的 [logging] 段（不加载完整配置）
    let early_log = config::load_early_logging_config(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > config.toml > 默认值）
    let log_level = cli
        .get_log_level()
        .or(early_log.level)
        .unwrap_or_else(|| "info".to_string());
    let log_format = cli.get_log_format().or(early_log.format);
    let log_file = cli.log_file.as_deref().or(early_log.file.as_deref());

    let _log_guard = logging::init_logging(&log_level, log_format.as_deref(), log_file, cli.quiet)?;

    tracing::info!("🚀 iotgate starting...");

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = GatewayConfig::load(&cli).context("加载配置失败")?;

    if cli.dev {
        tracing::info!("🔧 开发模式已启用");
    }

    // 显示配置信息
    tracing::info!("📊 Gateway Configuration:");
    tracing::info!("  - Name: {}", config.name);
    tracing::info!("  - Listen: {}:{}", config.host, config.port);
    tracing::info!("  - Max Sessions: {}", config.max_sessions);
    tracing::info!("  - Session Timeout: {}s", config.session_timeout_secs);
    tracing::info!("  - Query Timeout: {}ms", config.query_timeout_ms);
    tracing::info!("  - Redis: {}", config.redis.is_some());
    tracing::info!("  - Audit Dir: {}", config.audit_dir);
    tracing::info!("  - Log Level: {}", config.log_level);

    // 创建网关
    let server = match GatewayServer::new(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("❌ 网关初始化失败: {}", e);
            tracing::error!("💡 请检查 Redis 配置和审计目录权限后重试");
            process::exit(1);
        }
    };

    // 运行网关
    if let Err(e) = server.run().await {
        tracing::error!("❌ 网关运行失败: {}", e);
        process::exit(1);
    }

    Ok(())
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    let default_config = r#"# iotgate 配置文件
# 此文件由 iotgate generate-config 生成

[server]
name = "iotgate"
host = "127.0.0.1"
port = 9090
app_secret = "change_me"

[session]
max_sessions = 100
timeout_secs = 300
sweep_interval_secs = 60

[token]
access_ttl_secs = 3600
refresh_ttl_secs = 604800

[gateway]
query_timeout_ms = 5000
audit_dir = "./logs"
device_cache_capacity = 1024
device_cache_ttl_secs = 300

# [redis]
# url = "redis://127.0.0.1:6379/0"
# pool_size = 16

[logging]
level = "info"
format = "compact"
# file = "./logs/iotgate.log"
"#;

    std::fs::write(path, default_config).with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 显示生效的配置
fn show_config(cli: &Cli) -> Result<()> {
    let config = GatewayConfig::load(cli)?;

    println!("📊 生效配置:");
    println!("  - Name: {}", config.name);
    println!("  - Listen: {}:{}", config.host, config.port);
    println!("  - Max Sessions: {}", config.max_sessions);
    println!("  - Session Timeout: {}s", config.session_timeout_secs);
    println!("  - Query Timeout: {}ms", config.query_timeout_ms);
    println!(
        "  - Redis: {}",
        config
            .redis
            .as_ref()
            .map(|r| r.url.as_str())
            .unwrap_or("(memory store)")
    );
    println!("  - Audit Dir: {}", config.audit_dir);

    Ok(())
}
