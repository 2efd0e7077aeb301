use clap::{Parser, Subcommand};

impl Cli {
    /// 解析命令行参数
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// 获取日志级别（--dev 时默认 debug）
    pub fn get_log_level(&self) -> Option<String> {
        if let Some(level) = &self.log_level {
            return Some(level.clone());
        }
        if self.dev {
            return Some("debug".to_string());
        }
        None
    }

    /// 获取日志格式（--dev 时默认 pretty）
    pub fn get_log_format(&self) -> Option<String> {
        if let Some(format) = &self.log_format {
            return Some(format.clone());
        }
        if self.dev {
            return Some("pretty".to_string());
        }
        None
    }
}

/// IoT 设备协议网关
#[derive(Parser, Debug)]
#[command(name = "iotgate")]
#[command(version)]
#[command(about = "IoT 设备协议网关：令牌生命周期 + 设备指令收发", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", help = "指定配置文件路径")]
    pub config_file: Option<String>,

    /// 监听地址
    #[arg(long, value_name = "ADDRESS", help = "服务监听地址")]
    pub host: Option<String>,

    /// 监听端口
    #[arg(long, value_name = "PORT", help = "服务监听端口")]
    pub port: Option<u16>,

    /// 最大并发会话数
    #[arg(long, value_name = "NUM", help = "最大并发会话数")]
    pub max_sessions: Option<usize>,

    /// Redis 连接 URL
    #[arg(long, value_name = "URL", help = "Redis 连接字符串")]
    pub redis_url: Option<String>,

    /// 应用签名密钥
    #[arg(long, value_name = "SECRET", help = "跨设备授权请求的 HMAC 密钥")]
    pub app_secret: Option<String>,

    /// 日志级别
    #[arg(
        long,
        value_name = "LEVEL",
        help = "日志级别: trace, debug, info, warn, error"
    )]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", help = "日志格式: pretty, json, compact")]
    pub log_format: Option<String>,

    /// 日志文件路径
    #[arg(long, value_name = "PATH", help = "日志输出文件路径")]
    pub log_file: Option<String>,

    /// 静默模式（只输出错误）
    #[arg(short, long, help = "静默模式")]
    pub quiet: bool,

    /// 开发模式
    #[arg(long, help = "开发模式（debug 日志 + pretty 输出）")]
    pub dev: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// 子命令
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成默认配置文件
    GenerateConfig {
        /// 输出路径
        #[arg(default_value = "config.toml")]
        path: String,
    },
    /// 显示生效的配置
    ShowConfig,
}
