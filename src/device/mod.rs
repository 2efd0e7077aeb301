pub mod authorization;
pub mod directory;
pub mod toolset;

pub use authorization::{AuthorizationGrant, DeviceAuthorizationGraph, GrantStatus};
pub use directory::DeviceDirectory;
pub use toolset::{ToolMode, ToolSpec, Toolset, ValueType};

use serde::{Deserialize, Serialize};

/// 设备信息（目录投影）
///
/// 注册时从产品目录写入键值存储，网关只读这份投影，
/// 不直接访问目录库
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// 设备唯一标识
    pub device_key: String,
    /// MAC 地址
    pub mac: String,
    /// 产品唯一标识
    pub product_key: String,
    /// 产品版本
    pub product_version: String,
    /// 设备名称（展示用）
    #[serde(default)]
    pub name: Option<String>,
}
