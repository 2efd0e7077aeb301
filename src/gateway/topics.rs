//! 设备主题推导
//!
//! 主题由产品与设备标识确定性拼出，具体的主题规划属于部署
//! 约定，集中在这里便于整体替换。

/// 下行指令主题（网关发布）
pub fn command_topic(product_key: &str, device_key: &str) -> String {
    format!("iot/{}/{}/command", product_key, device_key)
}

/// 上行上报主题（网关订阅）
pub fn report_topic(product_key: &str, device_key: &str) -> String {
    format!("iot/{}/{}/report", product_key, device_key)
}
