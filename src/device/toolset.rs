//! 会话工具表
//!
//! 按产品记录的工具列表构建的数据驱动表：工具名 -> 动作枚举、
//! 取值类型、收发模式。会话建立时构建一次，之后只做查表，
//! 不做动态分发。被授权设备的工具追加设备后缀避免重名。

use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;
use crate::error::Result;

/// 工具动作定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAction {
    /// 动作名
    pub name: String,
    /// 动作描述
    pub desc: String,
    /// 动作参数
    pub value: serde_json::Value,
}

/// 产品侧的工具定义（目录记录的原始形态）
#[derive(Debug, Clone, Deserialize)]
pub struct ProductToolDef {
    pub name: String,
    pub desc: String,
    /// 参数类型："string" 或 "number"
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,
    /// 收发模式："control" 或 "query"
    #[serde(default, rename = "actType")]
    pub act_type: Option<String>,
    #[serde(default)]
    pub actions: Vec<ToolAction>,
}

/// 工具收发模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMode {
    /// 控制：发布即完成
    Control,
    /// 查询：发布后等待设备上报
    Query,
}

/// 工具参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
}

/// 会话内可用的一个工具
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// 工具名（跨设备工具带 `_{device_key}` 后缀）
    pub name: String,
    /// 描述（带设备名前缀）
    pub desc: String,
    /// 目标设备
    pub target_device_key: String,
    /// 收发模式
    pub mode: ToolMode,
    /// 参数类型
    pub value_type: ValueType,
    /// 可用动作
    pub actions: Vec<ToolAction>,
}

impl ToolSpec {
    /// 去重后的动作名列表（保持出现顺序）
    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for action in &self.actions {
            if !names.contains(&action.name.as_str()) {
                names.push(&action.name);
            }
        }
        names
    }
}

/// 会话工具表
#[derive(Debug, Default)]
pub struct Toolset {
    tools: Vec<ToolSpec>,
}

impl Toolset {
    /// 从本设备的产品工具列表构建
    pub fn for_device(device: &DeviceInfo, tools_json: &str) -> Result<Self> {
        let mut toolset = Self { tools: Vec::new() };
        toolset.extend_from_product(device, tools_json, false)?;
        Ok(toolset)
    }

    /// 追加一个已授权设备的工具（工具名带设备后缀）
    pub fn add_granted_device(&mut self, device: &DeviceInfo, tools_json: &str) -> Result<usize> {
        self.extend_from_product(device, tools_json, true)
    }

    fn extend_from_product(
        &mut self,
        device: &DeviceInfo,
        tools_json: &str,
        with_suffix: bool,
    ) -> Result<usize> {
        let defs: Vec<ProductToolDef> = serde_json::from_str(tools_json)?;
        let mut added = 0;

        for def in defs {
            // 没有动作的工具不可调用，跳过
            if def.actions.is_empty() {
                continue;
            }

            let name = if with_suffix {
                format!("{}_{}", def.name, device.device_key)
            } else {
                def.name.clone()
            };

            let desc = match &device.name {
                Some(device_name) => format!("({}){}", device_name, def.desc),
                None => def.desc.clone(),
            };

            let mode = match def.act_type.as_deref() {
                Some("query") => ToolMode::Query,
                _ => ToolMode::Control,
            };

            let value_type = match def.value_type.as_deref() {
                Some("string") => ValueType::String,
                _ => ValueType::Number,
            };

            self.tools.push(ToolSpec {
                name,
                desc,
                target_device_key: device.device_key.clone(),
                mode,
                value_type,
                actions: def.actions,
            });
            added += 1;
        }

        Ok(added)
    }

    /// 按名字查找工具
    pub fn find(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWITCH_TOOLS: &str = r#"[
        {
            "name": "switch_1",
            "desc": "控制灯光开关",
            "type": "number",
            "actType": "control",
            "actions": [
                {"name": "switch_1", "desc": "开灯", "value": 1},
                {"name": "switch_1", "desc": "关灯", "value": 0}
            ]
        },
        {
            "name": "temp",
            "desc": "查询温度",
            "type": "number",
            "actType": "query",
            "actions": [
                {"name": "temp", "desc": "当前温度", "value": 0}
            ]
        },
        {
            "name": "noop",
            "desc": "没有动作的工具",
            "actions": []
        }
    ]"#;

    fn device(device_key: &str, name: Option<&str>) -> DeviceInfo {
        DeviceInfo {
            device_key: device_key.to_string(),
            mac: "AA:BB:CC:DD:EE:FF".to_string(),
            product_key: "pk-1".to_string(),
            product_version: "1.0".to_string(),
            name: name.map(|n| n.to_string()),
        }
    }

    #[test]
    fn test_build_from_product_tools() {
        let toolset = Toolset::for_device(&device("d1", Some("客厅灯")), SWITCH_TOOLS).unwrap();

        // 空动作的工具被跳过
        assert_eq!(toolset.len(), 2);

        let switch = toolset.find("switch_1").unwrap();
        assert_eq!(switch.mode, ToolMode::Control);
        assert_eq!(switch.value_type, ValueType::Number);
        assert_eq!(switch.target_device_key, "d1");
        assert_eq!(switch.desc, "(客厅灯)控制灯光开关");
        assert_eq!(switch.action_names(), vec!["switch_1"]);

        let temp = toolset.find("temp").unwrap();
        assert_eq!(temp.mode, ToolMode::Query);
    }

    #[test]
    fn test_granted_device_tools_are_suffixed() {
        let mut toolset = Toolset::for_device(&device("d1", None), SWITCH_TOOLS).unwrap();
        let added = toolset
            .add_granted_device(&device("d2", Some("卧室灯")), SWITCH_TOOLS)
            .unwrap();

        assert_eq!(added, 2);
        assert_eq!(toolset.len(), 4);

        // 本设备工具不带后缀，跨设备工具带后缀且指向对方设备
        assert_eq!(toolset.find("switch_1").unwrap().target_device_key, "d1");
        let granted = toolset.find("switch_1_d2").unwrap();
        assert_eq!(granted.target_device_key, "d2");
        assert_eq!(granted.desc, "(卧室灯)控制灯光开关");
    }

    #[test]
    fn test_malformed_tools_json_is_rejected() {
        let result = Toolset::for_device(&device("d1", None), "not json");
        assert!(result.is_err());
    }
}
