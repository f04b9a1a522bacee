//! 工具 Schema：名称、描述与 schemars 自动生成的参数 JSON Schema，随每次请求发送给推理服务

use schemars::{schema_for, JsonSchema};
use serde::Serialize;
use serde_json::Value;

/// 推理服务可见的工具目录项
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 由参数结构体生成 JSON Schema（去掉 `$schema` / `title`，只保留对象描述）
pub fn parameters_schema_for<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {} })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}
