//! 工具调用请求与结果
//!
//! ToolCallRequest 由推理服务响应产生，ToolRouter 消费一次；每个请求恰好对应一个 ToolResult。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 一次工具调用请求：工具名 + JSON 参数 + 用于关联结果的 id
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// 工具调用的结局
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok,
    Error,
    Timeout,
    UnknownTool,
    /// 进程级资源耗尽（如数据库连接池不可用），会终止会话
    ResourceExhausted,
}

impl ToolOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::UnknownTool => "unknown_tool",
            Self::ResourceExhausted => "resource_exhausted",
        }
    }
}

/// 工具调用结果；payload 为成功时的内容或失败原因
#[derive(Clone, Debug)]
pub struct ToolResult {
    pub request_id: String,
    pub tool: String,
    pub outcome: ToolOutcome,
    pub payload: String,
    pub elapsed: Duration,
}

impl ToolResult {
    pub fn success(&self) -> bool {
        self.outcome == ToolOutcome::Ok
    }
}
