//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定向用户致歉、尽力回答或终止会话。
//! 只有 ResourceExhausted 会终止会话，其余错误都降级为一条 assistant 回复或一条失败的 ToolResult。

use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;

/// 编排过程中可能出现的错误（推理服务、校验、执行、路由、预算、配置、资源）
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    /// 网络 / 超时 / 限流类错误，重试耗尽后仍失败
    #[error("reasoning service unavailable: {0}")]
    TransientService(LlmError),

    /// 推理服务明确拒绝（参数、鉴权等），不重试
    #[error("reasoning service rejected the request: {0}")]
    Service(LlmError),

    /// 查询未通过安全 / 形状校验（转为反思反馈，不直接展示给用户）
    #[error("query validation failed: {0}")]
    Validation(String),

    /// 数据源或索引执行失败
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("unrecognized tool: {0}")]
    UnknownTool(String),

    #[error("tool '{tool}' timed out after {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// 轮次或尝试次数预算耗尽（降级为尽力回答）
    #[error("{what} budget of {limit} exhausted")]
    BudgetExceeded { what: &'static str, limit: u32 },

    #[error("config error: {0}")]
    ConfigError(String),

    /// 进程级资源耗尽（如无法获取数据库连接池），终止会话
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RetriesExhausted { .. } => AgentError::TransientService(err),
            e if e.is_transient() => AgentError::TransientService(e),
            e => AgentError::Service(e),
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 写入一条致歉回复，会话继续
    Apologize(String),
    /// 用已收集的工具结果给出尽力回答
    BestEffort,
    /// 终止当前会话
    Abort,
}
