//! 推理服务抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：
//! - complete：纯文本补全（SQL 生成者 / 审查者使用）
//! - complete_with_tools：带工具目录的补全，返回最终回复或一批工具调用（Orchestrator 使用）

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Turn;
use crate::tools::{ToolCallRequest, ToolSchema};

/// 推理服务边界上的错误；is_transient 决定是否由重试包装器重试
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("network error: {0}")]
    Network(String),

    /// 服务端 5xx
    #[error("service error {status}: {message}")]
    Server { status: u16, message: String },

    /// 既不是最终回复也不是工具调用，按瞬时错误处理
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// 4xx 等确定性失败，不重试
    #[error("request rejected: {0}")]
    InvalidRequest(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<LlmError> },
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout
                | LlmError::RateLimited { .. }
                | LlmError::Network(_)
                | LlmError::Server { .. }
                | LlmError::MalformedResponse(_)
        )
    }
}

/// 推理服务的一次响应：最终回复，或一批非空的工具调用
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    FinalAnswer(String),
    ToolCalls(Vec<ToolCallRequest>),
}

impl ModelResponse {
    /// 由原始 content 与 tool_calls 组装；两者皆空视为格式错误
    pub fn from_parts(
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Result<Self, LlmError> {
        if !tool_calls.is_empty() {
            return Ok(ModelResponse::ToolCalls(tool_calls));
        }
        match content {
            Some(text) if !text.trim().is_empty() => Ok(ModelResponse::FinalAnswer(text)),
            _ => Err(LlmError::MalformedResponse(
                "response carried neither an answer nor tool calls".to_string(),
            )),
        }
    }
}

/// 推理服务客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 纯文本补全
    async fn complete(&self, messages: &[Turn]) -> Result<String, LlmError>;

    /// 带工具目录的补全；tools 为空时服务只能给出最终回复
    async fn complete_with_tools(
        &self,
        messages: &[Turn],
        tools: &[ToolSchema],
    ) -> Result<ModelResponse, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
