//! Mock 推理服务（用于测试与无 API Key 的本地运行）
//!
//! 默认行为：complete_with_tools 回显最后一条 User 消息作为最终回复，complete 同样回显。
//! 测试中用 on_chat / on_complete 注入闭包，按上下文决定返回工具调用、回复或错误。

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, ModelResponse};
use crate::memory::{Role, Turn};
use crate::tools::ToolSchema;

type ChatFn = dyn Fn(&[Turn], &[ToolSchema]) -> Result<ModelResponse, LlmError> + Send + Sync;
type CompleteFn = dyn Fn(&[Turn]) -> Result<String, LlmError> + Send + Sync;

/// Mock 客户端：行为由闭包决定，并统计调用次数
pub struct MockLlmClient {
    chat: Box<ChatFn>,
    complete: Box<CompleteFn>,
    chat_calls: AtomicUsize,
    complete_calls: AtomicUsize,
}

fn last_user(messages: &[Turn]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)")
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self {
            chat: Box::new(|messages, _| {
                Ok(ModelResponse::FinalAnswer(format!(
                    "Echo from Mock: {}",
                    last_user(messages)
                )))
            }),
            complete: Box::new(|messages| Ok(format!("Echo from Mock: {}", last_user(messages)))),
            chat_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
        }
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 替换 complete_with_tools 的行为
    pub fn on_chat<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Turn], &[ToolSchema]) -> Result<ModelResponse, LlmError> + Send + Sync + 'static,
    {
        self.chat = Box::new(f);
        self
    }

    /// 替换 complete 的行为
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Turn]) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        self.complete = Box::new(f);
        self
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Turn]) -> Result<String, LlmError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        (self.complete)(messages)
    }

    async fn complete_with_tools(
        &self,
        messages: &[Turn],
        tools: &[ToolSchema],
    ) -> Result<ModelResponse, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        (self.chat)(messages, tools)
    }
}
