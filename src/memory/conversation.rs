//! 短期记忆：对话历史（Conversation Manager）
//!
//! 保留最近 N 条 turn，超出时按「交换单元」从最旧处剪枝：一条 User turn 与其后所有
//! assistant / 工具调用 / 工具结果一起删除，不会留下找不到请求的工具结果。
//! 刚追加的一批只有在更早的内容都已剪掉后才会被截断。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::tools::{ToolCallRequest, ToolResult};

/// 窗口下限：至少容纳一条 user 与一条 assistant
pub const MIN_CONTEXT_TURNS: usize = 2;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 单条 turn；追加后内容不再修改
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// assistant 发起的工具调用（仅 Assistant）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// 对应的工具调用 id（仅 Tool）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Turn {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// 推理服务请求的一批工具调用
    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Self::tool(result.request_id.clone(), result.payload.clone())
    }
}

/// 对话历史：有序、只追加，受 max_turns 约束
#[derive(Clone, Debug)]
pub struct ConversationManager {
    turns: Vec<Turn>,
    max_turns: usize,
}

impl ConversationManager {
    pub fn new(max_turns: usize) -> Result<Self, AgentError> {
        if max_turns < MIN_CONTEXT_TURNS {
            return Err(AgentError::ConfigError(format!(
                "conversation window must hold at least {MIN_CONTEXT_TURNS} turns, got {max_turns}"
            )));
        }
        Ok(Self {
            turns: Vec::new(),
            max_turns,
        })
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.prune(1);
    }

    /// 一次追加多条（如一整批工具结果），全部写入后再剪枝
    pub fn append_all(&mut self, turns: impl IntoIterator<Item = Turn>) {
        let before = self.turns.len();
        self.turns.extend(turns);
        let added = self.turns.len() - before;
        self.prune(added);
    }

    /// 下一次请求可用的上下文
    pub fn context(&self) -> &[Turn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// 末尾 fresh 条是刚追加的，先剪更早的内容；只剩它们时才截断本批
    fn prune(&mut self, mut fresh: usize) {
        while self.turns.len() > self.max_turns {
            fresh = fresh.min(self.turns.len());
            let protected_from = self.turns.len() - fresh;
            let next_user = self
                .turns
                .iter()
                .skip(1)
                .position(|t| t.role == Role::User)
                .map(|p| p + 1);
            // 多个交换单元：整体丢弃最旧的一个
            if let Some(idx) = next_user.filter(|&idx| idx <= protected_from) {
                self.turns.drain(..idx);
                continue;
            }

            let start = usize::from(self.turns[0].role == Role::User);
            if start < protected_from {
                // 保留开头的 user，丢弃最旧的 assistant 及其工具结果
                let mut end = start + 1;
                while end < self.turns.len() && self.turns[end].role == Role::Tool {
                    end += 1;
                }
                self.turns.drain(start..end);
                fresh -= end.saturating_sub(protected_from).min(fresh);
            } else if self.turns[start].tool_calls.is_empty() {
                self.turns.remove(start);
                fresh = fresh.saturating_sub(1);
            } else {
                self.clamp_batch(start);
            }
        }
    }

    /// 单批工具结果本身超出窗口：保留 assistant 与能放下的前几条结果，
    /// 并从 assistant 的调用列表中去掉被丢弃的请求
    fn clamp_batch(&mut self, mut start: usize) {
        if self.max_turns - start < MIN_CONTEXT_TURNS {
            self.turns.drain(..start);
            start = 0;
        }
        let before = self.turns.len();
        let keep = self.max_turns - start - 1;
        self.turns.truncate(start + 1 + keep);
        let kept: HashSet<String> = self.turns[start + 1..]
            .iter()
            .filter_map(|t| t.tool_call_id.clone())
            .collect();
        self.turns[start].tool_calls.retain(|c| kept.contains(&c.id));
        tracing::warn!(
            dropped = before - self.turns.len(),
            window = self.max_turns,
            "tool batch larger than the conversation window, keeping the first results"
        );
    }
}
