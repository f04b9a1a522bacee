//! 编排过程事件：供交互界面展示工具调用与子 Agent 活动

use serde::Serialize;
use tokio::sync::mpsc;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 推理服务请求调用工具
    ToolCall {
        id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具调用结束
    ToolFinished {
        id: String,
        tool: String,
        ok: bool,
        elapsed_ms: u64,
    },
    /// 反思循环中的子 Agent 活动（generating / executing / reviewing）
    AgentActivity {
        agent: String,
        action: String,
        attempt: u32,
    },
    /// 预算耗尽，已降级
    BudgetExceeded { what: String, limit: u32 },
}

pub type EventSender = mpsc::UnboundedSender<AgentEvent>;

/// 有接收方时才发送；接收方已关闭则静默丢弃
pub fn send_event(tx: &Option<EventSender>, ev: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
