//! 工具路由器
//!
//! 一批请求全部并发执行，各自独立超时；结果按请求顺序返回，数量与请求一致。
//! 未知工具、超时、执行失败都变成失败的 ToolResult，不会中断整批。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::time::timeout;

use crate::core::events::{send_event, AgentEvent, EventSender};
use crate::core::AgentError;
use crate::tools::{ToolCallRequest, ToolOutcome, ToolRegistry, ToolResult, ToolSchema};

/// 工具路由器：持有注册表与单次调用超时；无状态，不跨调用持锁
pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    events: Option<EventSender>,
}

impl ToolRouter {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }

    /// 并发执行一批调用，结果顺序与 requests 一致
    pub async fn dispatch(&self, requests: Vec<ToolCallRequest>) -> Vec<ToolResult> {
        let handles: Vec<_> = requests
            .into_iter()
            .map(|req| {
                send_event(
                    &self.events,
                    AgentEvent::ToolCall {
                        id: req.id.clone(),
                        tool: req.name.clone(),
                        args: req.arguments.clone(),
                    },
                );
                let id = req.id.clone();
                let name = req.name.clone();
                let registry = Arc::clone(&self.registry);
                let limit = self.timeout;
                let handle = tokio::spawn(run_one(registry, req, limit));
                (id, name, handle)
            })
            .collect();

        let (meta, futures): (Vec<_>, Vec<_>) = handles
            .into_iter()
            .map(|(id, name, handle)| ((id, name), handle))
            .unzip();

        let joined = join_all(futures).await;

        meta.into_iter()
            .zip(joined)
            .map(|((id, name), joined)| {
                let result = joined.unwrap_or_else(|e| ToolResult {
                    request_id: id,
                    tool: name,
                    outcome: ToolOutcome::Error,
                    payload: format!("Error: tool task failed: {e}"),
                    elapsed: Duration::ZERO,
                });
                send_event(
                    &self.events,
                    AgentEvent::ToolFinished {
                        id: result.request_id.clone(),
                        tool: result.tool.clone(),
                        ok: result.success(),
                        elapsed_ms: result.elapsed.as_millis() as u64,
                    },
                );
                result
            })
            .collect()
    }
}

async fn run_one(registry: Arc<ToolRegistry>, req: ToolCallRequest, limit: Duration) -> ToolResult {
    let start = Instant::now();
    let preview = args_preview(&req.arguments);

    let (outcome, payload) = match registry.get(&req.name) {
        None => (
            ToolOutcome::UnknownTool,
            format!("Error: {}", AgentError::UnknownTool(req.name.clone())),
        ),
        Some(tool) => match timeout(limit, tool.execute(req.arguments)).await {
            Ok(Ok(content)) => (ToolOutcome::Ok, content),
            Ok(Err(AgentError::ResourceExhausted(msg))) => (ToolOutcome::ResourceExhausted, msg),
            Ok(Err(e)) => (ToolOutcome::Error, format!("Error executing {}: {}", req.name, e)),
            Err(_) => (
                ToolOutcome::Timeout,
                format!(
                    "Error: {}",
                    AgentError::ToolTimeout {
                        tool: req.name.clone(),
                        timeout: limit,
                    }
                ),
            ),
        },
    };

    let elapsed = start.elapsed();
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": req.name,
        "request_id": req.id,
        "ok": outcome == ToolOutcome::Ok,
        "outcome": outcome.as_str(),
        "duration_ms": elapsed.as_millis() as u64,
        "args_preview": preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");

    ToolResult {
        request_id: req.id,
        tool: req.name,
        outcome,
        payload,
        elapsed,
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
