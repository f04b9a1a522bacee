//! Agent 编排器：主控循环
//!
//! 一条用户输入：追加到对话 → 调用推理服务 → 最终回复则写入并返回；工具调用则交给 ToolRouter 并发执行，
//! 结果按请求顺序追加后再次调用推理服务。每条输入的工具轮数有上限，超出后强制尽力回答。
//! 对话只经由 ConversationManager 修改；工具不接触对话状态。

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::core::events::{send_event, AgentEvent, EventSender};
use crate::core::{AgentError, OrchestratorPhase, RecoveryAction, RecoveryEngine};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, ModelResponse, OpenAiClient};
use crate::memory::{ConversationManager, Turn};
use crate::tools::{ToolCallRequest, ToolOutcome, ToolResult, ToolRouter};

/// 内置系统提示词：电商客服，只处理订单、商品与政策
pub const DEFAULT_INSTRUCTIONS: &str = "You are a customer support agent for an e-commerce company.

Your scope is limited to:
- Order inquiries (status, tracking, history)
- Product questions (stock, pricing, details)
- Company policies (returns, shipping, warranty)

Think step by step:
1. Understand what the customer is asking
2. Decide which tool(s) to use to get the information
3. Use the tools to retrieve accurate data
4. Provide a helpful, concise response based on the results

Guidelines:
- Always use tools to verify information before responding
- Never guess or make up data
- Be friendly, professional, and concise
- If the customer asks something outside your scope, politely redirect them to customer support topics
- Do not engage in general conversation, jokes, or off-topic discussions
- If you cannot find the requested information, acknowledge it and offer alternatives";

const BUDGET_NOTE: &str = "The tool budget for this question is exhausted. Answer the customer now \
using only the information already gathered above, and say so if something could not be verified.";

/// 从交互界面发往编排器的命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 提交用户输入
    Submit(String),
    /// 清空对话
    Clear,
    /// 退出
    Quit,
}

/// 编排器对命令的回应
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Answer(String),
    Cleared,
    /// 致命错误，会话已结束
    Fatal(String),
}

/// 会话对象：持有对话、路由器与推理服务客户端；一次只处理一条用户输入
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    router: ToolRouter,
    conversation: ConversationManager,
    recovery: RecoveryEngine,
    system_prompt: String,
    max_tool_rounds: u32,
    phase: OrchestratorPhase,
    events: Option<EventSender>,
}

impl Orchestrator {
    /// llm 应已包上重试（见 RetryingLlmClient）
    pub fn new(
        llm: Arc<dyn LlmClient>,
        router: ToolRouter,
        conversation: ConversationManager,
        system_prompt: impl Into<String>,
        max_tool_rounds: u32,
    ) -> Self {
        Self {
            llm,
            router,
            conversation,
            recovery: RecoveryEngine::new(),
            system_prompt: system_prompt.into(),
            max_tool_rounds,
            phase: OrchestratorPhase::AwaitingUserInput,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn phase(&self) -> OrchestratorPhase {
        self.phase
    }

    pub fn conversation(&self) -> &ConversationManager {
        &self.conversation
    }

    /// 推理服务累计 token：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 清空对话（会话重置）
    pub fn reset(&mut self) {
        self.conversation.clear();
        self.phase = OrchestratorPhase::AwaitingUserInput;
    }

    /// 处理一条用户输入，返回写入对话的 assistant 回复
    ///
    /// 只有 ResourceExhausted 会以 Err 返回（会话随之结束）；其余失败都降级为一条回复。
    pub async fn handle_user_turn(&mut self, input: &str) -> Result<String, AgentError> {
        self.conversation.append(Turn::user(input));
        let tools = self.router.schemas();
        let mut gathered: Vec<ToolResult> = Vec::new();
        let mut rounds = 0u32;

        loop {
            self.phase = OrchestratorPhase::CallingModel;
            let messages = self.prompt(&gathered, None);
            let response = match self.llm.complete_with_tools(&messages, &tools).await {
                Ok(r) => r,
                Err(e) => return self.degrade(AgentError::from(e), &gathered),
            };

            let calls = match response {
                ModelResponse::FinalAnswer(text) => return Ok(self.answer(text)),
                ModelResponse::ToolCalls(calls) => calls,
            };

            if rounds >= self.max_tool_rounds {
                return self.finish_over_budget(&gathered).await;
            }
            rounds += 1;

            self.phase = OrchestratorPhase::DispatchingTools;
            let calls = ensure_unique_ids(calls);
            tracing::info!(
                round = rounds,
                tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "dispatching tool calls"
            );
            let results = self.router.dispatch(calls.clone()).await;

            if let Some(fatal) = results
                .iter()
                .find(|r| r.outcome == ToolOutcome::ResourceExhausted)
            {
                tracing::error!(tool = %fatal.tool, error = %fatal.payload, "fatal resource exhaustion");
                self.phase = OrchestratorPhase::Done;
                return Err(AgentError::ResourceExhausted(fatal.payload.clone()));
            }

            let mut batch = Vec::with_capacity(results.len() + 1);
            batch.push(Turn::assistant_tool_calls(calls));
            batch.extend(results.iter().map(Turn::tool_result));
            self.conversation.append_all(batch);
            gathered.extend(results);
        }
    }

    /// 系统提示 + 对话上下文；本轮已收集但被窗口剪掉的工具结果以系统消息补上
    fn prompt(&self, gathered: &[ToolResult], note: Option<&str>) -> Vec<Turn> {
        let mut messages = Vec::with_capacity(self.conversation.len() + 3);
        messages.push(Turn::system(self.system_prompt.clone()));
        messages.extend_from_slice(self.conversation.context());
        if let Some(overflow) = self.overflow_note(gathered) {
            messages.push(Turn::system(overflow));
        }
        if let Some(n) = note {
            messages.push(Turn::system(n));
        }
        messages
    }

    fn overflow_note(&self, gathered: &[ToolResult]) -> Option<String> {
        let in_context: HashSet<&str> = self
            .conversation
            .context()
            .iter()
            .filter_map(|t| t.tool_call_id.as_deref())
            .collect();
        let missing: Vec<&ToolResult> = gathered
            .iter()
            .filter(|r| !in_context.contains(r.request_id.as_str()))
            .collect();
        if missing.is_empty() {
            return None;
        }
        let mut note = String::from(
            "Tool results gathered for this question that no longer fit in the conversation:",
        );
        for r in missing {
            note.push_str(&format!("\n- {} ({}): {}", r.tool, r.outcome.as_str(), r.payload));
        }
        Some(note)
    }

    fn answer(&mut self, text: String) -> String {
        self.phase = OrchestratorPhase::Answering;
        self.conversation.append(Turn::assistant(text.clone()));
        self.phase = OrchestratorPhase::AwaitingUserInput;
        text
    }

    /// 工具轮数耗尽：不带工具目录再问一次，仍拿不到回复则用已收集的结果拼一条
    async fn finish_over_budget(&mut self, gathered: &[ToolResult]) -> Result<String, AgentError> {
        let err = AgentError::BudgetExceeded {
            what: "tool rounds",
            limit: self.max_tool_rounds,
        };
        tracing::warn!(error = %err, "forcing a best-effort answer");
        send_event(
            &self.events,
            AgentEvent::BudgetExceeded {
                what: "tool rounds".to_string(),
                limit: self.max_tool_rounds,
            },
        );

        self.phase = OrchestratorPhase::CallingModel;
        let messages = self.prompt(gathered, Some(BUDGET_NOTE));
        match self.llm.complete_with_tools(&messages, &[]).await {
            Ok(ModelResponse::FinalAnswer(text)) => Ok(self.answer(text)),
            Ok(ModelResponse::ToolCalls(_)) => self.degrade(err, gathered),
            Err(e) => {
                tracing::warn!(error = %e, "best-effort answer request failed");
                self.degrade(err, gathered)
            }
        }
    }

    fn degrade(&mut self, err: AgentError, gathered: &[ToolResult]) -> Result<String, AgentError> {
        match self.recovery.handle(&err) {
            RecoveryAction::Apologize(msg) => {
                tracing::warn!(error = %err, "replying with an apology");
                Ok(self.answer(msg))
            }
            RecoveryAction::BestEffort => Ok(self.answer(best_effort_summary(gathered))),
            RecoveryAction::Abort => {
                self.phase = OrchestratorPhase::Done;
                Err(err)
            }
        }
    }
}

/// 由已收集的工具结果拼出的尽力回答
fn best_effort_summary(gathered: &[ToolResult]) -> String {
    let found: Vec<&ToolResult> = gathered.iter().filter(|r| r.success()).collect();
    if found.is_empty() {
        return "I'm sorry, I wasn't able to complete that request. Please try rephrasing your question."
            .to_string();
    }
    let mut out = String::from(
        "I wasn't able to finish working through your request, but here is what I found so far:",
    );
    for r in found {
        out.push_str("\n\n");
        out.push_str(&r.payload);
    }
    out
}

/// 空 id 或同批重复的 id 重新生成，保证每个结果只对应一个请求
fn ensure_unique_ids(calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .map(|mut c| {
            if c.id.trim().is_empty() || !seen.insert(c.id.clone()) {
                c.id = format!("call_{}", uuid::Uuid::new_v4().simple());
                seen.insert(c.id.clone());
            }
            c
        })
        .collect()
}

/// 按模型名创建推理服务客户端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_for_model(cfg: &AppConfig, model: &str) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_openai = std::env::var("OPENAI_API_KEY").is_ok();
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok() || (provider == "deepseek" && has_openai);

    if provider == "deepseek" && use_deepseek {
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(create_deepseek_client(Some(model)))
    } else if has_openai {
        tracing::info!("Using OpenAI-compatible LLM ({})", model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else if use_deepseek {
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(create_deepseek_client(Some(model)))
    } else {
        tracing::warn!("No API key set, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

/// 在后台任务中运行会话：消费命令，逐条回应；致命错误或 Quit 后结束并交还编排器
pub fn spawn_session(
    mut orchestrator: Orchestrator,
) -> (
    mpsc::UnboundedSender<Command>,
    mpsc::UnboundedReceiver<Reply>,
    JoinHandle<Orchestrator>,
) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<Reply>();

    let handle = tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Submit(input) => match orchestrator.handle_user_turn(&input).await {
                    Ok(text) => {
                        let _ = reply_tx.send(Reply::Answer(text));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "session terminated");
                        let _ = reply_tx.send(Reply::Fatal(e.to_string()));
                        break;
                    }
                },
                Command::Clear => {
                    orchestrator.reset();
                    let _ = reply_tx.send(Reply::Cleared);
                }
                Command::Quit => break,
            }
        }
        orchestrator.phase = OrchestratorPhase::Done;
        orchestrator
    });

    (cmd_tx, reply_rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::memory::Role;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its text argument"
        }
        async fn execute(&self, args: Value) -> Result<String, AgentError> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    struct PoolGone;

    #[async_trait]
    impl Tool for PoolGone {
        fn name(&self) -> &str {
            "query_orders_database"
        }
        fn description(&self) -> &str {
            "always loses its connection pool"
        }
        async fn execute(&self, _args: Value) -> Result<String, AgentError> {
            Err(AgentError::ResourceExhausted("cannot open data/support.db".into()))
        }
    }

    fn orchestrator(llm: MockLlmClient, max_rounds: u32) -> Orchestrator {
        orchestrator_with_window(llm, max_rounds, 40)
    }

    fn orchestrator_with_window(llm: MockLlmClient, max_rounds: u32, window: usize) -> Orchestrator {
        let mut reg = ToolRegistry::new();
        reg.register(Echo);
        reg.register(PoolGone);
        Orchestrator::new(
            Arc::new(llm),
            ToolRouter::new(reg, Duration::from_secs(1)),
            ConversationManager::new(window).unwrap(),
            DEFAULT_INSTRUCTIONS,
            max_rounds,
        )
    }

    fn has_tool_result(messages: &[Turn]) -> bool {
        messages.iter().any(|m| m.role == Role::Tool)
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let llm = MockLlmClient::new().on_chat(|messages, tools| {
            assert_eq!(messages[0].role, Role::System);
            assert_eq!(tools.len(), 2);
            if has_tool_result(messages) {
                let last = messages.last().unwrap();
                Ok(ModelResponse::FinalAnswer(format!("You said: {}", last.content)))
            } else {
                Ok(ModelResponse::ToolCalls(vec![
                    ToolCallRequest::new("echo", json!({"text": "hello"})).with_id("c1"),
                ]))
            }
        });
        let mut orch = orchestrator(llm, 5);
        let reply = orch.handle_user_turn("say hello").await.unwrap();
        assert_eq!(reply, "You said: hello");
        assert_eq!(orch.phase(), OrchestratorPhase::AwaitingUserInput);

        let roles: Vec<Role> = orch.conversation().context().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(
            orch.conversation().context()[2].tool_call_id.as_deref(),
            Some("c1")
        );
    }

    #[tokio::test]
    async fn test_service_failure_becomes_apology() {
        let llm = MockLlmClient::new().on_chat(|_, _| {
            Err(LlmError::RetriesExhausted {
                attempts: 3,
                last: Box::new(LlmError::Timeout),
            })
        });
        let mut orch = orchestrator(llm, 5);
        let reply = orch.handle_user_turn("where is my order?").await.unwrap();
        assert!(reply.contains("trouble reaching"));
        assert_eq!(orch.conversation().len(), 2);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_forces_answer_without_tools() {
        let llm = MockLlmClient::new().on_chat(|_, tools| {
            if tools.is_empty() {
                Ok(ModelResponse::FinalAnswer("best I can do".into()))
            } else {
                Ok(ModelResponse::ToolCalls(vec![ToolCallRequest::new(
                    "echo",
                    json!({"text": "again"}),
                )]))
            }
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut orch = orchestrator(llm, 2).with_events(tx);
        let reply = orch.handle_user_turn("loop forever").await.unwrap();
        assert_eq!(reply, "best I can do");

        let tool_turns = orch
            .conversation()
            .context()
            .iter()
            .filter(|t| t.role == Role::Tool)
            .count();
        assert_eq!(tool_turns, 2);
        drop(orch);
        let mut budget_events = 0;
        while let Some(ev) = rx.recv().await {
            if matches!(ev, AgentEvent::BudgetExceeded { limit: 2, .. }) {
                budget_events += 1;
            }
        }
        assert_eq!(budget_events, 1);
    }

    #[tokio::test]
    async fn test_budget_fallback_summarizes_gathered_results() {
        let llm = MockLlmClient::new().on_chat(|_, tools| {
            if tools.is_empty() {
                Err(LlmError::InvalidRequest("nope".into()))
            } else {
                Ok(ModelResponse::ToolCalls(vec![ToolCallRequest::new(
                    "echo",
                    json!({"text": "order 2 is shipped"}),
                )]))
            }
        });
        let mut orch = orchestrator(llm, 1);
        let reply = orch.handle_user_turn("status?").await.unwrap();
        assert!(reply.contains("here is what I found"));
        assert!(reply.contains("order 2 is shipped"));
    }

    #[tokio::test]
    async fn test_batches_larger_than_window_still_reach_the_model() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Mutex;

        let round = Arc::new(AtomicUsize::new(0));
        let saw_results = Arc::new(AtomicUsize::new(0));
        let forced_prompt = Arc::new(Mutex::new(String::new()));
        let (r, seen, forced) = (round.clone(), saw_results.clone(), forced_prompt.clone());
        let llm = MockLlmClient::new().on_chat(move |messages, tools| {
            if tools.is_empty() {
                let text: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
                *forced.lock().unwrap() = text.join("\n");
                return Ok(ModelResponse::FinalAnswer("forced".into()));
            }
            if has_tool_result(messages) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            let n = r.fetch_add(1, Ordering::SeqCst);
            Ok(ModelResponse::ToolCalls(
                (1..=3)
                    .map(|k| ToolCallRequest::new("echo", json!({"text": format!("r{n}c{k}")})))
                    .collect(),
            ))
        });
        let mut orch = orchestrator_with_window(llm, 3, 4);
        let reply = orch.handle_user_turn("gather everything").await.unwrap();
        assert_eq!(reply, "forced");
        assert!(orch.conversation().len() <= 4);
        // 第 2 到 4 次调用都能看到上一轮的工具结果
        assert_eq!(saw_results.load(Ordering::SeqCst), 3);

        let prompt = forced_prompt.lock().unwrap().clone();
        for n in 0..3 {
            for k in 1..=3 {
                let text = format!("r{n}c{k}");
                assert!(prompt.contains(&text), "forced answer never saw {text}");
            }
        }
    }

    #[tokio::test]
    async fn test_resource_exhaustion_is_fatal() {
        let llm = MockLlmClient::new().on_chat(|_, _| {
            Ok(ModelResponse::ToolCalls(vec![ToolCallRequest::new(
                "query_orders_database",
                json!({"question": "order 2"}),
            )]))
        });
        let mut orch = orchestrator(llm, 5);
        let err = orch.handle_user_turn("order 2?").await.unwrap_err();
        assert!(matches!(err, AgentError::ResourceExhausted(_)));
        assert_eq!(orch.phase(), OrchestratorPhase::Done);
    }

    #[test]
    fn test_ensure_unique_ids() {
        let calls = vec![
            ToolCallRequest::new("echo", json!({})).with_id("a"),
            ToolCallRequest::new("echo", json!({})).with_id("a"),
            ToolCallRequest::new("echo", json!({})).with_id(""),
        ];
        let fixed = ensure_unique_ids(calls);
        assert_eq!(fixed[0].id, "a");
        assert_ne!(fixed[1].id, "a");
        assert!(!fixed[2].id.is_empty());
        let unique: HashSet<_> = fixed.iter().map(|c| c.id.clone()).collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn test_session_commands() {
        let mut orch = orchestrator(MockLlmClient::new(), 5);
        orch.conversation.append(Turn::user("stale"));
        let (tx, mut rx, handle) = spawn_session(orch);

        tx.send(Command::Clear).unwrap();
        assert_eq!(rx.recv().await, Some(Reply::Cleared));
        tx.send(Command::Submit("hi".into())).unwrap();
        assert_eq!(rx.recv().await, Some(Reply::Answer("Echo from Mock: hi".into())));
        tx.send(Command::Quit).unwrap();
        let orch = handle.await.unwrap();
        assert_eq!(rx.recv().await, None);
        assert_eq!(orch.phase(), OrchestratorPhase::Done);
        assert_eq!(orch.conversation().len(), 2);
    }
}
