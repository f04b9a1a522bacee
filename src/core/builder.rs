//! Agent 构建器：统一的组件初始化逻辑
//!
//! 校验配置 → 创建推理服务（包上重试）→ 组装反思循环与两个工具 → 路由器 → 对话 → Orchestrator。
//! 数据源与语义索引由调用方打开后传入，进程持有，所有工具调用共享。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::events::EventSender;
use crate::core::orchestrator::{create_llm_for_model, DEFAULT_INSTRUCTIONS};
use crate::core::{AgentError, Orchestrator};
use crate::llm::{LlmClient, RetryingLlmClient};
use crate::memory::{ConversationManager, SemanticIndex};
use crate::reflection::ReflectionLoop;
use crate::store::DataStore;
use crate::tools::{QueryOrdersDatabaseTool, SearchPoliciesTool, ToolRegistry, ToolRouter};

pub struct AgentBuilder {
    config: AppConfig,
    system_prompt: String,
    llm: Option<Arc<dyn LlmClient>>,
    reviewer_llm: Option<Arc<dyn LlmClient>>,
    events: Option<EventSender>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            system_prompt: DEFAULT_INSTRUCTIONS.to_string(),
            llm: None,
            reviewer_llm: None,
            events: None,
        }
    }

    /// 设置系统提示词
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// 若配置了 app.system_prompt_path，则从该文件加载系统提示词
    pub fn with_system_prompt_from_file(mut self) -> Result<Self, AgentError> {
        if let Some(path) = &self.config.app.system_prompt_path {
            self.system_prompt = std::fs::read_to_string(path).map_err(|e| {
                AgentError::ConfigError(format!("read system prompt {}: {}", path.display(), e))
            })?;
        }
        Ok(self)
    }

    /// 指定推理服务（不指定则按配置创建）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 指定审查者使用的推理服务（不指定则与主服务相同，或按 reflection.reviewer_model 创建）
    pub fn with_reviewer_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.reviewer_llm = Some(llm);
        self
    }

    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.events = Some(tx);
        self
    }

    /// 每个推理服务客户端都包上重试与单次超时
    fn with_retry(&self, llm: Arc<dyn LlmClient>) -> Arc<dyn LlmClient> {
        Arc::new(RetryingLlmClient::new(llm, self.config.retry_config()))
    }

    /// 组装工具注册表：订单查询（经反思循环）与政策检索
    pub fn build_tool_registry(
        &self,
        llm: Arc<dyn LlmClient>,
        reviewer_llm: Arc<dyn LlmClient>,
        store: Arc<dyn DataStore>,
        index: Arc<dyn SemanticIndex>,
    ) -> ToolRegistry {
        let mut reflection =
            ReflectionLoop::new(llm, reviewer_llm, store, self.config.reflection.max_attempts)
                .with_deadline(self.config.reflection_deadline());
        if let Some(tx) = &self.events {
            reflection = reflection.with_events(tx.clone());
        }

        let mut tools = ToolRegistry::new();
        tools.register(QueryOrdersDatabaseTool::new(Arc::new(reflection)));
        tools.register(SearchPoliciesTool::new(index, self.config.tools.policy_top_k));
        tools
    }

    pub fn build(
        self,
        store: Arc<dyn DataStore>,
        index: Arc<dyn SemanticIndex>,
    ) -> Result<Orchestrator, AgentError> {
        self.config.validate()?;

        let raw = self
            .llm
            .clone()
            .unwrap_or_else(|| create_llm_for_model(&self.config, &self.config.llm.model));
        let raw_reviewer = match (&self.reviewer_llm, &self.config.reflection.reviewer_model) {
            (Some(llm), _) => Arc::clone(llm),
            (None, Some(model)) if self.llm.is_none() => create_llm_for_model(&self.config, model),
            _ => Arc::clone(&raw),
        };
        let llm = self.with_retry(raw);
        let reviewer_llm = self.with_retry(raw_reviewer);

        let registry = self.build_tool_registry(Arc::clone(&llm), reviewer_llm, store, index);
        let mut router = ToolRouter::new(registry, self.config.tool_timeout());
        if let Some(tx) = &self.events {
            router = router.with_events(tx.clone());
        }

        let conversation = ConversationManager::new(self.config.app.max_context_turns)?;
        let mut orchestrator = Orchestrator::new(
            llm,
            router,
            conversation,
            self.system_prompt,
            self.config.app.max_tool_rounds,
        );
        if let Some(tx) = self.events {
            orchestrator = orchestrator.with_events(tx);
        }
        tracing::info!(
            model = %self.config.llm.model,
            window = self.config.app.max_context_turns,
            max_tool_rounds = self.config.app.max_tool_rounds,
            "orchestrator ready"
        );
        Ok(orchestrator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::memory::Passage;
    use crate::store::{Row, StoreError};
    use async_trait::async_trait;

    struct EmptyStore;

    #[async_trait]
    impl DataStore for EmptyStore {
        async fn query(&self, _sql: &str) -> Result<Vec<Row>, StoreError> {
            Ok(vec![])
        }
        fn schema(&self) -> &str {
            ""
        }
    }

    struct EmptyIndex;

    #[async_trait]
    impl SemanticIndex for EmptyIndex {
        async fn search(&self, _q: &str, _k: usize) -> Result<Vec<Passage>, String> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut cfg = AppConfig::default();
        cfg.app.max_context_turns = 0;
        let result = AgentBuilder::new(cfg)
            .with_llm(Arc::new(MockLlmClient::new()))
            .build(Arc::new(EmptyStore), Arc::new(EmptyIndex));
        assert!(matches!(result, Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_registry_has_both_tools() {
        let builder = AgentBuilder::new(AppConfig::default());
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new());
        let reg = builder.build_tool_registry(
            Arc::clone(&llm),
            llm,
            Arc::new(EmptyStore),
            Arc::new(EmptyIndex),
        );
        assert_eq!(reg.tool_names(), vec!["query_orders_database", "search_policies"]);
    }

    #[test]
    fn test_missing_prompt_file_is_config_error() {
        let mut cfg = AppConfig::default();
        cfg.app.system_prompt_path = Some("/nonexistent/prompt.md".into());
        assert!(matches!(
            AgentBuilder::new(cfg).with_system_prompt_from_file(),
            Err(AgentError::ConfigError(_))
        ));
    }
}
