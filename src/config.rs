//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DESK__*` 覆盖（双下划线表示嵌套，如 `DESK__LLM__MODEL=gpt-4o`）。
//! 进程启动时加载一次，会话期间不可变；构建组件前必须先通过 `validate`。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::RetryConfig;
use crate::memory::MIN_CONTEXT_TURNS;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub reflection: ReflectionSection,
    pub data: DataSection,
}

/// [app] 段：对话窗口、单次输入的工具轮数上限、系统提示词文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 对话历史最多保留的 turn 数（约 20 轮往返）
    pub max_context_turns: usize,
    /// 每条用户输入允许的「调用模型 ⇄ 执行工具」循环次数
    pub max_tool_rounds: u32,
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            max_context_turns: 40,
            max_tool_rounds: 5,
            system_prompt_path: None,
        }
    }
}

/// [llm] 段：后端选择、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek；无 API Key 时回退到 Mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub embedding_model: String,
    pub timeouts: LlmTimeoutsSection,
    pub retry: LlmRetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            embedding_model: "text-embedding-3-small".to_string(),
            timeouts: LlmTimeoutsSection::default(),
            retry: LlmRetrySection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒），超时按瞬时错误重试
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 20 }
    }
}

/// [llm.retry] 段：总尝试次数与指数退避
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmRetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

/// [tools] 段：单次工具调用超时、政策检索返回条数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub tool_timeout_secs: u64,
    pub policy_top_k: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            policy_top_k: 3,
        }
    }
}

/// [reflection] 段：SQL 生成 / 审查循环
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReflectionSection {
    pub max_attempts: u32,
    /// 审查者使用的模型；未设置时与生成者共用 llm.model
    pub reviewer_model: Option<String>,
}

impl Default for ReflectionSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            reviewer_model: None,
        }
    }
}

/// [data] 段：SQLite 文件、连接池大小、政策文档目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSection {
    pub database_path: PathBuf,
    pub pool_size: usize,
    pub policies_dir: PathBuf,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/support.db"),
            pool_size: 4,
            policies_dir: PathBuf::from("policies"),
        }
    }
}

impl AppConfig {
    /// 启动时校验：非法窗口 / 次数 / 超时在构建组件前被拒绝
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.app.max_context_turns < MIN_CONTEXT_TURNS {
            return Err(AgentError::ConfigError(format!(
                "app.max_context_turns must be at least {MIN_CONTEXT_TURNS}, got {}",
                self.app.max_context_turns
            )));
        }
        let positive = [
            ("app.max_tool_rounds", u64::from(self.app.max_tool_rounds)),
            ("llm.timeouts.request", self.llm.timeouts.request),
            ("llm.retry.max_attempts", u64::from(self.llm.retry.max_attempts)),
            ("tools.tool_timeout_secs", self.tools.tool_timeout_secs),
            ("tools.policy_top_k", self.tools.policy_top_k as u64),
            ("reflection.max_attempts", u64::from(self.reflection.max_attempts)),
            ("data.pool_size", self.data.pool_size as u64),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(AgentError::ConfigError(format!("{key} must be greater than 0")));
        }
        if self.llm.retry.base_delay_ms > self.llm.retry.max_delay_ms {
            return Err(AgentError::ConfigError(
                "llm.retry.base_delay_ms must not exceed llm.retry.max_delay_ms".to_string(),
            ));
        }
        // 数据库工具内部的推理请求必须能在工具超时之内结束
        if self.llm.timeouts.request >= self.tools.tool_timeout_secs {
            return Err(AgentError::ConfigError(format!(
                "llm.timeouts.request ({}s) must be shorter than tools.tool_timeout_secs ({}s)",
                self.llm.timeouts.request, self.tools.tool_timeout_secs
            )));
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.llm.retry.max_attempts,
            base_delay: Duration::from_millis(self.llm.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.llm.retry.max_delay_ms),
            attempt_timeout: Duration::from_secs(self.llm.timeouts.request),
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.tool_timeout_secs)
    }

    /// 反思循环的时间预算：工具超时留出 1/5 余量，到点时带着已有结果返回
    pub fn reflection_deadline(&self) -> Duration {
        let limit = self.tool_timeout();
        limit - limit / 5
    }
}

/// 从 config 目录加载配置，环境变量 DESK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DESK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DESK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
