//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、重试包装、嵌入

pub mod deepseek;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use embedding::{create_embedder_from_config, EmbeddingProvider, HashingEmbedder, OpenAiEmbedder};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use retry::{call_with_retry, RetryConfig, RetryingLlmClient};
pub use traits::{LlmClient, LlmError, ModelResponse};
