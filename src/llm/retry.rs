//! 重试与退避：包住对推理服务的每一次调用
//!
//! 每次尝试受 attempt_timeout 限制（超时按瞬时错误计）；仅瞬时错误重试，
//! 延迟为 base_delay * 2^(n-1)，不超过 max_delay；限流时至少等待服务给出的 retry-after。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};

use crate::llm::{LlmClient, LlmError, ModelResponse};
use crate::memory::Turn;
use crate::tools::ToolSchema;

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 单次尝试超时
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// 第 retry 次重试前的等待时间（retry 从 1 开始）
    pub fn delay_for(&self, retry: u32, err: &LlmError) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);
        match err {
            LlmError::RateLimited {
                retry_after_ms: Some(ms),
            } => backoff.max(Duration::from_millis(*ms)).min(self.max_delay),
            _ => backoff,
        }
    }
}

/// 执行一次带重试的调用；op 每次被调用都会产生一个新的请求
pub async fn call_with_retry<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut op: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = match timeout(config.attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout),
        };
        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(call = label, attempt, "reasoning service recovered");
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                tracing::warn!(call = label, attempts = attempt, error = %e, "retries exhausted");
                return Err(LlmError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                let delay = config.delay_for(attempt, &e);
                tracing::warn!(
                    call = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

/// 为任意 LlmClient 加上重试与超时的装饰器
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Turn]) -> Result<String, LlmError> {
        let inner = &self.inner;
        call_with_retry(&self.config, "complete", move || inner.complete(messages)).await
    }

    async fn complete_with_tools(
        &self,
        messages: &[Turn],
        tools: &[ToolSchema],
    ) -> Result<ModelResponse, LlmError> {
        let inner = &self.inner;
        call_with_retry(&self.config, "complete_with_tools", move || {
            inner.complete_with_tools(messages, tools)
        })
        .await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
