//! 反思循环：生成 → 校验 → 执行 → 审查，驳回则带着反馈重试
//!
//! 第 k 轮的反馈只对第 k+1 轮可见；尝试次数达到上限时返回最后一次取得的结果并标注未验证，不会无限循环。
//! 只有数据源连接池不可用（ResourceExhausted）会作为错误返回，其余失败都转为下一轮的反馈。
//! 设置了时间预算时，到点即停止并返回已取得的结果，不等外层工具超时把整次调用取消。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::core::events::{send_event, AgentEvent, EventSender};
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::reflection::{validate_query, ReviewVerdict, SqlGenerator, SqlReviewer};
use crate::store::{render_rows, DataStore, Row, StoreError};

/// 一次尝试产生的已校验查询
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredQuery {
    pub sql: String,
    pub question: String,
    /// 从 1 开始，单调递增
    pub attempt: u32,
    /// 生成本查询之前累计的全部反馈（按时间顺序）
    pub feedback_history: Vec<String>,
}

/// 循环结束时的结果
#[derive(Debug, Clone)]
pub struct ReflectionOutcome {
    /// 最后一条成功执行的查询
    pub query: Option<StructuredQuery>,
    pub rows: Option<Vec<Row>>,
    /// 审查者是否通过
    pub verified: bool,
    pub attempts: u32,
    pub feedback: Vec<String>,
}

impl ReflectionOutcome {
    /// 作为工具结果的文本；未验证的结果带上说明
    pub fn render(&self) -> String {
        match (&self.rows, self.verified) {
            (Some(rows), true) => render_rows(rows),
            (Some(rows), false) => format!(
                "[Unverified] The query could not be confirmed after {} attempts; these results may be inaccurate.\n{}",
                self.attempts,
                render_rows(rows)
            ),
            (None, _) => {
                let last = self
                    .feedback
                    .last()
                    .map(String::as_str)
                    .unwrap_or("no query could be produced");
                format!(
                    "No results found. [Unverified] No query succeeded after {} attempts. Last issue: {}",
                    self.attempts, last
                )
            }
        }
    }
}

pub struct ReflectionLoop {
    generator: SqlGenerator,
    reviewer: SqlReviewer,
    store: Arc<dyn DataStore>,
    max_attempts: u32,
    deadline: Option<Duration>,
    events: Option<EventSender>,
}

/// 在截止时间前完成则返回 Some
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
        None => Some(fut.await),
    }
}

impl ReflectionLoop {
    /// generator / reviewer 可以使用不同的模型，避免自我认同
    pub fn new(
        generator_llm: Arc<dyn LlmClient>,
        reviewer_llm: Arc<dyn LlmClient>,
        store: Arc<dyn DataStore>,
        max_attempts: u32,
    ) -> Self {
        let schema = store.schema().to_string();
        Self {
            generator: SqlGenerator::new(generator_llm, &schema),
            reviewer: SqlReviewer::new(reviewer_llm, &schema),
            store,
            max_attempts: max_attempts.max(1),
            deadline: None,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.events = Some(tx);
        self
    }

    /// 整个循环的时间预算，应短于外层的工具超时
    pub fn with_deadline(mut self, budget: Duration) -> Self {
        self.deadline = Some(budget);
        self
    }

    fn activity(&self, agent: &str, action: &str, attempt: u32) {
        send_event(
            &self.events,
            AgentEvent::AgentActivity {
                agent: agent.to_string(),
                action: action.to_string(),
                attempt,
            },
        );
    }

    pub async fn run(&self, question: &str) -> Result<ReflectionOutcome, AgentError> {
        let deadline = self.deadline.map(|budget| Instant::now() + budget);
        let mut feedback: Vec<String> = Vec::new();
        let mut last: Option<(StructuredQuery, Vec<Row>)> = None;
        let mut attempts = 0;
        let mut out_of_time = false;

        for attempt in 1..=self.max_attempts {
            attempts = attempt;
            self.activity("sql_generator", "generating", attempt);
            let latest = feedback.last().map(String::as_str);
            let raw = match within(deadline, self.generator.generate(question, latest)).await {
                Some(Ok(sql)) => sql,
                Some(Err(e)) => {
                    tracing::warn!(attempt, error = %e, "sql generation failed");
                    feedback.push(format!("Generation failed: {e}. Please try again."));
                    continue;
                }
                None => {
                    out_of_time = true;
                    break;
                }
            };

            let sql = match validate_query(&raw) {
                Ok(sql) => sql,
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "generated query rejected by validator");
                    feedback.push(format!("Query error: {e}. Please generate a valid SELECT query."));
                    continue;
                }
            };

            let query = StructuredQuery {
                sql,
                question: question.to_string(),
                attempt,
                feedback_history: feedback.clone(),
            };

            self.activity("database", "executing", attempt);
            let rows = match within(deadline, self.store.query(&query.sql)).await {
                Some(Ok(rows)) => rows,
                Some(Err(StoreError::PoolUnavailable(msg))) => {
                    tracing::error!(error = %msg, "data store unavailable");
                    return Err(AgentError::ResourceExhausted(msg));
                }
                Some(Err(e)) => {
                    feedback.push(format!("Database error: {e}. Please fix the SQL syntax."));
                    continue;
                }
                None => {
                    out_of_time = true;
                    break;
                }
            };
            let rendered = render_rows(&rows);

            self.activity("sql_reviewer", "reviewing", attempt);
            let verdict = within(
                deadline,
                self.reviewer.review(question, &query.sql, &rendered),
            )
            .await;
            match verdict {
                Some(Ok(ReviewVerdict::Approved)) => {
                    self.activity("sql_reviewer", "approved", attempt);
                    tracing::info!(attempt, sql = %query.sql, "query approved");
                    return Ok(ReflectionOutcome {
                        query: Some(query),
                        rows: Some(rows),
                        verified: true,
                        attempts: attempt,
                        feedback,
                    });
                }
                Some(Ok(ReviewVerdict::Rejected(reason))) => {
                    self.activity("sql_reviewer", "rejected", attempt);
                    tracing::debug!(attempt, reason = %reason, "query rejected by reviewer");
                    feedback.push(reason);
                }
                Some(Err(e)) => {
                    tracing::warn!(attempt, error = %e, "sql review failed");
                    feedback.push(format!("Review failed: {e}. Please double-check the query."));
                }
                None => {
                    // 未审查完的结果同样保留
                    last = Some((query, rows));
                    out_of_time = true;
                    break;
                }
            }
            last = Some((query, rows));
        }

        if out_of_time {
            let budget_ms = self.deadline.map(|d| d.as_millis() as u64).unwrap_or_default();
            tracing::warn!(attempt = attempts, budget_ms, "reflection time budget exhausted");
            feedback.push(format!(
                "Time budget of {budget_ms} ms exhausted before the query could be confirmed."
            ));
            send_event(
                &self.events,
                AgentEvent::BudgetExceeded {
                    what: "reflection time (ms)".to_string(),
                    limit: u32::try_from(budget_ms).unwrap_or(u32::MAX),
                },
            );
        } else {
            tracing::warn!(
                limit = self.max_attempts,
                "{}",
                AgentError::BudgetExceeded {
                    what: "reflection attempts",
                    limit: self.max_attempts,
                }
            );
            send_event(
                &self.events,
                AgentEvent::BudgetExceeded {
                    what: "reflection attempts".to_string(),
                    limit: self.max_attempts,
                },
            );
        }

        let (query, rows) = match last {
            Some((q, r)) => (Some(q), Some(r)),
            None => (None, None),
        };
        Ok(ReflectionOutcome {
            query,
            rows,
            verified: false,
            attempts,
            feedback,
        })
    }
}
