//! SQL 审查者：独立判断查询与结果是否回答了原问题
//!
//! 回复恰为 CORRECT（不区分大小写）视为通过，其余文本即为驳回理由，没有部分得分。

use std::sync::Arc;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Turn;

const REVIEWER_INSTRUCTIONS: &str = "You are a SQL query reviewer.

Think step by step:
1. Understand what the original question is asking for
2. Analyze if the SQL query logic matches the question intent
3. Verify the query results actually answer the question
4. Check for common issues: wrong JOINs, missing WHERE clauses, incorrect aggregations

Output:
- If correct: respond with exactly \"CORRECT\"
- If incorrect: provide specific, actionable feedback on what's wrong and how to fix it

Database Schema:
{schema}";

/// 审查结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewVerdict {
    Approved,
    Rejected(String),
}

impl ReviewVerdict {
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let bare = trimmed.trim_end_matches('.').trim_matches('"');
        if bare.eq_ignore_ascii_case("CORRECT") {
            ReviewVerdict::Approved
        } else if trimmed.is_empty() {
            ReviewVerdict::Rejected("reviewer returned an empty verdict".to_string())
        } else {
            ReviewVerdict::Rejected(trimmed.to_string())
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ReviewVerdict::Approved)
    }
}

pub struct SqlReviewer {
    llm: Arc<dyn LlmClient>,
    instructions: String,
}

impl SqlReviewer {
    pub fn new(llm: Arc<dyn LlmClient>, schema: &str) -> Self {
        Self {
            llm,
            instructions: REVIEWER_INSTRUCTIONS.replace("{schema}", schema),
        }
    }

    pub async fn review(
        &self,
        question: &str,
        sql: &str,
        rendered_rows: &str,
    ) -> Result<ReviewVerdict, LlmError> {
        let prompt = format!(
            "Original Question: {question}\n\nGenerated SQL Query:\n{sql}\n\nQuery Results:\n{rendered_rows}\n\n\
             Evaluate whether this SQL query correctly answers the original question."
        );
        let messages = vec![Turn::system(self.instructions.clone()), Turn::user(prompt)];
        let response = self.llm.complete(&messages).await?;
        Ok(ReviewVerdict::parse(&response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_parse_verdict() {
        assert_eq!(ReviewVerdict::parse("CORRECT"), ReviewVerdict::Approved);
        assert_eq!(ReviewVerdict::parse("  correct.\n"), ReviewVerdict::Approved);
        assert_eq!(
            ReviewVerdict::parse("Missing WHERE clause on order id"),
            ReviewVerdict::Rejected("Missing WHERE clause on order id".into())
        );
        assert!(!ReviewVerdict::parse("").is_approved());
        assert!(!ReviewVerdict::parse("CORRECT, but add a LIMIT").is_approved());
    }

    #[tokio::test]
    async fn test_review_sees_question_sql_and_rows() {
        let llm = MockLlmClient::new().on_complete(|messages| {
            let prompt = &messages[1].content;
            assert!(prompt.contains("Original Question: status of order 2?"));
            assert!(prompt.contains("SELECT status FROM orders WHERE id = 2"));
            assert!(prompt.contains("shipped"));
            Ok("CORRECT".to_string())
        });
        let reviewer = SqlReviewer::new(Arc::new(llm), "schema");
        let verdict = reviewer
            .review(
                "status of order 2?",
                "SELECT status FROM orders WHERE id = 2",
                r#"[{"status": "shipped"}]"#,
            )
            .await
            .unwrap();
        assert!(verdict.is_approved());
    }
}
