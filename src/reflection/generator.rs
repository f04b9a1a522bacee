//! SQL 生成者：由自然语言问题与（上一轮的）反馈生成一条 SQLite 查询

use std::sync::Arc;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Turn;

const GENERATOR_INSTRUCTIONS: &str = "You are a SQL query generator for SQLite.

Think step by step:
1. Analyze the user's question to understand what data they need
2. Identify which tables and columns are relevant from the schema
3. Determine the appropriate JOINs, WHERE clauses, and aggregations
4. Generate the correct SQL query

Rules:
- Only SELECT queries allowed (no INSERT, UPDATE, DELETE)
- Output ONLY the raw SQL query - no explanations, no markdown, no code blocks
- Use exact table and column names from the schema
- If feedback is provided, analyze what went wrong and fix it

Database Schema:
{schema}";

/// 去掉模型偶尔包上的 ```sql 围栏
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
        .to_string()
}

pub struct SqlGenerator {
    llm: Arc<dyn LlmClient>,
    instructions: String,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, schema: &str) -> Self {
        Self {
            llm,
            instructions: GENERATOR_INSTRUCTIONS.replace("{schema}", schema),
        }
    }

    /// feedback 只包含上一轮的意见
    pub async fn generate(&self, question: &str, feedback: Option<&str>) -> Result<String, LlmError> {
        let mut messages = vec![
            Turn::system(self.instructions.clone()),
            Turn::user(format!("Question: {question}")),
        ];
        if let Some(fb) = feedback {
            messages.push(Turn::user(format!(
                "Your previous query was incorrect. Feedback: {fb}\n\nPlease generate a corrected SQL query."
            )));
        }
        let raw = self.llm.complete(&messages).await?;
        Ok(strip_code_fences(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::memory::Role;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("```\nSELECT 2;\n```\n"), "SELECT 2;");
        assert_eq!(strip_code_fences("  SELECT 3  "), "SELECT 3");
    }

    #[tokio::test]
    async fn test_feedback_is_appended_as_followup() {
        let llm = MockLlmClient::new().on_complete(|messages| {
            assert_eq!(messages[0].role, Role::System);
            assert!(messages[0].content.contains("CREATE TABLE orders"));
            assert_eq!(messages.len(), 3);
            assert!(messages[2].content.contains("Feedback: wrong column"));
            Ok("```sql\nSELECT status FROM orders WHERE id = 2\n```".to_string())
        });
        let gen = SqlGenerator::new(Arc::new(llm), "CREATE TABLE orders (id INTEGER)");
        let sql = gen
            .generate("status of order 2?", Some("wrong column"))
            .await
            .unwrap();
        assert_eq!(sql, "SELECT status FROM orders WHERE id = 2");
    }
}
