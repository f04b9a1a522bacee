//! 政策检索工具：在语义索引中查找退货、配送、保修等政策段落，返回 top-K

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::memory::{Passage, SemanticIndex};
use crate::tools::{parameters_schema_for, Tool};

pub const SEARCH_POLICIES: &str = "search_policies";

#[derive(Debug, Deserialize, JsonSchema)]
struct PolicyQuestion {
    /// The policy-related question to search for
    question: String,
}

pub struct SearchPoliciesTool {
    index: Arc<dyn SemanticIndex>,
    top_k: usize,
}

impl SearchPoliciesTool {
    pub fn new(index: Arc<dyn SemanticIndex>, top_k: usize) -> Self {
        Self { index, top_k }
    }
}

/// `**Title** (relevance: 0.83)` + 段落，段落之间用分隔线
pub fn format_passages(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return "No relevant policies found.".to_string();
    }
    passages
        .iter()
        .map(|p| format!("**{}** (relevance: {:.2})\n{}", p.title, p.score, p.text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[async_trait]
impl Tool for SearchPoliciesTool {
    fn name(&self) -> &str {
        SEARCH_POLICIES
    }

    fn description(&self) -> &str {
        "Search company policies for information about returns, shipping, warranties and other \
         customer service rules. Results carry a relevance score; higher is more relevant."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<PolicyQuestion>()
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let args: PolicyQuestion =
            serde_json::from_value(args).map_err(|e| AgentError::InvalidArguments(e.to_string()))?;
        let passages = self
            .index
            .search(&args.question, self.top_k)
            .await
            .map_err(AgentError::Execution)?;
        Ok(format_passages(&passages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedIndex(Vec<Passage>);

    #[async_trait]
    impl SemanticIndex for FixedIndex {
        async fn search(&self, _query: &str, k: usize) -> Result<Vec<Passage>, String> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
    }

    fn passage(title: &str, score: f32) -> Passage {
        Passage {
            title: title.into(),
            source: "policies/x.md".into(),
            text: format!("{title} text"),
            score,
        }
    }

    #[tokio::test]
    async fn test_formats_top_k() {
        let tool = SearchPoliciesTool::new(
            Arc::new(FixedIndex(vec![
                passage("Return Policy", 0.834),
                passage("Shipping", 0.5),
                passage("Warranty", 0.1),
            ])),
            2,
        );
        let out = tool.execute(json!({"question": "returns?"})).await.unwrap();
        assert!(out.starts_with("**Return Policy** (relevance: 0.83)\nReturn Policy text"));
        assert_eq!(out.matches("\n\n---\n\n").count(), 1);
        assert!(!out.contains("Warranty"));
    }

    #[tokio::test]
    async fn test_no_hits_and_bad_args() {
        let tool = SearchPoliciesTool::new(Arc::new(FixedIndex(vec![])), 3);
        assert_eq!(
            tool.execute(json!({"question": "x"})).await.unwrap(),
            "No relevant policies found."
        );
        assert!(matches!(
            tool.execute(json!({"q": 1})).await,
            Err(AgentError::InvalidArguments(_))
        ));
    }
}
