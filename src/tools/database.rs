//! 订单数据库查询工具：问题交给反思循环，生成并校验 SQL 后再访问数据源

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::reflection::ReflectionLoop;
use crate::tools::{parameters_schema_for, Tool};

pub const QUERY_ORDERS_DATABASE: &str = "query_orders_database";

#[derive(Debug, Deserialize, JsonSchema)]
struct OrdersQuestion {
    /// The customer's question about orders, customers, products or stock, in natural language
    question: String,
}

pub struct QueryOrdersDatabaseTool {
    reflection: Arc<ReflectionLoop>,
}

impl QueryOrdersDatabaseTool {
    pub fn new(reflection: Arc<ReflectionLoop>) -> Self {
        Self { reflection }
    }
}

#[async_trait]
impl Tool for QueryOrdersDatabaseTool {
    fn name(&self) -> &str {
        QUERY_ORDERS_DATABASE
    }

    fn description(&self) -> &str {
        "Look up information in the customer orders database: orders (status, totals, shipping \
         address, tracking number), customers, products, prices and stock levels. Ask in plain \
         language; a SQL query is generated, validated and reviewed for you."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<OrdersQuestion>()
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let args: OrdersQuestion =
            serde_json::from_value(args).map_err(|e| AgentError::InvalidArguments(e.to_string()))?;
        if args.question.trim().is_empty() {
            return Err(AgentError::InvalidArguments("question must not be empty".to_string()));
        }
        let outcome = self.reflection.run(args.question.trim()).await?;
        Ok(outcome.render())
    }
}
