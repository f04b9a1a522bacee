//! 数据源边界：只读查询 → 有序的行（列名 → 值）
//!
//! SqliteStore 为默认实现（连接池 + spawn_blocking）；seed 负责建表与示例数据。

pub mod seed;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

pub use seed::{init_database, init_schema, seed_sample_data, SCHEMA};
pub use sqlite::SqliteStore;

/// 一行结果：保持列顺序的 列名 → JSON 值
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// 语法错误、执行失败或非只读语句（转为反思反馈）
    #[error("{0}")]
    Query(String),

    /// 无法获取任何连接（进程级资源耗尽）
    #[error("connection pool unavailable: {0}")]
    PoolUnavailable(String),

    /// 建库 / 建表 / 写入示例数据失败
    #[error("database setup failed: {0}")]
    Init(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}

/// 数据源 trait：可在并发的工具调用间共享
#[async_trait]
pub trait DataStore: Send + Sync {
    /// 执行一条只读查询
    async fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError>;

    /// 表结构描述（DDL），嵌入生成 / 审查提示词
    fn schema(&self) -> &str;
}

/// 结果集渲染：空 → `No results found.`，否则为缩进的 JSON 数组
pub fn render_rows(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No results found.".to_string();
    }
    serde_json::to_string_pretty(rows).unwrap_or_else(|e| format!("(unrenderable rows: {e})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_rows() {
        assert_eq!(render_rows(&[]), "No results found.");
        let mut row = Row::new();
        row.insert("id".into(), json!(2));
        row.insert("status".into(), json!("shipped"));
        let out = render_rows(&[row]);
        assert!(out.contains("\"status\": \"shipped\""));
        // 列顺序保持
        assert!(out.find("\"id\"").unwrap() < out.find("\"status\"").unwrap());
    }
}
