//! SQLite 数据源
//!
//! 只读连接池：信号量限制并发连接数，空闲连接放回池中复用；查询在 spawn_blocking 中执行，
//! 不阻塞异步运行时。非只读语句在执行前被拒绝。

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::store::{DataStore, Row, StoreError, SCHEMA};

pub struct SqliteStore {
    path: PathBuf,
    idle: Arc<Mutex<Vec<Connection>>>,
    permits: Arc<Semaphore>,
}

impl SqliteStore {
    /// 打开只读连接池；首个连接失败视为资源不可用
    pub fn open(path: &Path, pool_size: usize) -> Result<Self, StoreError> {
        let first = connect(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            idle: Arc::new(Mutex::new(vec![first])),
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
        })
    }
}

fn connect(path: &Path) -> Result<Connection, StoreError> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| StoreError::PoolUnavailable(format!("{}: {}", path.display(), e)))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

fn run_query(conn: &Connection, sql: &str) -> Result<Vec<Row>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(StoreError::Query(
            "only read-only statements may be executed".to_string(),
        ));
    }
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Row::new();
        for (i, name) in columns.iter().enumerate() {
            map.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        out.push(map);
    }
    Ok(out)
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::PoolUnavailable("pool closed".to_string()))?;
        let idle = Arc::clone(&self.idle);
        let path = self.path.clone();
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let pooled = idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
            let conn = match pooled {
                Some(c) => c,
                None => connect(&path)?,
            };
            let result = run_query(&conn, &sql);
            idle.lock().unwrap_or_else(|e| e.into_inner()).push(conn);
            result
        })
        .await
        .map_err(|e| StoreError::Query(format!("query task failed: {e}")))?
    }

    fn schema(&self) -> &str {
        SCHEMA
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::init_database;

    fn seeded() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("support.db");
        init_database(&path).unwrap();
        let store = SqliteStore::open(&path, 2).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_select_returns_ordered_columns() {
        let (_dir, store) = seeded();
        let rows = store
            .query("SELECT id, status, tracking_number FROM orders WHERE id = 2")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let cols: Vec<&String> = rows[0].keys().collect();
        assert_eq!(cols, vec!["id", "status", "tracking_number"]);
        assert_eq!(rows[0]["status"], "shipped");
        assert_eq!(rows[0]["id"], 2);
    }

    #[tokio::test]
    async fn test_write_statement_is_rejected() {
        let (_dir, store) = seeded();
        let err = store.query("DELETE FROM orders").await.unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
        let rows = store.query("SELECT COUNT(*) AS n FROM orders").await.unwrap();
        assert_eq!(rows[0]["n"], 6);
    }

    #[tokio::test]
    async fn test_syntax_error_is_query_error() {
        let (_dir, store) = seeded();
        let err = store.query("SELECT * FROM no_such_table").await.unwrap_err();
        assert!(matches!(err, StoreError::Query(ref m) if m.contains("no_such_table")));
    }

    #[tokio::test]
    async fn test_concurrent_queries_share_pool() {
        let (_dir, store) = seeded();
        let store = Arc::new(store);
        let handles: Vec<_> = (1..=6)
            .map(|id| {
                let s = Arc::clone(&store);
                tokio::spawn(async move {
                    s.query(&format!("SELECT status FROM orders WHERE id = {id}"))
                        .await
                })
            })
            .collect();
        for h in handles {
            let rows = h.await.unwrap().unwrap();
            assert_eq!(rows.len(), 1);
        }
        assert!(store.idle.lock().unwrap().len() <= 2);
    }

    #[test]
    fn test_missing_file_is_pool_unavailable() {
        let err = SqliteStore::open(Path::new("/nonexistent/dir/x.db"), 2)
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::PoolUnavailable(_)));
    }
}
