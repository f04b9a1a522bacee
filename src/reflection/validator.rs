//! 查询校验：执行前拒绝非只读或含危险构造的 SQL
//!
//! 先把字符串字面量、带引号的标识符和注释替换为空白，再检查：单条语句、以 SELECT / WITH 开头、
//! 不含写入或管理类关键字。REPLACE 只在 `REPLACE INTO` 语句形式下拒绝，字符串函数 replace() 可用。校验失败返回 AgentError::Validation（作为反思反馈，不直接给用户）。

use std::sync::OnceLock;

use regex::Regex;

use crate::core::AgentError;

static FORBIDDEN_RE: OnceLock<Regex> = OnceLock::new();

fn forbidden_re() -> &'static Regex {
    FORBIDDEN_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|TRUNCATE|ATTACH|DETACH|PRAGMA|VACUUM|REINDEX|GRANT|REVOKE|UPSERT)\b|\b(?:OR\s+)?REPLACE\s+INTO\b",
        )
        .expect("forbidden keyword pattern is valid")
    })
}

/// 字面量 / 标识符 / 注释替换为空格，保留其余字符位置
fn mask_literals(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                out.push(' ');
                i += 1;
                while i < chars.len() {
                    if chars[i] == c {
                        // 连续两个引号是转义
                        if chars.get(i + 1) == Some(&c) {
                            out.push_str("  ");
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    out.push(' ');
                    i += 1;
                }
                out.push(' ');
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                out.push_str("  ");
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    out.push(' ');
                    i += 1;
                }
                out.push_str("  ");
                i += 2;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// 校验并规范化查询（去掉首尾空白与结尾分号）
pub fn validate_query(sql: &str) -> Result<String, AgentError> {
    let normalized = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if normalized.is_empty() {
        return Err(AgentError::Validation("query is empty".to_string()));
    }

    let masked = mask_literals(normalized);
    if masked.contains(';') {
        return Err(AgentError::Validation(
            "multiple statements are not allowed".to_string(),
        ));
    }

    let first = masked
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase();
    if first != "SELECT" && first != "WITH" {
        return Err(AgentError::Validation(
            "only SELECT queries are allowed".to_string(),
        ));
    }

    if let Some(m) = forbidden_re().find(&masked) {
        return Err(AgentError::Validation(format!(
            "disallowed keyword '{}'",
            m.as_str().to_uppercase()
        )));
    }

    Ok(normalized.to_string())
}
