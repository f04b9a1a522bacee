//! SQL 反思：生成者 + 校验 + 审查者的自我纠错循环

pub mod generator;
pub mod loop_;
pub mod reviewer;
pub mod validator;

pub use generator::{strip_code_fences, SqlGenerator};
pub use loop_::{ReflectionLoop, ReflectionOutcome, StructuredQuery};
pub use reviewer::{ReviewVerdict, SqlReviewer};
pub use validator::validate_query;
