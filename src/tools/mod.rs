//! 工具层：调用请求 / 结果、注册表、并发路由，以及订单查询与政策检索两个工具

pub mod call;
pub mod database;
pub mod policies;
pub mod registry;
pub mod router;
pub mod schema;

pub use call::{ToolCallRequest, ToolOutcome, ToolResult};
pub use database::{QueryOrdersDatabaseTool, QUERY_ORDERS_DATABASE};
pub use policies::{format_passages, SearchPoliciesTool, SEARCH_POLICIES};
pub use registry::{Tool, ToolRegistry};
pub use router::ToolRouter;
pub use schema::{parameters_schema_for, ToolSchema};
