//! Bee Desk - 电商客服智能体
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）与校验
//! - **core**: 编排器、状态机、错误与恢复、过程事件、构建器
//! - **llm**: 推理服务抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、重试包装、嵌入
//! - **memory**: 对话历史（滑动窗口）与政策文档语义检索
//! - **reflection**: SQL 生成 / 校验 / 审查的反思循环
//! - **store**: 只读 SQLite 数据源、建表与示例数据
//! - **tools**: 工具注册表、并发路由器、订单查询与政策检索工具
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod reflection;
pub mod store;
pub mod tools;
