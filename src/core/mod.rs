//! 核心编排层：错误与恢复、状态机、过程事件、构建器、主控循环

pub mod builder;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod recovery;
pub mod state;

pub use builder::AgentBuilder;
pub use error::{AgentError, RecoveryAction};
pub use events::{AgentEvent, EventSender};
pub use orchestrator::{spawn_session, Command, Orchestrator, Reply, DEFAULT_INSTRUCTIONS};
pub use recovery::RecoveryEngine;
pub use state::OrchestratorPhase;
