//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 Orchestrator 决定是致歉、尽力回答还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将终态错误映射为用户可见的降级动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::TransientService(_) => RecoveryAction::Apologize(
                "I'm sorry, I'm having trouble reaching our support systems right now. \
                 Please try again in a moment."
                    .to_string(),
            ),
            AgentError::Service(_) => RecoveryAction::Apologize(
                "I'm sorry, I couldn't process that request. Could you rephrase your question?"
                    .to_string(),
            ),
            AgentError::BudgetExceeded { .. } => RecoveryAction::BestEffort,
            AgentError::ResourceExhausted(_) | AgentError::ConfigError(_) => RecoveryAction::Abort,
            AgentError::Validation(_)
            | AgentError::Execution(_)
            | AgentError::UnknownTool(_)
            | AgentError::ToolTimeout { .. }
            | AgentError::InvalidArguments(_) => RecoveryAction::Apologize(format!(
                "I'm sorry, I ran into a problem while looking that up ({err})."
            )),
        }
    }
}
