//! 编排器状态机
//!
//! AwaitingUserInput → CallingModel → {Answering | DispatchingTools} → CallingModel → … → Done

use std::fmt;

use serde::Serialize;

/// Orchestrator 当前所处阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorPhase {
    /// 等待下一条用户输入
    #[default]
    AwaitingUserInput,
    /// 正在调用推理服务
    CallingModel,
    /// 正在并发执行一批工具调用
    DispatchingTools,
    /// 写入最终回复
    Answering,
    /// 会话结束（退出或致命错误）
    Done,
}

impl fmt::Display for OrchestratorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AwaitingUserInput => "awaiting_user_input",
            Self::CallingModel => "calling_model",
            Self::DispatchingTools => "dispatching_tools",
            Self::Answering => "answering",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}
