//! 记忆层：短期对话历史（带剪枝）与政策文档语义检索

pub mod conversation;
pub mod rag;

pub use conversation::{ConversationManager, Role, Turn, MIN_CONTEXT_TURNS};
pub use rag::{load_policies, Chunker, ChunkingConfig, Passage, PolicyDocument, PolicyIndex, SemanticIndex};
