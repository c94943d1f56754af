//! 记忆：单次任务内的对话历史

pub mod conversation;

pub use conversation::{Checkpoint, ConversationHistory, Message, Role};
