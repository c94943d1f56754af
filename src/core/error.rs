//! 任务错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：协议类错误（格式错误、未知动作、空回复）可重试，其余一律致命。
//! 动作本身的失败（命令非零退出、文件写不进去、搜索请求失败）不是错误，而是交给模型的观察。

use thiserror::Error;

use crate::llm::LlmError;
use crate::protocol::MalformedStep;
use crate::shell::ShellError;

/// 任务运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("LLM did not reply within {0}s")]
    LlmTimeout(u64),

    #[error("LLM returned an empty reply")]
    EmptyReply,

    #[error("malformed step: {0}")]
    MalformedStep(#[from] MalformedStep),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("shell error: {0}")]
    Shell(#[from] ShellError),

    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gave up after {0} consecutive invalid replies")]
    RetriesExhausted(usize),

    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

impl TaskError {
    /// 是否可以通过追加纠正提示让模型重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskError::EmptyReply | TaskError::MalformedStep(_) | TaskError::InvalidAction(_)
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 追加纠正提示，让模型重新给出这一步
    RetryWithPrompt(String),
    /// 终止当前任务
    Abort,
}
