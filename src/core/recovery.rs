//! 错误恢复引擎
//!
//! 根据 TaskError 返回 RecoveryAction，供运行循环决定是追加纠正提示重试还是终止。

use crate::core::{RecoveryAction, TaskError};
use crate::protocol::{ActionKind, MalformedStep};

/// 将错误映射为可执行动作（重试提示 / 终止）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &TaskError) -> RecoveryAction {
        if !err.is_retryable() {
            return RecoveryAction::Abort;
        }
        let problem = match err {
            TaskError::MalformedStep(kind) => malformed_hint(kind),
            TaskError::InvalidAction(name) => format!(
                "The action `{}` is not available. Use one of: {}",
                name,
                action_names()
            ),
            TaskError::EmptyReply => "Your reply was empty".to_string(),
            _ => return RecoveryAction::Abort,
        };
        RecoveryAction::RetryWithPrompt(format!("{}. {}", problem, FORMAT_REMINDER))
    }
}

const FORMAT_REMINDER: &str = "Reply with exactly one step: a `thought:` line, an `action:` line, \
    then `input:` followed by the payload between ``` fences. Do not write the observation yourself.";

fn malformed_hint(kind: &MalformedStep) -> String {
    match kind {
        MalformedStep::MissingAction => "Your reply has no `action:` line".to_string(),
        MalformedStep::UnknownAction(name) => format!(
            "`{}` is not a valid action; valid actions are {}",
            name,
            action_names()
        ),
        MalformedStep::MissingThought => "Your reply has no `thought:` line".to_string(),
        MalformedStep::MissingInput => "Your reply has no input for the action".to_string(),
        MalformedStep::FenceInInput => {
            "Your input contains a ``` line, which would end the payload early; write that content \
             without fence lines (for example with a shell here-document)"
                .to_string()
        }
    }
}

fn action_names() -> String {
    ActionKind::ALL
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
