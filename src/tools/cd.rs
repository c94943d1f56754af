//! cd 动作：切换分发器与持久 Shell 的当前目录

use async_trait::async_trait;

use crate::core::TaskError;
use crate::protocol::{parse_dir, ActionKind};
use crate::tools::{Action, ActionContext, DispatchResult};

pub struct CdAction {
    create_missing: bool,
}

impl CdAction {
    pub fn new(create_missing: bool) -> Self {
        Self { create_missing }
    }
}

#[async_trait]
impl Action for CdAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Cd
    }

    fn description(&self) -> &str {
        "Change the current directory for all later actions. Input is `dir: <path>`."
    }

    async fn execute(
        &self,
        ctx: &mut ActionContext,
        input: &str,
    ) -> Result<DispatchResult, TaskError> {
        let dir = match parse_dir(input) {
            Ok(dir) => dir,
            Err(e) => return Ok(DispatchResult::Failure(e.to_string())),
        };
        let target = match ctx.resolve(&dir) {
            Ok(target) => target,
            Err(msg) => return Ok(DispatchResult::Failure(msg)),
        };

        if !target.is_dir() {
            if target.exists() || !self.create_missing {
                return Ok(DispatchResult::Failure(format!(
                    "{} is not a directory",
                    target.display()
                )));
            }
            if let Err(e) = tokio::fs::create_dir_all(&target).await {
                return Ok(DispatchResult::Failure(format!(
                    "failed to create {}: {}",
                    target.display(),
                    e
                )));
            }
        }

        let command = format!("cd {}", shell_words::quote(&target.to_string_lossy()));
        let output = ctx.shell_mut().run(&command).await?;
        if !output.success() {
            return Ok(DispatchResult::Failure(output.stderr));
        }
        ctx.set_workdir(target);
        Ok(DispatchResult::Success("Success".to_string()))
    }
}
