//! file 动作：把内容写入文件（自动创建父目录）

use async_trait::async_trait;

use crate::core::TaskError;
use crate::protocol::{ActionKind, FilePayload};
use crate::tools::{Action, ActionContext, DispatchResult};

pub struct FileAction;

#[async_trait]
impl Action for FileAction {
    fn kind(&self) -> ActionKind {
        ActionKind::File
    }

    fn description(&self) -> &str {
        "Write a file. Input is `path: <path>` and `content: |` followed by the indented content. \
         Relative paths are resolved against the current directory; parent directories are created."
    }

    async fn execute(
        &self,
        ctx: &mut ActionContext,
        input: &str,
    ) -> Result<DispatchResult, TaskError> {
        let payload = match FilePayload::parse(input) {
            Ok(payload) => payload,
            Err(e) => return Ok(DispatchResult::Failure(e.to_string())),
        };
        let path = match ctx.resolve(&payload.path) {
            Ok(path) => path,
            Err(msg) => return Ok(DispatchResult::Failure(msg)),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(DispatchResult::Failure(format!(
                    "failed to create {}: {}",
                    parent.display(),
                    e
                )));
            }
        }
        match tokio::fs::write(&path, payload.content.as_bytes()).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), bytes = payload.content.len(), "file written");
                Ok(DispatchResult::Success("Success".to_string()))
            }
            Err(e) => Ok(DispatchResult::Failure(format!(
                "failed to write {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
