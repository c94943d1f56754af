//! python 动作：每次调用启动一个 `python3 -c <input>`，在当前目录执行
//!
//! stdout 与 stderr 指向同一个管道，观察按实际写出顺序交错。

use std::io::Read;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::TaskError;
use crate::protocol::ActionKind;
use crate::tools::{Action, ActionContext, DispatchResult};

pub struct PythonAction {
    program: String,
}

impl PythonAction {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

#[async_trait]
impl Action for PythonAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Python
    }

    fn description(&self) -> &str {
        "Run a Python 3 script in the current directory. Input is the script source; \
         stdout and stderr are returned. Nothing persists between python steps."
    }

    async fn execute(
        &self,
        ctx: &mut ActionContext,
        input: &str,
    ) -> Result<DispatchResult, TaskError> {
        let (mut reader, writer) = std::io::pipe()?;
        let mut command = Command::new(&self.program);
        command
            .arg("-c")
            .arg(input)
            .current_dir(ctx.workdir())
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer)
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|source| TaskError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        // 父进程持有的写端必须关闭，读端才能读到 EOF
        drop(command);

        let collect = tokio::task::spawn_blocking(move || {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map(|_| buf)
        });
        let status = child.wait().await?;
        let combined = collect.await.map_err(std::io::Error::other)??;

        let text = String::from_utf8_lossy(&combined);
        let text = text.trim_end_matches('\n');

        tracing::debug!(status = ?status.code(), bytes = text.len(), "python finished");
        if status.success() {
            if text.is_empty() {
                return Ok(DispatchResult::Success("Success (no output)".to_string()));
            }
            return Ok(DispatchResult::Success(text.to_string()));
        }
        if text.is_empty() {
            return Ok(DispatchResult::Failure(format!(
                "failed (exit code {})",
                status.code().unwrap_or(-1)
            )));
        }
        Ok(DispatchResult::Failure(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellSection;
    use crate::observability::NoopSink;
    use crate::shell::ShellSession;
    use std::sync::Arc;

    async fn context() -> (tempfile::TempDir, ActionContext) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let shell = ShellSession::start(&ShellSection::default(), &root, Arc::new(NoopSink))
            .await
            .unwrap();
        (dir, ActionContext::new(root, false, shell))
    }

    #[tokio::test]
    async fn test_output_keeps_write_order() {
        let (_dir, mut ctx) = context().await;
        let action = PythonAction::new("python3");
        let script = "import sys\nprint('one')\nsys.stderr.write('two\\n')\nprint('three')";
        let result = action.execute(&mut ctx, script).await.unwrap();
        assert_eq!(result, DispatchResult::Success("one\ntwo\nthree".to_string()));
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_and_empty_output() {
        let (dir, mut ctx) = context().await;
        let action = PythonAction::new("python3");

        let result = action
            .execute(&mut ctx, "open('made.txt', 'w').write('x')")
            .await
            .unwrap();
        assert_eq!(result, DispatchResult::Success("Success (no output)".to_string()));
        assert!(dir.path().join("made.txt").exists());

        let result = action.execute(&mut ctx, "import sys\nsys.exit(4)").await.unwrap();
        assert_eq!(result, DispatchResult::Failure("failed (exit code 4)".to_string()));

        let result = action.execute(&mut ctx, "raise ValueError('bad')").await.unwrap();
        assert!(matches!(&result, DispatchResult::Failure(msg) if msg.contains("ValueError: bad")));
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_fatal() {
        let (_dir, mut ctx) = context().await;
        let action = PythonAction::new("/nonexistent/python");
        let err = action.execute(&mut ctx, "print(1)").await.unwrap_err();
        assert!(matches!(err, TaskError::Spawn { .. }));
        ctx.shutdown().await;
    }
}
