//! shell 动作：在持久 Shell 中逐条执行语句
//!
//! 遇到第一条非零退出的语句即停止，观察为其 stderr（为空时为 `failed (exit code N)`）；
//! 全部成功时观察为 stdout 的末尾 tail_lines 行。输入不完整（引号、复合命令或 here-doc 未闭合）时什么都不执行。

use async_trait::async_trait;

use crate::core::TaskError;
use crate::protocol::ActionKind;
use crate::shell::split_statements;
use crate::tools::{Action, ActionContext, DispatchResult};

pub struct ShellAction {
    /// 0 表示不截断
    tail_lines: usize,
}

impl ShellAction {
    pub fn new(tail_lines: usize) -> Self {
        Self { tail_lines }
    }
}

#[async_trait]
impl Action for ShellAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Shell
    }

    fn description(&self) -> &str {
        "Run shell commands in a persistent bash session. Directory changes, variables and \
         functions carry over to later steps. Execution stops at the first failing command."
    }

    async fn execute(
        &self,
        ctx: &mut ActionContext,
        input: &str,
    ) -> Result<DispatchResult, TaskError> {
        let statements = match split_statements(input) {
            Ok(statements) => statements,
            Err(e) => return Ok(DispatchResult::Failure(format!("{}; nothing was run", e))),
        };

        let mut stdout = Vec::new();
        for statement in statements {
            let output = ctx.shell_mut().run(&statement).await?;
            if !ctx.adopt_shell_workdir() {
                let back = format!("cd {}", shell_words::quote(&ctx.workdir().to_string_lossy()));
                ctx.shell_mut().run(&back).await?;
                return Ok(DispatchResult::Failure(format!(
                    "leaving the task directory {} is not allowed; stayed in {}",
                    ctx.root().display(),
                    ctx.workdir().display()
                )));
            }
            if !output.success() {
                let message = if output.stderr.trim().is_empty() {
                    format!("failed (exit code {})", output.exit_code)
                } else {
                    output.stderr
                };
                return Ok(DispatchResult::Failure(message));
            }
            if !output.stdout.is_empty() {
                stdout.push(output.stdout);
            }
        }

        let stdout = stdout.join("\n");
        if stdout.trim().is_empty() {
            return Ok(DispatchResult::Success("Success (no output)".to_string()));
        }
        Ok(DispatchResult::Success(tail(&stdout, self.tail_lines)))
    }
}

/// 只保留末尾 n 行，前面加省略标记
fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if n == 0 || lines.len() <= n {
        return text.to_string();
    }
    let omitted = lines.len() - n;
    format!("... ({} lines omitted)\n{}", omitted, lines[omitted..].join("\n"))
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

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\nb", 5), "a\nb");
        assert_eq!(tail("1\n2\n3\n4", 2), "... (2 lines omitted)\n3\n4");
        assert_eq!(tail("1\n2\n3", 0), "1\n2\n3");
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let (dir, mut ctx) = context().await;
        let action = ShellAction::new(5);
        let result = action
            .execute(&mut ctx, "touch one\nls missing-file\ntouch two")
            .await
            .unwrap();
        assert!(matches!(&result, DispatchResult::Failure(msg) if msg.contains("missing-file")));
        assert!(dir.path().join("one").exists());
        assert!(!dir.path().join("two").exists());

        let result = action.execute(&mut ctx, "false").await.unwrap();
        assert_eq!(result, DispatchResult::Failure("failed (exit code 1)".to_string()));
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_output_is_truncated_and_empty_output_reported() {
        let (_dir, mut ctx) = context().await;
        let action = ShellAction::new(3);
        let result = action.execute(&mut ctx, "seq 1 10").await.unwrap();
        assert_eq!(
            result,
            DispatchResult::Success("... (7 lines omitted)\n8\n9\n10".to_string())
        );

        let result = action.execute(&mut ctx, "X=1\n# nothing to print").await.unwrap();
        assert_eq!(result, DispatchResult::Success("Success (no output)".to_string()));
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_multiline_constructs() {
        let (_dir, mut ctx) = context().await;
        let action = ShellAction::new(0);
        let script = "cat <<EOF > list.txt\nb\na\nEOF\nfor f in list.txt; do\n  sort \"$f\"\ndone";
        let result = action.execute(&mut ctx, script).await.unwrap();
        assert_eq!(result, DispatchResult::Success("a\nb".to_string()));

        let script = "greet() {\n  echo \"hi $1\"\n}\nNAME=bob\ngreet \"$NAME\"";
        let result = action.execute(&mut ctx, script).await.unwrap();
        assert_eq!(result, DispatchResult::Success("hi bob".to_string()));
        let result = action.execute(&mut ctx, "greet again").await.unwrap();
        assert_eq!(result, DispatchResult::Success("hi again".to_string()));
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_incomplete_input_is_rejected_without_running() {
        let (dir, mut ctx) = context().await;
        let action = ShellAction::new(5);
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            action.execute(&mut ctx, "touch first.txt\necho don't panic"),
        )
        .await
        .expect("incomplete input must not reach the shell")
        .unwrap();
        assert!(matches!(&result, DispatchResult::Failure(msg) if msg.contains("quote")));
        assert!(!dir.path().join("first.txt").exists());

        let result = action.execute(&mut ctx, "echo ok").await.unwrap();
        assert_eq!(result, DispatchResult::Success("ok".to_string()));
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_exit_stops_the_rest_of_the_statement() {
        let (dir, mut ctx) = context().await;
        let action = ShellAction::new(5);
        let result = action
            .execute(&mut ctx, "test -f missing || exit 1; touch after.txt; echo continued")
            .await
            .unwrap();
        assert!(matches!(&result, DispatchResult::Failure(msg) if msg.contains("exit code 1")));
        assert!(!dir.path().join("after.txt").exists());

        let result = action.execute(&mut ctx, "pwd").await.unwrap();
        assert_eq!(result.observation(), dir.path().canonicalize().unwrap().display().to_string());
        ctx.shutdown().await;
    }
}
