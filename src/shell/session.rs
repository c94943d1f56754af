//! 持久 Shell 会话
//!
//! 一个长期运行的 Shell 进程，状态（当前目录、变量、函数）在多次命令间保留。
//! 每条命令后追加一行 `echo "<token>,$?,$PWD"`，读到该哨兵即知命令结束，同时得到退出码与新的工作目录。
//! stdout / stderr 各由一个后台任务按行转发到通道，主循环用 select 同时消费，并实时发出 ShellLine 事件。
//!
//! 命令里的 `exit` 会结束整个 Shell（与普通脚本一致，语句的剩余部分不再执行）；被信号杀死同理。
//! 此时回收进程、在 stderr 里附上重启说明、在原工作目录（不存在则退回根目录）重启一个新 Shell，
//! 本条命令报告原进程的退出码。重启后变量与函数不再保留。

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::ShellSection;
use crate::observability::{EventSink, RunEvent, StreamKind};

/// 哨兵前缀，后接每个会话独立的 uuid
const SENTINEL_PREFIX: &str = "TASKRUN-COMMAND-END-";

/// Shell 退出后继续收集剩余输出的时间
const EXIT_DRAIN: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("failed to start shell `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shell {0} pipe unavailable")]
    MissingPipe(&'static str),

    #[error("failed to write to shell: {0}")]
    Write(#[source] std::io::Error),

    #[error("shell output closed before it became ready{}", stderr_suffix(.stderr))]
    StreamsClosed { stderr: String },

    #[error("malformed completion marker: {0}")]
    MalformedSentinel(String),

    #[error("shell is not running")]
    NotRunning,
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

/// 单条命令的结果；输出按行收集，行间以 `\n` 连接，不含末尾换行
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

struct ShellProcess {
    child: Child,
    stdin: ChildStdin,
    stdout_rx: mpsc::UnboundedReceiver<String>,
    stderr_rx: mpsc::UnboundedReceiver<String>,
}

/// 读到哨兵
struct Sentinel {
    exit_code: i32,
    cwd: PathBuf,
}

enum ReadOutcome {
    Completed(Sentinel),
    /// Shell 在打印哨兵前退出
    Exited(Option<ExitStatus>),
}

/// 一次读取过程中累积的输出
struct Collector<'a> {
    token: &'a str,
    sink: Option<&'a dyn EventSink>,
    stdout: Vec<String>,
    stderr: Vec<String>,
}

impl<'a> Collector<'a> {
    fn new(token: &'a str, sink: Option<&'a dyn EventSink>) -> Self {
        Self {
            token,
            sink,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// 处理一行 stdout；是哨兵行时返回解析结果（哨兵前的部分仍计入输出）
    fn stdout_line(&mut self, line: String) -> Result<Option<Sentinel>, ShellError> {
        let Some(idx) = line.find(self.token) else {
            self.push(StreamKind::Stdout, line);
            return Ok(None);
        };
        let marker = &line[idx + self.token.len()..];
        let sentinel = parse_sentinel(marker).ok_or_else(|| ShellError::MalformedSentinel(line.clone()))?;
        if idx > 0 {
            self.push(StreamKind::Stdout, line[..idx].to_string());
        }
        Ok(Some(sentinel))
    }

    fn push(&mut self, stream: StreamKind, line: String) {
        if let Some(sink) = self.sink {
            sink.emit(RunEvent::ShellLine {
                stream,
                line: line.clone(),
            });
        }
        match stream {
            StreamKind::Stdout => self.stdout.push(line),
            StreamKind::Stderr => self.stderr.push(line),
        }
    }
}

/// 解析哨兵 token 之后的 `,<code>,<cwd>`；cwd 中可以含逗号
fn parse_sentinel(marker: &str) -> Option<Sentinel> {
    let rest = marker.strip_prefix(',')?;
    let (code, cwd) = rest.split_once(',')?;
    Some(Sentinel {
        exit_code: code.trim().parse().ok()?,
        cwd: PathBuf::from(cwd),
    })
}

/// 按行转发子进程输出；容忍非 UTF-8 字节
fn forward_lines<R>(reader: R) -> mpsc::UnboundedReceiver<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches('\n').trim_end_matches('\r');
                    if tx.send(line.to_string()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

impl ShellProcess {
    async fn write(&mut self, text: &str) -> std::io::Result<()> {
        self.stdin.write_all(text.as_bytes()).await?;
        self.stdin.flush().await
    }

    /// 收集输出直到哨兵出现，或 Shell 退出且剩余输出已读完（最多再等 EXIT_DRAIN）
    async fn read_until_sentinel(
        &mut self,
        collector: &mut Collector<'_>,
    ) -> Result<ReadOutcome, ShellError> {
        let mut stdout_open = true;
        let mut stderr_open = true;

        let status = loop {
            tokio::select! {
                line = self.stdout_rx.recv(), if stdout_open => match line {
                    Some(line) => {
                        if let Some(sentinel) = collector.stdout_line(line)? {
                            self.drain_stderr(collector);
                            return Ok(ReadOutcome::Completed(sentinel));
                        }
                    }
                    None => stdout_open = false,
                },
                line = self.stderr_rx.recv(), if stderr_open => match line {
                    Some(line) => collector.push(StreamKind::Stderr, line),
                    None => stderr_open = false,
                },
                status = self.child.wait() => break status.ok(),
            }
        };

        let deadline = Instant::now() + EXIT_DRAIN;
        while stdout_open || stderr_open {
            tokio::select! {
                line = self.stdout_rx.recv(), if stdout_open => match line {
                    Some(line) => {
                        if let Some(sentinel) = collector.stdout_line(line)? {
                            self.drain_stderr(collector);
                            return Ok(ReadOutcome::Completed(sentinel));
                        }
                    }
                    None => stdout_open = false,
                },
                line = self.stderr_rx.recv(), if stderr_open => match line {
                    Some(line) => collector.push(StreamKind::Stderr, line),
                    None => stderr_open = false,
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        Ok(ReadOutcome::Exited(status))
    }

    /// 哨兵到达后，已经转发进通道的 stderr 行一并归入本条命令
    fn drain_stderr(&mut self, collector: &mut Collector<'_>) {
        while let Ok(line) = self.stderr_rx.try_recv() {
            collector.push(StreamKind::Stderr, line);
        }
    }
}

/// 以 Shell 惯例表示退出状态：被信号终止时为 128 + 信号值
fn status_code(status: Option<ExitStatus>) -> i32 {
    let Some(status) = status else {
        return -1;
    };
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// 持久 Shell 会话
pub struct ShellSession {
    program: String,
    args: Vec<String>,
    grace: Duration,
    token: String,
    sink: Arc<dyn EventSink>,
    root: PathBuf,
    workdir: PathBuf,
    process: Option<ShellProcess>,
}

impl std::fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSession")
            .field("program", &self.program)
            .field("workdir", &self.workdir)
            .field("running", &self.process.is_some())
            .finish()
    }
}

impl ShellSession {
    /// 在 workdir 启动 Shell 并完成握手（读到第一个哨兵）
    pub async fn start(
        config: &ShellSection,
        workdir: &Path,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ShellError> {
        let mut session = Self {
            program: config.program.clone(),
            args: config.args.clone(),
            grace: Duration::from_secs(config.shutdown_grace_secs),
            token: format!("{}{}", SENTINEL_PREFIX, uuid::Uuid::new_v4().simple()),
            sink,
            root: workdir.to_path_buf(),
            workdir: workdir.to_path_buf(),
            process: None,
        };
        session.spawn(workdir).await?;
        tracing::info!(program = %session.program, workdir = %session.workdir.display(), "shell started");
        Ok(session)
    }

    fn trailer(&self) -> String {
        format!("echo \"{},$?,$PWD\"\n", self.token)
    }

    async fn spawn(&mut self, dir: &Path) -> Result<(), ShellError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ShellError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(ShellError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ShellError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ShellError::MissingPipe("stderr"))?;
        let mut process = ShellProcess {
            child,
            stdin,
            stdout_rx: forward_lines(stdout),
            stderr_rx: forward_lines(stderr),
        };

        let handshake = self.trailer();
        let mut collector = Collector::new(&self.token, None);
        let outcome = match process.write(&handshake).await {
            Ok(()) => process.read_until_sentinel(&mut collector).await?,
            Err(_) => ReadOutcome::Exited(process.child.wait().await.ok()),
        };
        match outcome {
            ReadOutcome::Completed(sentinel) => {
                self.workdir = sentinel.cwd;
                self.process = Some(process);
                Ok(())
            }
            ReadOutcome::Exited(_) => Err(ShellError::StreamsClosed {
                stderr: collector.stderr.join("\n"),
            }),
        }
    }

    /// Shell 当前工作目录（最近一次哨兵报告的 $PWD）
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// 执行一条语句并等待完成；非零退出码不是错误
    pub async fn run(&mut self, command: &str) -> Result<CommandOutput, ShellError> {
        if self.process.is_none() {
            return Err(ShellError::NotRunning);
        }
        self.sink.emit(RunEvent::ShellCommand {
            command: command.to_string(),
        });
        tracing::debug!(command, "shell run");

        // 命令不得读取 Shell 自身的 stdin（那是后续命令的来源）
        let script = format!("{{ {}\n}} < /dev/null\n{}", command, self.trailer());
        let token = self.token.clone();
        let sink = Arc::clone(&self.sink);
        let mut collector = Collector::new(&token, Some(sink.as_ref()));
        let process = self.process.as_mut().ok_or(ShellError::NotRunning)?;
        let outcome = match process.write(&script).await {
            Ok(()) => process.read_until_sentinel(&mut collector).await?,
            // 写入失败通常是 Shell 已经退出
            Err(e) => match tokio::time::timeout(EXIT_DRAIN, process.child.wait()).await {
                Ok(Ok(status)) => ReadOutcome::Exited(Some(status)),
                _ => return Err(ShellError::Write(e)),
            },
        };

        let exit_code = match outcome {
            ReadOutcome::Completed(sentinel) => {
                self.workdir = sentinel.cwd;
                sentinel.exit_code
            }
            ReadOutcome::Exited(status) => {
                let code = status_code(status);
                self.process = None;
                let dir = if self.workdir.is_dir() {
                    self.workdir.clone()
                } else {
                    self.root.clone()
                };
                tracing::warn!(exit_code = code, dir = %dir.display(), "shell exited unexpectedly, restarting");
                self.spawn(&dir).await?;
                let notice = format!(
                    "shell exited unexpectedly (exit code {}); restarted in {}",
                    code,
                    self.workdir.display()
                );
                collector.push(StreamKind::Stderr, notice);
                code
            }
        };

        Ok(CommandOutput {
            stdout: collector.stdout.join("\n"),
            stderr: collector.stderr.join("\n"),
            exit_code,
        })
    }

    /// 关闭 Shell：关闭 stdin 等其自行退出，超过宽限时间则强杀。可重复调用。
    pub async fn shutdown(&mut self) -> Option<ExitStatus> {
        let ShellProcess {
            mut child, stdin, ..
        } = self.process.take()?;
        drop(stdin);

        let status = match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(status) => status.ok(),
            Err(_) => {
                tracing::warn!(grace = ?self.grace, "shell did not exit in time, killing");
                let _ = child.kill().await;
                child.wait().await.ok()
            }
        };
        tracing::info!(exit_code = status_code(status), "shell stopped");
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NoopSink;

    async fn start_in(dir: &Path) -> ShellSession {
        ShellSession::start(&ShellSection::default(), dir, Arc::new(NoopSink))
            .await
            .unwrap()
    }

    #[test]
    fn test_parse_sentinel() {
        let s = parse_sentinel(",0,/tmp/a,b").unwrap();
        assert_eq!(s.exit_code, 0);
        assert_eq!(s.cwd, PathBuf::from("/tmp/a,b"));
        assert!(parse_sentinel(",x,/tmp").is_none());
        assert!(parse_sentinel("0,/tmp").is_none());
    }

    #[tokio::test]
    async fn test_output_and_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut shell = start_in(&root).await;
        assert_eq!(shell.workdir(), root.as_path());

        let out = shell.run("echo hello; echo oops >&2").await.unwrap();
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr, "oops");
        assert!(out.success());

        let out = shell.run("pwd").await.unwrap();
        assert_eq!(out.stdout, root.display().to_string());
        shell.shutdown().await;
    }

    #[tokio::test]
    async fn test_state_persists_between_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = start_in(dir.path()).await;

        shell.run("mkdir -p sub && cd sub").await.unwrap();
        assert!(shell.workdir().ends_with("sub"));
        shell.run("GREETING=hi").await.unwrap();
        let out = shell.run("echo $GREETING from $(basename $PWD)").await.unwrap();
        assert_eq!(out.stdout, "hi from sub");
        shell.shutdown().await;
    }

    #[tokio::test]
    async fn test_output_without_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = start_in(dir.path()).await;
        let out = shell.run("printf 'no newline'").await.unwrap();
        assert_eq!(out.stdout, "no newline");
        assert_eq!(out.exit_code, 0);
        shell.shutdown().await;
    }

    #[tokio::test]
    async fn test_exit_ends_the_statement() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut shell = start_in(&root).await;
        let out = shell.run("exit 3; echo after").await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout, "");
        assert!(out.stderr.contains("restarted"));

        let out = shell.run("echo still here; pwd").await.unwrap();
        assert_eq!(out.stdout, format!("still here\n{}", root.display()));
        shell.shutdown().await;
    }

    #[tokio::test]
    async fn test_commands_do_not_consume_shell_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = start_in(dir.path()).await;
        let out = shell.run("cat").await.unwrap();
        assert_eq!(out.stdout, "");
        assert!(out.success());
        shell.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_after_shell_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = start_in(dir.path()).await;
        shell.run("mkdir -p keep && cd keep").await.unwrap();

        let out = shell.run("echo bye; kill -9 $$").await.unwrap();
        assert_eq!(out.exit_code, 137);
        assert_eq!(out.stdout, "bye");
        assert!(out.stderr.contains("restarted"));
        assert!(shell.is_running());
        assert!(shell.workdir().ends_with("keep"));

        let out = shell.run("echo alive").await.unwrap();
        assert_eq!(out.stdout, "alive");
        shell.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = start_in(dir.path()).await;
        let status = shell.shutdown().await;
        assert!(status.map(|s| s.success()).unwrap_or(false));
        assert!(shell.shutdown().await.is_none());
        assert!(matches!(shell.run("echo x").await, Err(ShellError::NotRunning)));
    }

    #[tokio::test]
    async fn test_start_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = ShellSection {
            program: "/nonexistent/shell".to_string(),
            ..ShellSection::default()
        };
        let err = ShellSession::start(&config, dir.path(), Arc::new(NoopSink))
            .await
            .unwrap_err();
        assert!(matches!(err, ShellError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_lines_are_emitted_as_events() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut shell = ShellSession::start(&ShellSection::default(), dir.path(), Arc::new(tx))
            .await
            .unwrap();
        shell.run("echo one; echo two >&2").await.unwrap();
        shell.shutdown().await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events[0],
            RunEvent::ShellCommand {
                command: "echo one; echo two >&2".to_string()
            }
        );
        assert!(events.contains(&RunEvent::ShellLine {
            stream: StreamKind::Stdout,
            line: "one".to_string()
        }));
        assert!(events.contains(&RunEvent::ShellLine {
            stream: StreamKind::Stderr,
            line: "two".to_string()
        }));
    }
}
