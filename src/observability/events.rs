//! 运行过程事件：思考、动作、Shell 输出行、观察、重试与结束
//!
//! 调试展示不依赖全局状态：运行器、分发器与 Shell 会话都持有同一个 `Arc<dyn EventSink>`。
//! 终端用 [`ConsoleSink`]，测试可用 `mpsc::UnboundedSender<RunEvent>` 收集事件。

use console::style;
use serde::Serialize;
use tokio::sync::mpsc;

/// Shell 输出流
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// 开始第 step 轮（从 1 计）
    StepStarted { step: usize, max_steps: usize },
    /// 模型给出的一步
    Proposal {
        step: usize,
        thought: String,
        action: String,
        input: String,
    },
    /// 动作结果
    Observation { step: usize, text: String },
    /// 送入持久 Shell 的一条语句
    ShellCommand { command: String },
    /// Shell 实时输出的一行
    ShellLine { stream: StreamKind, line: String },
    /// 回复不合法，已追加纠正提示
    Retry { attempt: usize, reason: String },
    /// 运行结束
    Finished { completed: bool, steps: usize },
}

/// 事件接收端
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: RunEvent) {}
}

impl EventSink for mpsc::UnboundedSender<RunEvent> {
    fn emit(&self, event: RunEvent) {
        // 接收端已关闭时静默丢弃
        let _ = self.send(event);
    }
}

/// 终端调试输出
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: RunEvent) {
        match event {
            RunEvent::StepStarted { .. } => {}
            RunEvent::Proposal {
                step,
                thought,
                action,
                input,
            } => {
                println!("{} {}", style(format!("Step {}:", step)).cyan().bold(), thought);
                println!("{} {}", style("Action:").magenta().bold(), action);
                if !input.is_empty() {
                    println!("{}", input);
                }
            }
            RunEvent::ShellCommand { command } => {
                println!("{} {}", style("$").green().bold(), command);
            }
            RunEvent::ShellLine {
                stream: StreamKind::Stdout,
                line,
            } => println!("{}", line),
            RunEvent::ShellLine {
                stream: StreamKind::Stderr,
                line,
            } => eprintln!("{}", style(line).red()),
            RunEvent::Observation { text, .. } => {
                println!("{}", style("Observation:").yellow().bold());
                println!("{}", text);
            }
            RunEvent::Retry { attempt, reason } => {
                println!("{}", style(format!("retry {}: {}", attempt, reason)).dim());
            }
            RunEvent::Finished { completed: true, .. } => {
                println!("{}", style("Task completed successfully").green().bold());
            }
            RunEvent::Finished { completed: false, .. } => {
                println!(
                    "{}",
                    style("The maximum number of steps has been reached").yellow().bold()
                );
            }
        }
    }
}
