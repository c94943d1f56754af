//! 可观测性：tracing 初始化与运行事件

pub mod events;

pub use events::{ConsoleSink, EventSink, NoopSink, RunEvent, StreamKind};

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// 初始化日志：stderr 按 verbosity（0=warn, 1=info, 2+=debug），设置了 RUST_LOG 时以其为准；
/// 指定 debug_log 时另写一份 debug 级别日志到该文件。返回的 guard 需持有到进程结束。
pub fn init(verbosity: u8, debug_log: Option<&Path>) -> std::io::Result<Option<WorkerGuard>> {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    let stderr_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    let (file_layer, guard) = match debug_log {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // 重复初始化（如测试中）时保留已有的订阅者
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    Ok(guard)
}
