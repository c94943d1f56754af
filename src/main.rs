//! taskrun 命令行入口
//!
//! 解析参数、加载配置、初始化日志，创建 OpenAI 兼容客户端与动作分发器，运行任务。

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use taskrun::config::load_config;
use taskrun::core::ShutdownManager;
use taskrun::llm::OpenAiClient;
use taskrun::observability::{self, ConsoleSink, EventSink};
use taskrun::react::{RunOptions, TaskRunner};
use taskrun::tools::ActionDispatcher;

/// 用自然语言描述任务，由模型逐步执行 shell / python / 文件等动作完成
#[derive(Debug, Parser)]
#[command(name = "taskrun", version, about)]
struct Cli {
    /// 要完成的任务
    task: String,

    /// 模型名（覆盖 llm.model）
    #[arg(short, long)]
    model: Option<String>,

    /// 任务根目录（覆盖 run.workdir）
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// 最多执行的动作数（覆盖 run.max_steps）
    #[arg(long)]
    max_steps: Option<usize>,

    /// 额外的配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 提高日志级别（-v info，-vv debug）
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// 追加 debug 日志到文件
    #[arg(long)]
    debug_log: Option<PathBuf>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL")]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = match observability::init(cli.verbose, cli.debug_log.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to open debug log: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.clone()).context("Failed to load config")?;
    if let Some(model) = cli.model {
        config.llm.model = model;
    }
    if let Some(workdir) = cli.workdir {
        config.run.workdir = workdir;
    }
    if let Some(max_steps) = cli.max_steps {
        config.run.max_steps = max_steps;
    }
    let api_key = cli
        .api_key
        .filter(|key| !key.is_empty())
        .context("OPENAI_API_KEY is not set")?;
    let base_url = config.llm.base_url.clone().or(cli.base_url);

    let llm = Arc::new(OpenAiClient::new(
        base_url.as_deref(),
        &config.llm.model,
        &api_key,
    ));
    let sink: Arc<dyn EventSink> = Arc::new(ConsoleSink);
    let dispatcher = ActionDispatcher::from_config(&config, Arc::clone(&sink))
        .await
        .context("Failed to start task environment")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    tracing::info!(model = %config.llm.model, workdir = %dispatcher.workdir().display(), "starting task");
    TaskRunner::new(llm, dispatcher)
        .with_sink(sink)
        .with_options(RunOptions::from_config(&config))
        .run(&cli.task, shutdown.token())
        .await?;
    Ok(())
}
