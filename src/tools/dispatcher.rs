//! 动作分发器
//!
//! 持有 ActionRegistry 与 ActionContext；每个有效步骤恰好执行一个动作，
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Instant;

use crate::config::AppConfig;
use crate::core::TaskError;
use crate::observability::EventSink;
use crate::protocol::{ActionKind, Proposal};
use crate::shell::ShellSession;
use crate::tools::{
    ActionContext, ActionRegistry, CdAction, FileAction, PythonAction, SearchAction, ShellAction,
};

/// 单个动作的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Success(String),
    /// 普通失败，诊断文本作为观察交给模型
    Failure(String),
    /// 没有对应实现（协议层信号，可重试）
    InvalidAction(String),
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchResult::Success(_))
    }

    /// 作为观察交给模型的文本
    pub fn observation(&self) -> &str {
        match self {
            DispatchResult::Success(text)
            | DispatchResult::Failure(text)
            | DispatchResult::InvalidAction(text) => text,
        }
    }
}

/// 动作分发器
pub struct ActionDispatcher {
    registry: ActionRegistry,
    ctx: ActionContext,
}

impl ActionDispatcher {
    pub fn new(registry: ActionRegistry, ctx: ActionContext) -> Self {
        Self { registry, ctx }
    }

    /// 按配置创建根目录、启动持久 Shell 并注册动作（search 可关闭）
    pub async fn from_config(
        config: &AppConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, TaskError> {
        std::fs::create_dir_all(&config.run.workdir)?;
        let root = config.run.workdir.canonicalize()?;
        let shell = ShellSession::start(&config.shell, &root, sink).await?;

        let mut registry = ActionRegistry::new();
        registry.register(FileAction);
        registry.register(ShellAction::new(config.shell.tail_lines));
        registry.register(PythonAction::new(&config.python.program));
        if config.search.enabled {
            registry.register(SearchAction::new(&config.search)?);
        }
        registry.register(CdAction::new(config.run.create_missing_dirs));

        tracing::info!(
            root = %root.display(),
            actions = ?registry.kinds(),
            "dispatcher ready"
        );
        let ctx = ActionContext::new(root, config.run.confine_to_root, shell);
        Ok(Self::new(registry, ctx))
    }

    /// 执行一个已校验的步骤；done 与未注册的动作返回 InvalidAction
    pub async fn dispatch(&mut self, proposal: &Proposal) -> Result<DispatchResult, TaskError> {
        let kind = proposal.action;
        let action = match self.registry.get(kind) {
            Some(action) if kind != ActionKind::Done => action,
            _ => return Ok(DispatchResult::InvalidAction(kind.to_string())),
        };

        let start = Instant::now();
        let result = action.execute(&mut self.ctx, &proposal.input).await;

        let outcome = match &result {
            Ok(DispatchResult::Success(_)) => "ok",
            Ok(DispatchResult::Failure(_)) => "failure",
            Ok(DispatchResult::InvalidAction(_)) => "invalid",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "action_audit",
            "action": kind.as_str(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "workdir": self.ctx.workdir().display().to_string(),
            "input_preview": preview(&proposal.input),
        });
        tracing::info!(audit = %audit, "action");

        result
    }

    /// 已注册动作的 (name, description)，按固定顺序
    pub fn available_actions(&self) -> Vec<(&'static str, String)> {
        self.registry.descriptions()
    }

    pub fn workdir(&self) -> &std::path::Path {
        self.ctx.workdir()
    }

    /// 关闭持久 Shell；可重复调用
    pub async fn shutdown(&mut self) {
        self.ctx.shutdown().await;
    }
}

fn preview(input: &str) -> String {
    if input.chars().count() > 200 {
        format!("{}...", input.chars().take(200).collect::<String>())
    } else {
        input.to_string()
    }
}
