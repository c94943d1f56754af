//! 动作注册表
//!
//! 所有动作实现 Action trait（kind / description / execute），由 ActionRegistry 按 ActionKind 注册与查找。
//! 动作共享一个 ActionContext：任务根目录、当前工作目录与持久 Shell。

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::TaskError;
use crate::protocol::ActionKind;
use crate::shell::ShellSession;
use crate::tools::DispatchResult;

/// 动作 trait：种类、描述（供提示词使用）、异步执行
///
/// 返回 `Ok(Failure(..))` 表示普通失败，作为观察交给模型；`Err` 只用于致命错误。
#[async_trait]
pub trait Action: Send + Sync {
    fn kind(&self) -> ActionKind;

    fn description(&self) -> &str;

    async fn execute(&self, ctx: &mut ActionContext, input: &str)
        -> Result<DispatchResult, TaskError>;
}

/// 动作注册表：按 ActionKind 存储 Arc<dyn Action>
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<ActionKind, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: impl Action + 'static) {
        self.actions.insert(action.kind(), Arc::new(action));
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn Action>> {
        self.actions.get(&kind).cloned()
    }

    /// 已注册的动作种类，按 ActionKind::ALL 的顺序
    pub fn kinds(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|k| self.actions.contains_key(k))
            .collect()
    }

    /// 返回 (name, description) 列表，用于生成提示词中的动作段落
    pub fn descriptions(&self) -> Vec<(&'static str, String)> {
        self.kinds()
            .into_iter()
            .filter_map(|k| {
                self.actions
                    .get(&k)
                    .map(|a| (k.as_str(), a.description().to_string()))
            })
            .collect()
    }
}

/// 动作执行上下文
#[derive(Debug)]
pub struct ActionContext {
    root: PathBuf,
    workdir: PathBuf,
    confine_to_root: bool,
    shell: ShellSession,
}

impl ActionContext {
    /// root 应为已规范化的绝对路径；初始工作目录取 Shell 握手时报告的目录
    pub fn new(root: PathBuf, confine_to_root: bool, shell: ShellSession) -> Self {
        Self {
            workdir: shell.workdir().to_path_buf(),
            root,
            confine_to_root,
            shell,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn shell_mut(&mut self) -> &mut ShellSession {
        &mut self.shell
    }

    /// 相对路径基于当前目录解析并做词法规范化；开启根目录限制时拒绝根外路径（错误为观察文本）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let path = path.trim();
        if path.is_empty() {
            return Err("path must be specified".to_string());
        }
        let resolved = normalize(&self.workdir.join(path));
        if !self.allows(&resolved) {
            return Err(format!(
                "path {} is outside of the task directory {}",
                resolved.display(),
                self.root.display()
            ));
        }
        Ok(resolved)
    }

    fn allows(&self, path: &Path) -> bool {
        !self.confine_to_root || path.starts_with(&self.root)
    }

    pub fn set_workdir(&mut self, dir: PathBuf) {
        self.workdir = dir;
    }

    /// 采用 Shell 报告的目录；受根目录限制且 Shell 已离开根目录时不采用，返回 false
    pub fn adopt_shell_workdir(&mut self) -> bool {
        let dir = normalize(self.shell.workdir());
        if !self.allows(&dir) {
            return false;
        }
        self.workdir = dir;
        true
    }

    /// 关闭 Shell（可重复调用）
    pub async fn shutdown(&mut self) {
        self.shell.shutdown().await;
    }
}

/// 词法规范化：去掉 `.`，`..` 回退一级（不越过根），不访问文件系统
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
