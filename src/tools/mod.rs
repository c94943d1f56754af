//! 动作层：注册表、分发器与五个副作用动作（file / shell / python / search / cd）

pub mod cd;
pub mod dispatcher;
pub mod file;
pub mod python;
pub mod registry;
pub mod search;
pub mod shell;

pub use cd::CdAction;
pub use dispatcher::{ActionDispatcher, DispatchResult};
pub use file::FileAction;
pub use python::PythonAction;
pub use registry::{normalize, Action, ActionContext, ActionRegistry};
pub use search::{SearchAction, SearchHit};
pub use shell::ShellAction;
