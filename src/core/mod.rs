//! 核心：错误分类、恢复策略与优雅关闭

pub mod error;
pub mod recovery;
pub mod shutdown;

pub use error::{RecoveryAction, TaskError};
pub use recovery::RecoveryEngine;
pub use shutdown::ShutdownManager;
