//! 持久 Shell：长期运行的 Shell 进程与多行输入的语句切分

pub mod session;
pub mod split;

pub use session::{CommandOutput, ShellError, ShellSession};
pub use split::{split_statements, IncompleteInput};
