//! 任务运行循环：请求模型 -> 解码 -> 分发动作 -> 回传观察，直到 done 或步数用尽

pub mod loop_;

pub use loop_::{RunOptions, RunOutcome, TaskRunner};
