//! taskrun - 自然语言任务执行器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、恢复策略、优雅关闭
//! - **llm**: 补全客户端抽象与实现（OpenAI 兼容 / 脚本化 Mock）
//! - **memory**: 单次任务内的对话历史（检查点与回滚）
//! - **observability**: tracing 初始化与运行事件
//! - **prompts**: 系统提示词
//! - **protocol**: 单步文本编解码与动作载荷
//! - **react**: 任务主循环
//! - **shell**: 持久 Shell 会话与语句切分
//! - **tools**: 动作注册表、分发器与各动作实现

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod prompts;
pub mod protocol;
pub mod react;
pub mod shell;
pub mod tools;
