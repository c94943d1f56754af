//! LLM 客户端抽象
//!
//! 运行器只需要一次非流式补全：给定完整对话与停止序列，返回助手回复文本。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("invalid completion request: {0}")]
    Request(String),

    #[error("completion API error: {0}")]
    Api(String),

    #[error("completion returned no choices")]
    NoChoices,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式补全；生成在任一停止序列处截止（停止序列本身不返回）
    async fn complete(&self, messages: &[Message], stop: &[&str]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
