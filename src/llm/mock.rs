//! 脚本化 LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预设回复，并记录每次调用收到的对话，便于断言运行器如何回滚与重试。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

/// 预设回复（或错误）
#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Fail(String),
}

/// 依次返回预设回复；用尽后返回 Api 错误（或重复最后一条，见 [`ScriptedLlmClient::repeating`]）
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Scripted>>,
    repeat_last: bool,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(replies.into_iter().map(|r| Scripted::Reply(r.into())).collect()),
            ..Self::default()
        }
    }

    /// 只有一条回复，每次调用都返回它
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self {
            repeat_last: true,
            ..Self::new([reply])
        }
    }

    /// 追加一次失败
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Scripted::Fail(message.into()));
        }
        self
    }

    /// 每次调用时收到的完整对话
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message], _stop: &[&str]) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let mut script = self
            .script
            .lock()
            .map_err(|_| LlmError::Api("script lock poisoned".to_string()))?;
        let next = if self.repeat_last && script.len() == 1 {
            script.front().cloned()
        } else {
            script.pop_front()
        };
        match next {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Fail(message)) => Err(LlmError::Api(message)),
            None => Err(LlmError::Api("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order_then_exhausted() {
        let llm = ScriptedLlmClient::new(["a", "b"]).then_fail("boom");
        let msgs = vec![Message::user("hi")];
        assert_eq!(llm.complete(&msgs, &[]).await.unwrap(), "a");
        assert_eq!(llm.complete(&msgs, &[]).await.unwrap(), "b");
        assert!(matches!(llm.complete(&msgs, &[]).await, Err(LlmError::Api(m)) if m == "boom"));
        assert!(llm.complete(&msgs, &[]).await.is_err());
        assert_eq!(llm.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_repeating() {
        let llm = ScriptedLlmClient::repeating("same");
        for _ in 0..3 {
            assert_eq!(llm.complete(&[], &[]).await.unwrap(), "same");
        }
    }
}
