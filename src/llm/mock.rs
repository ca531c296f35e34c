//! Mock LLM 客户端（用于测试与 `mock` 后端，无需 API）
//!
//! 按顺序弹出预置的回复或错误；队列耗尽后返回 ApiError。可选模拟延迟（用于超时测试）。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message};

/// 预置脚本的客户端：每次 complete 消费一条脚本项，并记录收到的最后一条 user 消息
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    /// 脚本耗尽后重复返回的回复（None 时返回错误）
    fallback: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条成功回复
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.push(Ok(reply.into()));
        self
    }

    /// 追加一条错误
    pub fn with_error(self, err: LlmError) -> Self {
        self.push(Err(err));
        self
    }

    /// 脚本耗尽后始终返回该回复
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// 每次调用前等待，用于模拟挂起的请求
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(&self, item: Result<String, LlmError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }

    /// 已收到的调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用的最后一条 user 消息
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(last_user) = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::llm::Role::User))
        {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(last_user.content.clone());
            }
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(item) => item,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::ApiError("mock script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_order_and_exhaustion() {
        let client = ScriptedLlmClient::new()
            .with_reply("first")
            .with_error(LlmError::Timeout);

        assert_eq!(client.complete(&[Message::user("a")]).await.unwrap(), "first");
        assert_eq!(client.complete(&[Message::user("b")]).await, Err(LlmError::Timeout));
        assert!(client.complete(&[Message::user("c")]).await.is_err());
        assert_eq!(client.calls(), 3);
        assert_eq!(client.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_fallback_repeats() {
        let client = ScriptedLlmClient::new().with_fallback("{}");
        assert_eq!(client.complete(&[]).await.unwrap(), "{}");
        assert_eq!(client.complete(&[]).await.unwrap(), "{}");
    }
}
