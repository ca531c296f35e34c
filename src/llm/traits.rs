//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient::complete，结构化输出一次取回完整文本。
//! 错误统一为 LlmError，供上层 ResilientGenerationClient 判断是否可重试。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::Message;

/// 后端调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("API error: {0}")]
    ApiError(String),
}

impl LlmError {
    /// 按错误文本归类（各后端 SDK 的错误类型不统一，只能看状态码与关键词）
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
            LlmError::RateLimited { retry_after_ms: None }
        } else if lower.contains("timed out") || lower.contains("timeout") {
            LlmError::Timeout
        } else if lower.contains("401")
            || lower.contains("403")
            || lower.contains("invalid api key")
            || lower.contains("unauthorized")
        {
            LlmError::Auth(message.to_string())
        } else if lower.contains("connection")
            || lower.contains("connect")
            || lower.contains("dns")
            || lower.contains("reset by peer")
            || lower.contains("broken pipe")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("504")
        {
            LlmError::Network(message.to_string())
        } else {
            LlmError::ApiError(message.to_string())
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
