//! 容错生成客户端
//!
//! 在 LlmClient 之上包一层：每次尝试独立超时；超时 / 限流 / 网络抖动 / 结构化输出解析失败视为可重试，
//! 以同一提示词指数退避重试，直到达到 max_attempts；其它错误立即终止。
//! 解析失败会触发一次新的模型调用，而不只是重新解析。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::GenerationSection;
use crate::llm::json_repair::{parse_structured, RecoveryStage};
use crate::llm::{LlmClient, LlmError, Message};

/// 生成错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    Timeout,
    RateLimited,
    Network,
    /// 三阶段恢复后仍无法解析，或结构不符
    MalformedOutput,
    Auth,
    Api,
    Cancelled,
    /// 复合建造的调用预算耗尽
    BudgetExhausted,
}

impl GenerationErrorKind {
    /// 是否在调用层重试
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::Network | Self::MalformedOutput
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Network => "network",
            Self::MalformedOutput => "malformed_output",
            Self::Auth => "auth",
            Self::Api => "api",
            Self::Cancelled => "cancelled",
            Self::BudgetExhausted => "budget_exhausted",
        }
    }
}

impl std::fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次逻辑调用的最终失败
#[derive(Error, Debug, Clone)]
#[error("generation failed ({kind}): {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<LlmError> for GenerationError {
    fn from(err: LlmError) -> Self {
        let kind = match &err {
            LlmError::Timeout => GenerationErrorKind::Timeout,
            LlmError::RateLimited { .. } => GenerationErrorKind::RateLimited,
            LlmError::Network(_) => GenerationErrorKind::Network,
            LlmError::Auth(_) => GenerationErrorKind::Auth,
            LlmError::ApiError(_) => GenerationErrorKind::Api,
        };
        Self::new(kind, err.to_string())
    }
}

/// 重试策略：尝试次数、单次超时、指数退避参数
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationSection) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            attempt_timeout: config.attempt_timeout(),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms.max(config.backoff_base_ms)),
        }
    }

    /// 第 retry 次重试前的等待（retry 从 1 开始）：base * 2^(retry-1)，封顶 max_delay
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GenerationSection::default())
    }
}

/// 生成提示词：system + user，两者在重试时保持不变
#[derive(Debug, Clone)]
pub struct GenerationPrompt {
    pub system: String,
    pub user: String,
}

impl GenerationPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    fn to_messages(&self, schema_hint: Option<&str>) -> Vec<Message> {
        let system = match schema_hint {
            Some(hint) => format!(
                "{}\n\nRespond with a single JSON value only, no prose. It must match this JSON Schema:\n{}",
                self.system, hint
            ),
            None => format!("{}\n\nRespond with a single JSON value only, no prose.", self.system),
        };
        vec![Message::system(system), Message::user(self.user.clone())]
    }
}

/// 调用统计（只用于观测，不影响控制流）
#[derive(Debug, Default)]
pub struct GenerationStats {
    pub calls: AtomicU64,
    pub attempts: AtomicU64,
    pub retries: AtomicU64,
    pub recovered_parses: AtomicU64,
}

impl GenerationStats {
    /// (calls, attempts, retries, recovered_parses)
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.calls.load(Ordering::Relaxed),
            self.attempts.load(Ordering::Relaxed),
            self.retries.load(Ordering::Relaxed),
            self.recovered_parses.load(Ordering::Relaxed),
        )
    }
}

/// 容错生成客户端
pub struct ResilientGenerationClient {
    llm: Arc<dyn LlmClient>,
    policy: RetryPolicy,
    cancel: Option<CancellationToken>,
    stats: GenerationStats,
}

impl ResilientGenerationClient {
    pub fn new(llm: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self {
            llm,
            policy,
            cancel: None,
            stats: GenerationStats::default(),
        }
    }

    /// 在每次尝试前检查取消；进行中的调用不会被打断
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &GenerationStats {
        &self.stats
    }

    /// 后端累计 token：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 调用模型并返回解析后的 JSON
    pub async fn invoke(
        &self,
        prompt: &GenerationPrompt,
        schema_hint: Option<&str>,
    ) -> Result<Value, GenerationError> {
        self.invoke_with(prompt, schema_hint, Ok).await
    }

    /// 调用模型并反序列化为 T；结构不符按解析失败处理（可重试）
    pub async fn invoke_as<T: DeserializeOwned>(
        &self,
        prompt: &GenerationPrompt,
        schema_hint: Option<&str>,
    ) -> Result<T, GenerationError> {
        self.invoke_with(prompt, schema_hint, |value| {
            serde_json::from_value(value).map_err(|e| e.to_string())
        })
        .await
    }

    /// 通用调用：decode 失败同样触发新的模型调用
    pub async fn invoke_with<T, F>(
        &self,
        prompt: &GenerationPrompt,
        schema_hint: Option<&str>,
        decode: F,
    ) -> Result<T, GenerationError>
    where
        F: Fn(Value) -> Result<T, String>,
    {
        self.stats.calls.fetch_add(1, Ordering::Relaxed);
        let messages = prompt.to_messages(schema_hint);
        let mut previous_delay = Duration::ZERO;
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(GenerationError::new(
                    GenerationErrorKind::Cancelled,
                    "cancelled before model call",
                ));
            }

            attempt += 1;
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let (err, retry_after) = match self.attempt(&messages, &decode).await {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            if !err.kind.is_retryable() {
                tracing::warn!(attempt, kind = %err.kind, "Generation failed with terminal error: {}", err.message);
                return Err(err);
            }
            if attempt >= self.policy.max_attempts {
                tracing::warn!(
                    attempts = attempt,
                    kind = %err.kind,
                    "Generation retries exhausted: {}",
                    err.message
                );
                return Err(err);
            }

            let mut delay = self.policy.delay_for(attempt).max(previous_delay);
            if let Some(ms) = retry_after {
                delay = delay.max(Duration::from_millis(ms));
            }
            previous_delay = delay;

            tracing::info!(
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                kind = %err.kind,
                "Retrying generation call"
            );
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(delay).await;
        }
    }

    /// 单次尝试：超时包裹 + 分阶段解析 + decode
    async fn attempt<T, F>(
        &self,
        messages: &[Message],
        decode: &F,
    ) -> Result<T, (GenerationError, Option<u64>)>
    where
        F: Fn(Value) -> Result<T, String>,
    {
        let raw = match tokio::time::timeout(self.policy.attempt_timeout, self.llm.complete(messages)).await {
            Err(_) => {
                return Err((
                    GenerationError::new(
                        GenerationErrorKind::Timeout,
                        format!("no response within {:?}", self.policy.attempt_timeout),
                    ),
                    None,
                ))
            }
            Ok(Err(e)) => {
                let retry_after = match &e {
                    LlmError::RateLimited { retry_after_ms } => *retry_after_ms,
                    _ => None,
                };
                return Err((GenerationError::from(e), retry_after));
            }
            Ok(Ok(raw)) => raw,
        };

        let (value, stage) = parse_structured(&raw).map_err(|e| {
            (
                GenerationError::new(GenerationErrorKind::MalformedOutput, e.to_string()),
                None,
            )
        })?;
        if stage != RecoveryStage::Direct {
            self.stats.recovered_parses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(?stage, "Recovered malformed structured output");
        }

        decode(value).map_err(|e| {
            (
                GenerationError::new(
                    GenerationErrorKind::MalformedOutput,
                    format!("response does not match expected shape: {e}"),
                ),
                None,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use serde::Deserialize;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            attempt_timeout: Duration::from_secs(1),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }

    fn prompt() -> GenerationPrompt {
        GenerationPrompt::new("You design buildings.", "a small hut")
    }

    #[test]
    fn test_backoff_is_non_decreasing_and_capped() {
        let p = policy(10);
        let delays: Vec<_> = (1..10).map(|r| p.delay_for(r)).collect();
        assert_eq!(delays[0], Duration::from_millis(500));
        assert_eq!(delays[1], Duration::from_millis(1000));
        assert_eq!(delays[2], Duration::from_millis(2000));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(8));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(GenerationErrorKind::Timeout.is_retryable());
        assert!(GenerationErrorKind::MalformedOutput.is_retryable());
        assert!(!GenerationErrorKind::Auth.is_retryable());
        assert!(!GenerationErrorKind::Api.is_retryable());
        assert!(!GenerationErrorKind::BudgetExhausted.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_timeout_stops_after_max_attempts() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .with_fallback("{}")
                .with_delay(Duration::from_secs(30)),
        );
        let client = ResilientGenerationClient::new(llm.clone(), policy(3));

        let started = tokio::time::Instant::now();
        let err = client.invoke(&prompt(), None).await.unwrap_err();

        assert_eq!(err.kind, GenerationErrorKind::Timeout);
        assert_eq!(llm.calls(), 3);
        // 3 次 1s 超时 + 0.5s + 1s 退避
        assert!(started.elapsed() >= Duration::from_millis(4500));
        assert_eq!(client.stats().snapshot().1, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_then_success() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .with_error(LlmError::RateLimited { retry_after_ms: Some(2000) })
                .with_reply(r#"{"ok": true}"#),
        );
        let client = ResilientGenerationClient::new(llm.clone(), policy(3));

        let started = tokio::time::Instant::now();
        let value = client.invoke(&prompt(), None).await.unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(llm.calls(), 2);
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried() {
        let llm = Arc::new(ScriptedLlmClient::new().with_error(LlmError::Auth("bad key".into())));
        let client = ResilientGenerationClient::new(llm.clone(), policy(5));

        let err = client.invoke(&prompt(), None).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Auth);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_output_triggers_fresh_call() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .with_reply("Sure! I'd love to help you build that.")
                .with_reply("```json\n{\"width\": 7,}\n```"),
        );
        let client = ResilientGenerationClient::new(llm.clone(), policy(3));

        let value = client.invoke(&prompt(), None).await.unwrap();
        assert_eq!(value["width"], 7);
        assert_eq!(llm.calls(), 2);
        assert_eq!(client.stats().snapshot().3, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_as_retries_shape_mismatch() {
        #[derive(Deserialize)]
        struct Dims {
            width: i32,
        }

        let llm = Arc::new(
            ScriptedLlmClient::new()
                .with_reply(r#"{"wide": 3}"#)
                .with_reply(r#"{"width": 9}"#),
        );
        let client = ResilientGenerationClient::new(llm.clone(), policy(3));

        let dims: Dims = client.invoke_as(&prompt(), Some("{}")).await.unwrap();
        assert_eq!(dims.width, 9);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_call() {
        let llm = Arc::new(ScriptedLlmClient::new().with_fallback("{}"));
        let token = CancellationToken::new();
        token.cancel();
        let client = ResilientGenerationClient::new(llm.clone(), policy(3)).with_cancel_token(token);

        let err = client.invoke(&prompt(), None).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Cancelled);
        assert_eq!(llm.calls(), 0);
    }
}
