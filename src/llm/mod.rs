//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、结构化输出恢复、容错重试

pub mod deepseek;
pub mod json_repair;
pub mod message;
pub mod mock;
pub mod openai;
pub mod resilient;
pub mod traits;

pub use deepseek::{create_client_from_config, create_deepseek_client, DEEPSEEK_CHAT};
pub use json_repair::{parse_structured, ParseFailure, RecoveryStage};
pub use message::{Message, Role};
pub use mock::ScriptedLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use resilient::{
    GenerationError, GenerationErrorKind, GenerationPrompt, GenerationStats,
    ResilientGenerationClient, RetryPolicy,
};
pub use traits::{LlmClient, LlmError};
