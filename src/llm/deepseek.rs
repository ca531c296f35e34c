//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat (常规对话), deepseek-reasoner (思考模式)

use std::sync::Arc;

use crate::config::LlmSection;
use crate::llm::{LlmClient, OpenAiClient, ScriptedLlmClient};

/// DeepSeek API 常量
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 创建 DeepSeek 客户端
///
/// - 优先使用环境变量 `DEEPSEEK_API_KEY`
/// - 模型可通过 `model` 参数或 `DEEPSEEK_MODEL` 环境变量指定
pub fn create_deepseek_client(model: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    OpenAiClient::new(Some(DEEPSEEK_BASE_URL), &model, Some(api_key.as_str()))
}

/// 按 [llm] 段选择后端：deepseek / openai / mock
pub fn create_client_from_config(llm: &LlmSection) -> Arc<dyn LlmClient> {
    match llm.provider.as_str() {
        "openai" => Arc::new(
            OpenAiClient::new(llm.base_url.as_deref(), &llm.model, None).with_temperature(llm.temperature),
        ),
        "mock" => Arc::new(ScriptedLlmClient::new()),
        _ => match llm.base_url.as_deref() {
            Some(url) => Arc::new(
                OpenAiClient::new(
                    Some(url),
                    &llm.model,
                    std::env::var("DEEPSEEK_API_KEY").ok().as_deref(),
                )
                .with_temperature(llm.temperature),
            ),
            None => Arc::new(create_deepseek_client(Some(&llm.model)).with_temperature(llm.temperature)),
        },
    }
}
