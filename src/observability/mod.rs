//! 可观测性：日志订阅器初始化与生成统计汇总

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::llm::ResilientGenerationClient;

/// 默认 info，可通过 RUST_LOG 覆盖；重复初始化时静默忽略
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// 一次建造结束后输出调用与 token 累计
pub fn log_generation_summary(client: &ResilientGenerationClient) {
    let (calls, attempts, retries, recovered) = client.stats().snapshot();
    let (prompt_tokens, completion_tokens, total_tokens) = client.token_usage();
    tracing::info!(
        calls,
        attempts,
        retries,
        recovered_parses = recovered,
        prompt_tokens,
        completion_tokens,
        total_tokens,
        "Generation summary"
    );
}
