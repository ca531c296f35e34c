//! 修复循环：把当前蓝图、全部历史错误与语义分数交回模型，直到通过校验或次数用尽
//!
//! 用尽即失败，不降级。

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::blueprint::{Blueprint, BlueprintValidator, Issue, ValidationOutcome, ValidationTarget};
use crate::config::AppConfig;
use crate::core::{PipelineError, PipelineErrorKind, PipelineStage};
use crate::llm::ResilientGenerationClient;
use crate::pipeline::prompts::repair_prompt;
use crate::pipeline::{decode_blueprint, CallBudget};

/// 修复成功的结果
#[derive(Debug, Clone)]
pub struct Repaired {
    pub blueprint: Blueprint,
    pub outcome: ValidationOutcome,
    pub attempts: u32,
}

pub struct RepairLoop<'a> {
    client: &'a ResilientGenerationClient,
    config: &'a AppConfig,
    cancel: &'a CancellationToken,
}

impl<'a> RepairLoop<'a> {
    pub fn new(client: &'a ResilientGenerationClient, config: &'a AppConfig, cancel: &'a CancellationToken) -> Self {
        Self { client, config, cancel }
    }

    pub async fn run(
        &self,
        request: &str,
        target: &ValidationTarget,
        mut blueprint: Blueprint,
        mut outcome: ValidationOutcome,
        budget: &mut CallBudget,
    ) -> Result<Repaired, PipelineError> {
        let max_attempts = self.config.generation.max_repair_attempts;
        let validator = BlueprintValidator::new(self.config);
        let mut history: Vec<Vec<Issue>> = Vec::new();

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::cancelled(PipelineStage::Repair));
            }
            budget
                .consume()
                .map_err(|e| PipelineError::generation(PipelineStage::Repair, e))?;

            history.push(outcome.errors.clone());
            let current = serde_json::to_value(&blueprint).unwrap_or(Value::Null);
            let prompt = repair_prompt(request, &current, &history, &outcome, self.config);
            let schema = crate::blueprint::blueprint_schema_json();

            blueprint = self
                .client
                .invoke_with(&prompt, Some(&schema), decode_blueprint)
                .await
                .map_err(|e| PipelineError::generation(PipelineStage::Repair, e))?;
            outcome = validator.validate(&blueprint, target);

            tracing::info!(
                attempt,
                max_attempts,
                errors = outcome.errors.len(),
                warnings = outcome.warnings.len(),
                score = outcome.score,
                "Repair attempt validated"
            );
            if outcome.valid {
                return Ok(Repaired {
                    blueprint,
                    outcome,
                    attempts: attempt,
                });
            }
        }

        tracing::warn!(
            attempts = max_attempts,
            errors = outcome.errors.len(),
            "Repair loop exhausted"
        );
        Err(PipelineError::new(
            PipelineStage::Repair,
            PipelineErrorKind::RepairExhausted {
                attempts: max_attempts,
                errors: outcome.errors,
            },
        ))
    }
}
