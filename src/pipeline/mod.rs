//! 生成管线：分析 →（可选）视觉参考 → 设计方案 → 蓝图 → 校验 →（无效时）修复循环
//!
//! 每个建造单元跑一次。阶段之间检查取消令牌；每次逻辑生成调用先扣减调用预算。
//! 建造顺序优化在规划阶段（`core::plan_build`）统一进行。

pub mod analysis;
pub mod plan;
pub mod prompts;
pub mod reference;
pub mod repair;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::blueprint::{
    blueprint_schema_json, Blueprint, BlueprintValidator, Issue, IssueCode, ValidationOutcome, ValidationTarget,
};
use crate::config::AppConfig;
use crate::core::{PipelineError, PipelineErrorKind, PipelineStage};
use crate::llm::{GenerationError, GenerationErrorKind, ResilientGenerationClient};

pub use analysis::{Analysis, Analyzer, DimensionHints, HeuristicAnalyzer};
pub use plan::{design_plan_schema_json, DesignPlan};
pub use reference::{ReferenceDescription, ReferenceError, VisualReference};
pub use repair::RepairLoop;

/// 逻辑生成调用预算（不是尝试次数）；非复合建造不限
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallBudget {
    limit: Option<usize>,
    used: usize,
}

impl CallBudget {
    pub fn unlimited() -> Self {
        Self { limit: None, used: 0 }
    }

    pub fn limited(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            used: 0,
        }
    }

    /// 记一次调用；已用完时返回 BudgetExhausted
    pub fn consume(&mut self) -> Result<(), GenerationError> {
        if let Some(limit) = self.limit {
            if self.used >= limit {
                return Err(GenerationError::new(
                    GenerationErrorKind::BudgetExhausted,
                    format!("generation call budget exhausted ({}/{limit})", self.used),
                ));
            }
        }
        self.used += 1;
        Ok(())
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> Option<usize> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == Some(0)
    }
}

/// 生成模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// V2：方案 → 蓝图 → 校验 → 修复
    Full,
    /// V1：单次蓝图生成 + 校验，无效即失败
    SingleShot,
}

impl GenerationMode {
    pub fn method_tag(self) -> &'static str {
        match self {
            Self::Full => "generation_v2",
            Self::SingleShot => "generation_v1",
        }
    }
}

/// 管线产出
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub blueprint: Blueprint,
    pub outcome: ValidationOutcome,
    pub plan: Option<DesignPlan>,
    pub reference: Option<ReferenceDescription>,
    pub repair_attempts: u32,
}

/// 把模型输出解码为蓝图；调色板缺失时按操作补齐
pub(crate) fn decode_blueprint(value: Value) -> Result<Blueprint, String> {
    let blueprint: Blueprint = serde_json::from_value(value)
        .map_err(|e| Issue::new(IssueCode::SchemaMismatch, e.to_string()).to_string())?;
    if blueprint.palette.is_empty() {
        let rebuilt = Blueprint::new(blueprint.size, blueprint.operations);
        return Ok(Blueprint {
            build_type: blueprint.build_type,
            generation_method: blueprint.generation_method,
            ..rebuilt
        });
    }
    Ok(blueprint)
}

pub struct GenerationPipeline {
    config: Arc<AppConfig>,
    client: Arc<ResilientGenerationClient>,
    reference: Option<Arc<dyn VisualReference>>,
    cancel: CancellationToken,
}

impl GenerationPipeline {
    pub fn new(config: Arc<AppConfig>, client: Arc<ResilientGenerationClient>) -> Self {
        Self {
            config,
            client,
            reference: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_reference(mut self, reference: Option<Arc<dyn VisualReference>>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn client(&self) -> &ResilientGenerationClient {
        &self.client
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn ensure_active(&self, stage: PipelineStage) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            tracing::info!(stage = %stage, "Pipeline cancelled");
            return Err(PipelineError::cancelled(stage));
        }
        Ok(())
    }

    /// V1 的轻量模型分析
    pub async fn analyze_with_model(&self, request: &str, budget: &mut CallBudget) -> Result<Analysis, GenerationError> {
        budget.consume()?;
        self.client
            .invoke_as::<Analysis>(&prompts::analysis_prompt(request), None)
            .await
    }

    pub async fn run(
        &self,
        request: &str,
        analysis: &Analysis,
        mode: GenerationMode,
        budget: &mut CallBudget,
    ) -> Result<PipelineOutput, PipelineError> {
        self.ensure_active(PipelineStage::Analyze)?;
        let target = ValidationTarget {
            build_type: analysis.build_type.clone(),
            requested: analysis.dimensions.to_size(),
            features: analysis.features.clone(),
        };

        let reference = match (&analysis.image_reference, &self.reference) {
            (Some(image), Some(service)) => {
                let timeout = Duration::from_secs(self.config.llm.timeouts.request);
                reference::resolve_reference(service.as_ref(), image, request, timeout).await
            }
            _ => None,
        };
        self.ensure_active(PipelineStage::Reference)?;

        let plan = match mode {
            GenerationMode::Full => Some(self.generate_plan(request, analysis, reference.as_ref(), budget).await?),
            GenerationMode::SingleShot => None,
        };
        self.ensure_active(PipelineStage::Plan)?;

        let schema = blueprint_schema_json();
        let prompt = prompts::blueprint_prompt(request, analysis, plan.as_ref(), reference.as_ref(), &self.config);
        budget
            .consume()
            .map_err(|e| PipelineError::generation(PipelineStage::Blueprint, e))?;
        let blueprint = self
            .client
            .invoke_with(&prompt, Some(&schema), decode_blueprint)
            .await
            .map_err(|e| PipelineError::generation(PipelineStage::Blueprint, e))?;
        self.ensure_active(PipelineStage::Blueprint)?;

        let outcome = BlueprintValidator::new(&self.config).validate(&blueprint, &target);
        tracing::info!(
            build_type = %analysis.build_type,
            mode = mode.method_tag(),
            valid = outcome.valid,
            errors = outcome.errors.len(),
            warnings = outcome.warnings.len(),
            score = outcome.score,
            "Blueprint validated"
        );

        let (blueprint, outcome, repair_attempts) = if outcome.valid {
            (blueprint, outcome, 0)
        } else {
            match mode {
                GenerationMode::SingleShot => {
                    return Err(PipelineError::new(
                        PipelineStage::Validate,
                        PipelineErrorKind::Invalid(outcome.errors),
                    ))
                }
                GenerationMode::Full => {
                    let repaired = RepairLoop::new(&self.client, &self.config, &self.cancel)
                        .run(request, &target, blueprint, outcome, budget)
                        .await?;
                    (repaired.blueprint, repaired.outcome, repaired.attempts)
                }
            }
        };

        let blueprint = if blueprint.build_type.is_empty() {
            blueprint.with_build_type(analysis.build_type.clone())
        } else {
            blueprint
        }
        .with_generation_method(mode.method_tag());

        Ok(PipelineOutput {
            blueprint,
            outcome,
            plan,
            reference,
            repair_attempts,
        })
    }

    async fn generate_plan(
        &self,
        request: &str,
        analysis: &Analysis,
        reference: Option<&ReferenceDescription>,
        budget: &mut CallBudget,
    ) -> Result<DesignPlan, PipelineError> {
        budget
            .consume()
            .map_err(|e| PipelineError::generation(PipelineStage::Plan, e))?;
        let schema = design_plan_schema_json();
        let prompt = prompts::plan_prompt(request, analysis, reference, &self.config);
        let config = &self.config;
        let plan = self
            .client
            .invoke_with(&prompt, Some(&schema), |value| {
                let plan: DesignPlan = serde_json::from_value(value).map_err(|e| e.to_string())?;
                plan.check(config).map_err(|issue| issue.to_string())?;
                Ok(plan)
            })
            .await
            .map_err(|e| PipelineError::generation(PipelineStage::Plan, e))?;
        tracing::debug!(
            width = plan.width,
            height = plan.height,
            depth = plan.depth,
            style = %plan.style,
            "Design plan accepted"
        );
        Ok(plan)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::{RetryPolicy, ScriptedLlmClient};
    use async_trait::async_trait;
    use serde_json::json;

    pub(crate) fn plan_json() -> String {
        json!({
            "width": 7, "height": 6, "depth": 7,
            "style": "rustic",
            "materials": {"wall": "oak_planks", "roof": "oak_stairs"},
            "features": ["door", "roof"]
        })
        .to_string()
    }

    pub(crate) fn house_json(walls: bool) -> String {
        let mut ops = vec![json!({"type": "fill", "from": [0, 0, 0], "to": [6, 0, 6], "block": "cobblestone"})];
        if walls {
            ops.push(json!({"type": "hollow_box", "from": [0, 1, 0], "to": [6, 4, 6], "block": "oak_planks"}));
        }
        ops.push(json!({"type": "door", "pos": [3, 1, 0], "block": "oak_door"}));
        ops.push(json!({"type": "roof_gable", "from": [0, 5, 0], "to": [6, 5, 6], "block": "oak_stairs"}));
        json!({
            "size": {"width": 7, "height": 6, "depth": 7},
            "palette": [],
            "operations": ops,
            "build_type": "house"
        })
        .to_string()
    }

    fn pipeline(llm: Arc<ScriptedLlmClient>) -> GenerationPipeline {
        let config = Arc::new(AppConfig::default());
        let client = Arc::new(ResilientGenerationClient::new(llm, RetryPolicy::default()));
        GenerationPipeline::new(config, client)
    }

    fn house_analysis() -> Analysis {
        HeuristicAnalyzer::new().analyze("a small house with a door")
    }

    #[tokio::test]
    async fn test_full_pipeline_valid_first_time() {
        let llm = Arc::new(ScriptedLlmClient::new().with_reply(plan_json()).with_reply(house_json(true)));
        let out = pipeline(llm.clone())
            .run("a small house with a door", &house_analysis(), GenerationMode::Full, &mut CallBudget::unlimited())
            .await
            .unwrap();
        assert!(out.outcome.valid);
        assert_eq!(out.repair_attempts, 0);
        assert_eq!(out.plan.map(|p| p.width), Some(7));
        assert_eq!(out.blueprint.generation_method, "generation_v2");
        assert!(out.blueprint.palette.contains(&"oak_door".to_string()));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_repair_receives_errors_and_converges() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .with_reply(plan_json())
                .with_reply(house_json(false))
                .with_reply(house_json(true)),
        );
        let out = pipeline(llm.clone())
            .run("a small house with a door", &house_analysis(), GenerationMode::Full, &mut CallBudget::unlimited())
            .await
            .unwrap();
        assert_eq!(out.repair_attempts, 1);
        assert!(out.outcome.valid);
        let prompts = llm.prompts();
        assert!(prompts[2].contains("MISSING_WALLS"));
        assert!(prompts[2].contains("Semantic quality"));
    }

    #[tokio::test]
    async fn test_repair_history_accumulates_across_attempts() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .with_reply(plan_json())
                .with_fallback(house_json(false)),
        );
        let err = pipeline(llm.clone())
            .run("a small house with a door", &house_analysis(), GenerationMode::Full, &mut CallBudget::unlimited())
            .await
            .unwrap_err();

        assert_eq!(err.stage, PipelineStage::Repair);
        assert!(matches!(err.kind, PipelineErrorKind::RepairExhausted { attempts: 3, .. }));
        assert!(err.unresolved().iter().any(|e| e.contains("MISSING_WALLS")));
        // plan + blueprint + 3 repairs
        assert_eq!(llm.calls(), 5);
        let last = llm.prompts().pop().unwrap();
        assert!(last.contains("[attempt 1]"));
        assert!(last.contains("[attempt 3]"));
    }

    #[tokio::test]
    async fn test_single_shot_invalid_aborts_without_repair() {
        let llm = Arc::new(ScriptedLlmClient::new().with_reply(house_json(false)));
        let err = pipeline(llm.clone())
            .run("a small house", &house_analysis(), GenerationMode::SingleShot, &mut CallBudget::unlimited())
            .await
            .unwrap_err();
        assert_eq!(err.stage, PipelineStage::Validate);
        assert!(matches!(err.kind, PipelineErrorKind::Invalid(_)));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_any_call() {
        let llm = Arc::new(ScriptedLlmClient::new().with_fallback(plan_json()));
        let token = CancellationToken::new();
        token.cancel();
        let err = pipeline(llm.clone())
            .with_cancel_token(token)
            .run("a house", &house_analysis(), GenerationMode::Full, &mut CallBudget::unlimited())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_stops_before_blueprint_call() {
        let llm = Arc::new(ScriptedLlmClient::new().with_reply(plan_json()).with_reply(house_json(true)));
        let mut budget = CallBudget::limited(1);
        let err = pipeline(llm.clone())
            .run("a house", &house_analysis(), GenerationMode::Full, &mut budget)
            .await
            .unwrap_err();
        assert_eq!(err.stage, PipelineStage::Blueprint);
        assert!(err.is_budget_exhausted());
        assert_eq!(llm.calls(), 1);
        assert!(budget.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_plan_triggers_fresh_call() {
        let bad_plan = json!({"width": 0, "height": 6, "depth": 7}).to_string();
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .with_reply(bad_plan)
                .with_reply(plan_json())
                .with_reply(house_json(true)),
        );
        let out = pipeline(llm.clone())
            .run("a house", &house_analysis(), GenerationMode::Full, &mut CallBudget::unlimited())
            .await
            .unwrap();
        assert!(out.outcome.valid);
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_reference_is_attached_when_image_given() {
        struct Describe;

        #[async_trait]
        impl VisualReference for Describe {
            async fn describe(&self, _image: &[u8], _request: &str) -> Result<ReferenceDescription, ReferenceError> {
                Ok(ReferenceDescription {
                    subject: "cottage".into(),
                    style: "rustic".into(),
                    ..Default::default()
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("ref.png");
        std::fs::write(&image, [1u8, 2, 3]).unwrap();
        let request = format!("a house with a door like {}", image.display());
        let analysis = HeuristicAnalyzer::new().analyze(&request);

        let llm = Arc::new(ScriptedLlmClient::new().with_reply(plan_json()).with_reply(house_json(true)));
        let out = pipeline(llm.clone())
            .with_reference(Some(Arc::new(Describe)))
            .run(&request, &analysis, GenerationMode::Full, &mut CallBudget::unlimited())
            .await
            .unwrap();
        assert_eq!(out.reference.map(|r| r.subject), Some("cottage".to_string()));
        assert!(llm.prompts()[0].contains("Visual reference"));
    }

    #[test]
    fn test_call_budget_counts() {
        let mut budget = CallBudget::limited(2);
        assert!(budget.consume().is_ok());
        assert!(budget.consume().is_ok());
        let err = budget.consume().unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::BudgetExhausted);
        assert_eq!(budget.used(), 2);

        let mut unlimited = CallBudget::unlimited();
        for _ in 0..100 {
            unlimited.consume().unwrap();
        }
        assert_eq!(unlimited.remaining(), None);
    }
}
