//! 请求路由：显式资源 → 目录匹配 → V2 生成（含复合建造）→ V1 生成
//!
//! 严格按顺序尝试，每条路径的失败策略由 `RecoveryEngine` 决定：
//! 显式资源与 V2 失败即终止（V2 不回退到 V1），目录加载失败继续下一条路径，
//! V1 分析失败用默认建筑类型替代、蓝图生成失败终止。
//! 任何生成调用之前先做高度与尺寸预检。

pub mod catalog;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::blueprint::{check_dimensions, check_request_bounds, BlockPos, Blueprint, Issue};
use crate::compound::{is_compound_request, CompoundDecomposer, CompoundReport};
use crate::core::{
    BuildContext, FailurePoint, FailurePolicy, Pathway, PipelineError, PipelineErrorKind, PipelineStage,
    RecoveryEngine, RoutingError, RoutingErrorKind, RoutingStage,
};
use crate::llm::{GenerationError, GenerationErrorKind};
use crate::pipeline::{Analysis, CallBudget, GenerationMode};

pub use catalog::{
    explicit_asset_reference, AssetError, AssetLoader, Catalog, CatalogMatch, FileAssetLoader, LocalCatalog,
};

/// 建造请求（受理后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// 日志关联用
    #[serde(default = "new_request_id")]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub origin: Option<BlockPos>,
    /// 包围盒的另一角
    #[serde(default)]
    pub corner: Option<BlockPos>,
    /// 导出格式标记，原样透传
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl BuildRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: new_request_id(),
            text: text.into(),
            origin: None,
            corner: None,
            format: None,
            actor: None,
        }
    }

    pub fn with_origin(mut self, origin: BlockPos) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_corner(mut self, corner: BlockPos) -> Self {
        self.corner = Some(corner);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// 会话级开关
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub enable_v2: bool,
}

/// 路由决定
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub pathway: Pathway,
    pub policy: FailurePolicy,
    /// 资源路径或目录条目名
    pub source: Option<String>,
    pub score: Option<f64>,
    pub compound: bool,
    /// V1 分析失败后使用了默认建筑类型
    pub substituted_default: bool,
    /// 之前被跳过的路径及原因
    pub fallthrough: Vec<String>,
}

impl RoutingDecision {
    pub fn new(pathway: Pathway) -> Self {
        Self {
            pathway,
            policy: pathway.failure_policy(),
            source: None,
            score: None,
            compound: false,
            substituted_default: false,
            fallthrough: Vec::new(),
        }
    }
}

/// 路由产出
#[derive(Debug, Clone)]
pub struct RoutedBuild {
    pub decision: RoutingDecision,
    pub blueprint: Blueprint,
    pub compound_report: Option<CompoundReport>,
}

pub struct RequestRouter {
    ctx: Arc<BuildContext>,
    recovery: RecoveryEngine,
}

impl RequestRouter {
    pub fn new(ctx: Arc<BuildContext>) -> Self {
        Self {
            ctx,
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    fn ensure_active(&self, stage: RoutingStage) -> Result<(), RoutingError> {
        if self.ctx.cancel.is_cancelled() {
            tracing::info!(stage = %stage, "Routing cancelled");
            return Err(RoutingError::new(stage, RoutingErrorKind::Cancelled));
        }
        Ok(())
    }

    /// 按失败策略决定终止还是记录后继续
    fn on_failure(
        &self,
        pathway: Pathway,
        point: FailurePoint,
        err: RoutingError,
        fallthrough: &mut Vec<String>,
    ) -> Result<(), RoutingError> {
        if matches!(err.kind, RoutingErrorKind::Cancelled) {
            return Err(err);
        }
        match self.recovery.handle(pathway, point) {
            FailurePolicy::Abort => {
                tracing::warn!(pathway = %pathway, "Routing aborted: {}", err);
                Err(err)
            }
            FailurePolicy::Continue | FailurePolicy::SubstituteDefault => {
                tracing::warn!(pathway = %pathway, "Pathway failed, trying next: {}", err);
                fallthrough.push(format!("{pathway}: {}", err.kind));
                Ok(())
            }
        }
    }

    fn pipeline_error(stage: RoutingStage, err: PipelineError) -> RoutingError {
        if err.is_cancelled() {
            RoutingError::new(stage, RoutingErrorKind::Cancelled)
        } else {
            RoutingError::new(stage, RoutingErrorKind::Pipeline(err))
        }
    }

    fn wants_v2(&self, text: &str, session: &SessionOptions) -> bool {
        let routing = &self.ctx.config.routing;
        if session.enable_v2 || routing.enable_v2 {
            return true;
        }
        let lower = text.to_lowercase();
        routing.landmark_keywords.iter().any(|k| lower.contains(k.as_str()))
            || is_compound_request(text, &self.ctx.config.compound)
    }

    pub async fn route(&self, request: &BuildRequest, session: &SessionOptions) -> Result<RoutedBuild, RoutingError> {
        let config = &self.ctx.config;
        let text = request.text.as_str();
        let heuristic = self.ctx.analyzer.analyze(text);
        tracing::info!(
            request_id = %request.id,
            actor = request.actor.as_deref().unwrap_or("-"),
            build_type = %heuristic.build_type,
            confidence = heuristic.confidence,
            "Routing build request"
        );
        self.preflight(request, &heuristic)?;

        let mut fallthrough: Vec<String> = Vec::new();

        if let Some(reference) = explicit_asset_reference(text) {
            tracing::info!(asset = %reference, "Routing to explicit asset");
            match self.ctx.loader.load(Path::new(&reference)).await {
                Ok(blueprint) => {
                    let mut decision = RoutingDecision::new(Pathway::ExplicitAsset);
                    decision.source = Some(reference);
                    return Ok(RoutedBuild {
                        decision,
                        blueprint: blueprint.with_generation_method(Pathway::ExplicitAsset.to_string()),
                        compound_report: None,
                    });
                }
                Err(e) => {
                    let err = RoutingError::new(RoutingStage::ExplicitAsset, RoutingErrorKind::Asset(e));
                    self.on_failure(Pathway::ExplicitAsset, FailurePoint::AssetLoad, err, &mut fallthrough)?;
                }
            }
        }
        self.ensure_active(RoutingStage::ExplicitAsset)?;

        if let Some(found) = self
            .ctx
            .catalog
            .find_best_match(text, config.routing.catalog_threshold)
            .await
        {
            tracing::info!(name = %found.name, score = found.score, "Routing to catalog match");
            match self.ctx.loader.load(&found.path).await {
                Ok(blueprint) => {
                    let mut decision = RoutingDecision::new(Pathway::CatalogMatch);
                    decision.source = Some(found.name);
                    decision.score = Some(found.score);
                    decision.fallthrough = fallthrough;
                    return Ok(RoutedBuild {
                        decision,
                        blueprint: blueprint.with_generation_method(Pathway::CatalogMatch.to_string()),
                        compound_report: None,
                    });
                }
                Err(e) => {
                    let err = RoutingError::new(RoutingStage::CatalogMatch, RoutingErrorKind::Asset(e));
                    self.on_failure(Pathway::CatalogMatch, FailurePoint::AssetLoad, err, &mut fallthrough)?;
                }
            }
        }
        self.ensure_active(RoutingStage::CatalogMatch)?;

        if self.wants_v2(text, session) {
            match self.generate_v2(text, &heuristic).await {
                Ok(mut routed) => {
                    routed.decision.fallthrough = fallthrough;
                    return Ok(routed);
                }
                Err(err) => {
                    self.on_failure(Pathway::GenerationV2, FailurePoint::Generation, err, &mut fallthrough)?;
                }
            }
        }
        self.ensure_active(RoutingStage::GenerationV2)?;

        let mut routed = self.generate_v1(text, heuristic).await?;
        routed.decision.fallthrough = fallthrough;
        Ok(routed)
    }

    /// 任何生成调用之前的高度与尺寸检查
    fn preflight(&self, request: &BuildRequest, analysis: &Analysis) -> Result<(), RoutingError> {
        let hints = &analysis.dimensions;
        let rejected = |issue: Issue| {
            tracing::warn!(request = %request.text, "Request rejected: {}", issue);
            RoutingError::new(RoutingStage::Preflight, RoutingErrorKind::Rejected(issue))
        };
        check_request_bounds(hints.height, request.origin, request.corner, &self.ctx.config.world).map_err(rejected)?;
        if !hints.is_empty() {
            check_dimensions(
                hints.width.unwrap_or(1),
                hints.height.unwrap_or(1),
                hints.depth.unwrap_or(1),
            )
            .map_err(rejected)?;
        }
        self.ensure_active(RoutingStage::Preflight)
    }

    async fn generate_v2(&self, text: &str, analysis: &Analysis) -> Result<RoutedBuild, RoutingError> {
        let config = &self.ctx.config;
        let pipeline = self.ctx.pipeline();
        let mut decision = RoutingDecision::new(Pathway::GenerationV2);

        if is_compound_request(text, &config.compound) {
            tracing::info!(max_calls = config.compound.max_total_calls, "Routing to compound generation");
            decision.compound = true;
            let mut budget = CallBudget::limited(config.compound.max_total_calls);
            let output = CompoundDecomposer::new(&pipeline, self.ctx.analyzer.as_ref())
                .build(text, &mut budget)
                .await
                .map_err(|e| Self::pipeline_error(RoutingStage::GenerationV2, e))?;
            return match output.blueprint {
                Some(blueprint) => Ok(RoutedBuild {
                    decision,
                    blueprint: blueprint.with_generation_method(GenerationMode::Full.method_tag()),
                    compound_report: Some(output.report),
                }),
                None => Err(RoutingError::new(
                    RoutingStage::GenerationV2,
                    RoutingErrorKind::CompoundFailed(output.report),
                )),
            };
        }

        tracing::info!(build_type = %analysis.build_type, "Routing to generation v2");
        let output = pipeline
            .run(text, analysis, GenerationMode::Full, &mut CallBudget::unlimited())
            .await
            .map_err(|e| Self::pipeline_error(RoutingStage::GenerationV2, e))?;
        Ok(RoutedBuild {
            decision,
            blueprint: output.blueprint,
            compound_report: None,
        })
    }

    async fn generate_v1(&self, text: &str, heuristic: Analysis) -> Result<RoutedBuild, RoutingError> {
        let pipeline = self.ctx.pipeline();
        let mut budget = CallBudget::unlimited();
        let mut decision = RoutingDecision::new(Pathway::GenerationV1);
        tracing::info!("Routing to generation v1");

        let analysis = match pipeline.analyze_with_model(text, &mut budget).await {
            Ok(model) if !model.build_type.trim().is_empty() => refine(model, heuristic),
            Err(e) if e.kind == GenerationErrorKind::Cancelled => {
                return Err(RoutingError::new(RoutingStage::GenerationV1, RoutingErrorKind::Cancelled))
            }
            other => {
                let reason = match other {
                    Err(e) => e.to_string(),
                    Ok(_) => "analysis returned an empty build type".to_string(),
                };
                match self.recovery.handle(Pathway::GenerationV1, FailurePoint::Analysis) {
                    FailurePolicy::SubstituteDefault => {
                        let default = self.ctx.config.routing.default_build_type.clone();
                        tracing::warn!(default = %default, "Model analysis failed, using default build type: {}", reason);
                        decision.substituted_default = true;
                        heuristic.with_build_type(default)
                    }
                    _ => {
                        return Err(RoutingError::new(
                            RoutingStage::GenerationV1,
                            RoutingErrorKind::Pipeline(PipelineError::new(
                                PipelineStage::Analyze,
                                PipelineErrorKind::Generation(GenerationError::new(GenerationErrorKind::Api, reason)),
                            )),
                        ))
                    }
                }
            }
        };
        self.ensure_active(RoutingStage::GenerationV1)?;

        let output = pipeline
            .run(text, &analysis, GenerationMode::SingleShot, &mut budget)
            .await
            .map_err(|e| Self::pipeline_error(RoutingStage::GenerationV1, e))?;
        Ok(RoutedBuild {
            decision,
            blueprint: output.blueprint,
            compound_report: None,
        })
    }
}

/// 模型分析为主，模型缺失的字段取启发式结果（图片引用只来自请求文本）
fn refine(model: Analysis, heuristic: Analysis) -> Analysis {
    Analysis {
        build_type: model.build_type.trim().to_lowercase(),
        confidence: model.confidence,
        theme: model.theme.or(heuristic.theme),
        dimensions: if model.dimensions.is_empty() {
            heuristic.dimensions
        } else {
            model.dimensions
        },
        image_reference: heuristic.image_reference,
        features: if model.features.is_empty() {
            heuristic.features
        } else {
            model.features
        },
    }
}
