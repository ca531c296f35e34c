//! 编排错误类型
//!
//! 生成管线错误带阶段与未解决的问题列表；路由错误带路由阶段。可重试的瞬时错误在
//! `ResilientGenerationClient` 内部消化，只有预算耗尽后才以 `GenerationError` 出现在这里。

use serde::Serialize;
use thiserror::Error;

use crate::blueprint::Issue;
use crate::compound::CompoundReport;
use crate::llm::{GenerationError, GenerationErrorKind};
use crate::router::catalog::AssetError;

fn join_issues(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// 管线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Analyze,
    Reference,
    Plan,
    Blueprint,
    Validate,
    Repair,
    Layout,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Analyze => "analyze",
            Self::Reference => "reference",
            Self::Plan => "plan",
            Self::Blueprint => "blueprint",
            Self::Validate => "validate",
            Self::Repair => "repair",
            Self::Layout => "layout",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone)]
pub enum PipelineErrorKind {
    #[error("{0}")]
    Generation(GenerationError),

    /// 单次生成（V1）校验失败，不进入修复
    #[error("blueprint invalid: {}", join_issues(.0))]
    Invalid(Vec<Issue>),

    #[error("repair exhausted after {attempts} attempts, unresolved: {}", join_issues(.errors))]
    RepairExhausted { attempts: u32, errors: Vec<Issue> },

    #[error("cancelled")]
    Cancelled,
}

/// 管线失败：阶段 + 原因
#[derive(Error, Debug, Clone)]
#[error("pipeline failed at {stage} stage: {kind}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub kind: PipelineErrorKind,
}

impl PipelineError {
    pub fn new(stage: PipelineStage, kind: PipelineErrorKind) -> Self {
        Self { stage, kind }
    }

    pub fn generation(stage: PipelineStage, err: GenerationError) -> Self {
        let kind = if err.kind == GenerationErrorKind::Cancelled {
            PipelineErrorKind::Cancelled
        } else {
            PipelineErrorKind::Generation(err)
        };
        Self::new(stage, kind)
    }

    pub fn cancelled(stage: PipelineStage) -> Self {
        Self::new(stage, PipelineErrorKind::Cancelled)
    }

    /// 调用预算耗尽（复合建造据此停止后续组件）
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(&self.kind, PipelineErrorKind::Generation(e) if e.kind == GenerationErrorKind::BudgetExhausted)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, PipelineErrorKind::Cancelled)
    }

    /// 未解决的问题列表（面向用户）
    pub fn unresolved(&self) -> Vec<String> {
        match &self.kind {
            PipelineErrorKind::Invalid(errors) | PipelineErrorKind::RepairExhausted { errors, .. } => {
                errors.iter().map(|e| e.to_string()).collect()
            }
            PipelineErrorKind::Generation(e) => vec![e.to_string()],
            PipelineErrorKind::Cancelled => vec!["cancelled".to_string()],
        }
    }
}

/// 路由阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStage {
    Preflight,
    ExplicitAsset,
    CatalogMatch,
    GenerationV2,
    GenerationV1,
}

impl std::fmt::Display for RoutingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preflight => "preflight",
            Self::ExplicitAsset => "explicit_asset",
            Self::CatalogMatch => "catalog_match",
            Self::GenerationV2 => "generation_v2",
            Self::GenerationV1 => "generation_v1",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone)]
pub enum RoutingErrorKind {
    #[error("request rejected: {0}")]
    Rejected(Issue),

    #[error("{0}")]
    Asset(AssetError),

    #[error("{0}")]
    Pipeline(PipelineError),

    #[error("all {} compound components failed", .0.failed.len())]
    CompoundFailed(CompoundReport),

    #[error("cancelled")]
    Cancelled,
}

/// 路由失败（终止路由，不再尝试后续路径）
#[derive(Error, Debug, Clone)]
#[error("routing aborted at {stage}: {kind}")]
pub struct RoutingError {
    pub stage: RoutingStage,
    pub kind: RoutingErrorKind,
}

impl RoutingError {
    pub fn new(stage: RoutingStage, kind: RoutingErrorKind) -> Self {
        Self { stage, kind }
    }

    pub fn unresolved(&self) -> Vec<String> {
        match &self.kind {
            RoutingErrorKind::Rejected(issue) => vec![issue.to_string()],
            RoutingErrorKind::Asset(e) => vec![e.to_string()],
            RoutingErrorKind::Pipeline(e) => e.unresolved(),
            RoutingErrorKind::CompoundFailed(report) => report
                .failed
                .iter()
                .map(|f| format!("{}: {}", f.name, f.reason))
                .collect(),
            RoutingErrorKind::Cancelled => vec!["cancelled".to_string()],
        }
    }
}

/// 建造规划失败：栅格化前拒绝
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("estimated {estimated} blocks exceeds the plan limit of {limit}")]
    TooManyBlocks { estimated: u64, limit: u64 },
}
