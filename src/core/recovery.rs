//! 路由失败策略
//!
//! 每条生成路径固定一种失败策略：显式资源与 V2 终止，目录匹配继续下一条路径，
//! V1 的分析失败用安全默认类型替代、蓝图生成失败终止。

use serde::Serialize;

/// 生成路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pathway {
    ExplicitAsset,
    CatalogMatch,
    GenerationV2,
    GenerationV1,
}

impl Pathway {
    /// 路径整体的失败策略（V1 为蓝图生成阶段的策略）
    pub fn failure_policy(self) -> FailurePolicy {
        match self {
            Self::ExplicitAsset | Self::GenerationV2 | Self::GenerationV1 => FailurePolicy::Abort,
            Self::CatalogMatch => FailurePolicy::Continue,
        }
    }
}

impl std::fmt::Display for Pathway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ExplicitAsset => "explicit_asset",
            Self::CatalogMatch => "catalog_match",
            Self::GenerationV2 => "generation_v2",
            Self::GenerationV1 => "generation_v1",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 报错，不尝试后续路径
    Abort,
    /// 进入下一条路径
    Continue,
    /// 用安全默认值继续
    SubstituteDefault,
}

/// 路径内失败的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    AssetLoad,
    Analysis,
    Generation,
}

/// 路由失败恢复：把 (路径, 失败位置) 映射为策略
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, pathway: Pathway, point: FailurePoint) -> FailurePolicy {
        match (pathway, point) {
            (Pathway::CatalogMatch, _) => FailurePolicy::Continue,
            (Pathway::GenerationV1, FailurePoint::Analysis) => FailurePolicy::SubstituteDefault,
            (pathway, _) => pathway.failure_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_load_failure_continues() {
        let engine = RecoveryEngine::new();
        assert_eq!(
            engine.handle(Pathway::CatalogMatch, FailurePoint::AssetLoad),
            FailurePolicy::Continue
        );
    }

    #[test]
    fn test_explicit_asset_and_v2_abort() {
        let engine = RecoveryEngine::new();
        assert_eq!(
            engine.handle(Pathway::ExplicitAsset, FailurePoint::AssetLoad),
            FailurePolicy::Abort
        );
        assert_eq!(
            engine.handle(Pathway::GenerationV2, FailurePoint::Generation),
            FailurePolicy::Abort
        );
    }

    #[test]
    fn test_v1_analysis_substitutes_default_but_generation_aborts() {
        let engine = RecoveryEngine::new();
        assert_eq!(
            engine.handle(Pathway::GenerationV1, FailurePoint::Analysis),
            FailurePolicy::SubstituteDefault
        );
        assert_eq!(
            engine.handle(Pathway::GenerationV1, FailurePoint::Generation),
            FailurePolicy::Abort
        );
    }
}
