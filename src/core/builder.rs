//! 建造规划：路由产出的蓝图 → 建造顺序优化 → 栅格化 → 站位覆盖

use serde::Serialize;

use crate::blueprint::{estimate_block_count, rasterize, BlockPos, Blueprint, BuildOrderOptimizer, Placement};
use crate::config::AppConfig;
use crate::core::error::PlanError;
use crate::placement::{plan_stations, CoverageAssignment};
use crate::router::RoutedBuild;

/// 可直接交给执行器的建造计划
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
    pub blueprint: Blueprint,
    pub placements: Vec<Placement>,
    pub coverage: CoverageAssignment,
    pub origin: BlockPos,
}

impl BuildPlan {
    pub fn block_count(&self) -> usize {
        self.placements.len()
    }

    pub fn station_count(&self) -> usize {
        self.coverage.len()
    }
}

/// 排序 → 栅格化 → 站位覆盖
///
/// 目录与显式资源的蓝图不经过校验，栅格化前按估算方块数做硬上限检查。
pub fn plan_build(routed: &RoutedBuild, origin: BlockPos, config: &AppConfig) -> Result<BuildPlan, PlanError> {
    let estimated = estimate_block_count(&routed.blueprint.operations);
    let limit = config.placement.max_plan_blocks;
    if estimated > limit {
        tracing::warn!(estimated, limit, "Refusing to plan oversized blueprint");
        return Err(PlanError::TooManyBlocks { estimated, limit });
    }

    let blueprint = BuildOrderOptimizer::new().optimize(&routed.blueprint);
    let placements = rasterize(&blueprint, origin);
    let targets: Vec<BlockPos> = placements.iter().map(|p| p.pos).collect();
    let coverage = plan_stations(&targets, config.placement.reach, config.placement.padding);

    tracing::info!(
        operations = blueprint.operations.len(),
        blocks = placements.len(),
        stations = coverage.len(),
        origin = %origin,
        "Build planned"
    );
    Ok(BuildPlan {
        blueprint,
        placements,
        coverage,
        origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{Operation, Size};
    use crate::core::{FailurePolicy, Pathway};
    use crate::router::RoutingDecision;

    #[test]
    fn test_plan_orders_and_covers_every_block() {
        let ops = vec![
            Operation::RoofFlat {
                from: BlockPos::new(0, 3, 0),
                to: BlockPos::new(2, 3, 2),
                block: "oak_slab".into(),
            },
            Operation::Fill {
                from: BlockPos::new(0, 0, 0),
                to: BlockPos::new(2, 0, 2),
                block: "cobblestone".into(),
            },
        ];
        let routed = RoutedBuild {
            decision: RoutingDecision::new(Pathway::CatalogMatch),
            blueprint: Blueprint::new(Size::new(3, 4, 3), ops),
            compound_report: None,
        };

        let plan = plan_build(&routed, BlockPos::new(100, 64, 100), &AppConfig::default()).unwrap();
        assert_eq!(plan.blueprint.operations[0].kind_name(), "fill");
        assert_eq!(plan.block_count(), 18);
        assert_eq!(plan.placements[0].pos, BlockPos::new(100, 64, 100));
        assert!(plan.coverage.is_partition_of(plan.block_count()));
        assert_eq!(routed.decision.policy, FailurePolicy::Continue);
    }

    #[test]
    fn test_plan_refuses_giant_sphere_before_rasterizing() {
        let ops = vec![Operation::Sphere {
            center: BlockPos::new(3, 3, 3),
            radius: 50_000,
            block: "glass".into(),
            hollow: true,
        }];
        let routed = RoutedBuild {
            decision: RoutingDecision::new(Pathway::CatalogMatch),
            blueprint: Blueprint::new(Size::new(7, 6, 7), ops),
            compound_report: None,
        };

        let err = plan_build(&routed, BlockPos::new(0, 64, 0), &AppConfig::default()).unwrap_err();
        match err {
            PlanError::TooManyBlocks { estimated, limit } => {
                assert!(estimated > limit);
                assert_eq!(limit, 2_000_000);
            }
        }
    }
}
