//! 蓝图校验：结构 + 语义
//!
//! 错误驱动修复循环，告警只降低语义分数。语义分数 = clamp(1 − 0.2×错误数 − 0.05×告警数, 0, 1)。

use std::collections::BTreeSet;

use serde::Serialize;

use crate::blueprint::raster::estimate_block_count;
use crate::blueprint::safety::check_dimensions;
use crate::blueprint::{BlockPos, Blueprint, Operation, Size};
use crate::config::AppConfig;

/// 校验问题代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    SchemaMismatch,
    ZeroDimension,
    NegativeDimension,
    DimensionTooLarge,
    HeightExceeded,
    EmptyBlueprint,
    TooManyOperations,
    UnknownBlock,
    InvalidFallback,
    OutOfBounds,
    BlockBudget,
    MissingFeature,
    DimensionMismatch,
    FootprintTooSmall,
    MissingWalls,
    MissingRoof,
}

impl IssueCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SchemaMismatch => "SCHEMA_MISMATCH",
            Self::ZeroDimension => "ZERO_DIMENSION",
            Self::NegativeDimension => "NEGATIVE_DIMENSION",
            Self::DimensionTooLarge => "DIMENSION_TOO_LARGE",
            Self::HeightExceeded => "HEIGHT_EXCEEDED",
            Self::EmptyBlueprint => "EMPTY_BLUEPRINT",
            Self::TooManyOperations => "TOO_MANY_OPERATIONS",
            Self::UnknownBlock => "UNKNOWN_BLOCK",
            Self::InvalidFallback => "INVALID_FALLBACK",
            Self::OutOfBounds => "OUT_OF_BOUNDS",
            Self::BlockBudget => "BLOCK_BUDGET",
            Self::MissingFeature => "MISSING_FEATURE",
            Self::DimensionMismatch => "DIMENSION_MISMATCH",
            Self::FootprintTooSmall => "FOOTPRINT_TOO_SMALL",
            Self::MissingWalls => "MISSING_WALLS",
            Self::MissingRoof => "MISSING_ROOF",
        }
    }
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条校验问题
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub code: IssueCode,
    pub message: String,
}

impl Issue {
    pub fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// 校验结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    pub score: f64,
}

impl ValidationOutcome {
    pub fn from_issues(errors: Vec<Issue>, warnings: Vec<Issue>) -> Self {
        Self {
            valid: errors.is_empty(),
            score: semantic_score(errors.len(), warnings.len()),
            errors,
            warnings,
        }
    }

    /// 分数扣分明细，供修复提示使用
    pub fn penalty_breakdown(&self) -> String {
        let mut lines = vec![format!(
            "score {:.2} = 1.00 - 0.20 x {} errors - 0.05 x {} warnings",
            self.score,
            self.errors.len(),
            self.warnings.len()
        )];
        lines.extend(self.errors.iter().map(|e| format!("  -0.20 {e}")));
        lines.extend(self.warnings.iter().map(|w| format!("  -0.05 {w}")));
        lines.join("\n")
    }
}

pub fn semantic_score(errors: usize, warnings: usize) -> f64 {
    (1.0 - 0.2 * errors as f64 - 0.05 * warnings as f64).clamp(0.0, 1.0)
}

/// 校验目标：类型、请求尺寸、请求特征
#[derive(Debug, Clone, Default)]
pub struct ValidationTarget {
    pub build_type: String,
    pub requested: Option<Size>,
    pub features: Vec<String>,
}

/// 需要墙体与屋顶证据的建筑类型
const BUILDING_TYPES: &[&str] = &[
    "house", "cottage", "cabin", "hut", "mansion", "castle", "tower", "church", "temple", "barn",
    "shop", "inn", "library", "palace", "fort", "building", "villa",
];

pub fn is_building_like(build_type: &str) -> bool {
    BUILDING_TYPES.contains(&build_type)
}

/// 去掉 `minecraft:` 命名空间与 `[state]` 后缀
pub fn normalize_block(id: &str) -> &str {
    let id = id.trim();
    let id = id.strip_prefix("minecraft:").unwrap_or(id);
    match id.find('[') {
        Some(i) => &id[..i],
        None => id,
    }
}

pub struct BlueprintValidator<'a> {
    config: &'a AppConfig,
}

impl<'a> BlueprintValidator<'a> {
    pub fn new(config: &'a AppConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, blueprint: &Blueprint, target: &ValidationTarget) -> ValidationOutcome {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        self.check_size(blueprint.size, &mut errors);
        self.check_operations(blueprint, &mut errors, &mut warnings);
        self.check_features(blueprint, target, &mut errors);
        self.check_dimensions_against_request(blueprint, target, &mut errors, &mut warnings);
        check_structure(blueprint, target, &mut errors, &mut warnings);

        ValidationOutcome::from_issues(errors, warnings)
    }

    fn check_size(&self, size: Size, errors: &mut Vec<Issue>) {
        if let Err(issue) = check_dimensions(size.width, size.height, size.depth) {
            errors.push(issue);
            return;
        }
        let max = self.config.generation.max_dimension;
        if size.width > max || size.depth > max {
            errors.push(Issue::new(
                IssueCode::DimensionTooLarge,
                format!("size {}x{} exceeds max dimension {max}", size.width, size.depth),
            ));
        }
        let world = &self.config.world;
        if size.height > world.max_y - world.min_y {
            errors.push(Issue::new(
                IssueCode::HeightExceeded,
                format!("height {} exceeds world height {}", size.height, world.max_y - world.min_y),
            ));
        }
    }

    fn check_operations(&self, blueprint: &Blueprint, errors: &mut Vec<Issue>, warnings: &mut Vec<Issue>) {
        let generation = &self.config.generation;
        let ops = &blueprint.operations;

        if ops.iter().all(Operation::is_marker) {
            errors.push(Issue::new(IssueCode::EmptyBlueprint, "blueprint has no placement operations"));
            return;
        }
        if ops.len() > generation.max_operations {
            errors.push(Issue::new(
                IssueCode::TooManyOperations,
                format!("{} operations exceed the limit of {}", ops.len(), generation.max_operations),
            ));
        }

        let mut unknown = BTreeSet::new();
        for block in blueprint.referenced_blocks() {
            let id = normalize_block(block);
            if !generation.allowed_blocks.iter().any(|b| b == id) {
                unknown.insert(id.to_string());
            }
        }
        for id in unknown {
            errors.push(Issue::new(IssueCode::UnknownBlock, format!("block '{id}' is not in the allowed list")));
        }

        let mut shift = BlockPos::default();
        let mut out_of_bounds = 0usize;
        for (i, op) in ops.iter().enumerate() {
            match op {
                Operation::CursorReset => shift = BlockPos::default(),
                Operation::Offset { dx, dy, dz } => shift = shift.offset(*dx, *dy, *dz),
                _ => {}
            }
            let geometry = std::iter::once(op)
                .chain(op.fallback())
                .find_map(|g| self.geometry_issue(g, shift, blueprint.size));
            if let Some(issue) = geometry {
                errors.push(Issue::new(issue.code, format!("operation {i} ({}): {}", op.kind_name(), issue.message)));
            }
            if let Some(fallback) = op.fallback() {
                if fallback.is_bulk() || fallback.is_marker() || matches!(fallback, Operation::Schematic { .. }) {
                    errors.push(Issue::new(
                        IssueCode::InvalidFallback,
                        format!(
                            "operation {i} ({}): fallback '{}' is not a stepwise operation",
                            op.kind_name(),
                            fallback.kind_name()
                        ),
                    ));
                }
            }
            let size = blueprint.size;
            if op.anchor_points().iter().map(|p| p.add(shift)).any(|p| {
                p.x < 0 || p.z < 0 || p.y < 0 || p.x >= size.width || p.z >= size.depth || p.y >= size.height
            }) {
                out_of_bounds += 1;
            }
        }
        if out_of_bounds > 0 {
            warnings.push(Issue::new(
                IssueCode::OutOfBounds,
                format!("{out_of_bounds} operations reach outside the declared size"),
            ));
        }

        let estimated = estimate_block_count(ops);
        if estimated > generation.max_estimated_blocks as u64 {
            warnings.push(Issue::new(
                IssueCode::BlockBudget,
                format!(
                    "estimated {estimated} blocks exceeds soft limit {}",
                    generation.max_estimated_blocks
                ),
            ));
        }
    }

    fn check_features(&self, blueprint: &Blueprint, target: &ValidationTarget, errors: &mut Vec<Issue>) {
        for feature in &target.features {
            if !has_feature_evidence(blueprint, feature) {
                errors.push(Issue::new(
                    IssueCode::MissingFeature,
                    format!("requested feature '{feature}' has no matching operation or block"),
                ));
            }
        }
    }

    fn check_dimensions_against_request(
        &self,
        blueprint: &Blueprint,
        target: &ValidationTarget,
        errors: &mut Vec<Issue>,
        warnings: &mut Vec<Issue>,
    ) {
        let size = blueprint.size;
        let generation = &self.config.generation;

        if let Some(requested) = target.requested {
            let tolerance = generation.dimension_tolerance;
            for (axis, want, got) in [
                ("width", requested.width, size.width),
                ("height", requested.height, size.height),
                ("depth", requested.depth, size.depth),
            ] {
                if want <= 0 {
                    continue;
                }
                let deviation = (got as i64 - want as i64).abs() as f64 / want as f64;
                if deviation > tolerance {
                    warnings.push(Issue::new(
                        IssueCode::DimensionMismatch,
                        format!(
                            "{axis} {got} differs from requested {want} by {:.0}% (tolerance {:.0}%)",
                            deviation * 100.0,
                            tolerance * 100.0
                        ),
                    ));
                }
            }
        }

        let build_type = if target.build_type.is_empty() {
            blueprint.build_type.as_str()
        } else {
            target.build_type.as_str()
        };
        let minimum = generation.min_footprint(build_type);
        if size.width > 0 && size.depth > 0 && size.footprint() < minimum {
            errors.push(Issue::new(
                IssueCode::FootprintTooSmall,
                format!(
                    "footprint {}x{} = {} is below the minimum {minimum} for '{build_type}'",
                    size.width,
                    size.depth,
                    size.footprint()
                ),
            ));
        }
    }

    /// 几何参数与锚点的硬上限：半径不超过 max_dimension，高度不超过世界高度，
    /// 锚点离声明包围盒水平方向不超过 max_dimension、竖直方向不超过世界高度
    fn geometry_issue(&self, op: &Operation, shift: BlockPos, size: Size) -> Option<Issue> {
        let max = self.config.generation.max_dimension;
        let world_height = self.config.world.max_y - self.config.world.min_y;
        let limits = (max, world_height);
        let result = match op {
            Operation::SpiralStaircase { radius, height, .. } | Operation::Cylinder { radius, height, .. } => {
                check_dimensions_bounded(*radius, *height, *radius, limits)
            }
            Operation::Sphere { radius, .. } | Operation::Dome { radius, .. } => {
                check_dimensions_bounded(*radius, *radius, *radius, limits)
            }
            Operation::WindowStrip { spacing: 0, .. } => {
                Err(Issue::new(IssueCode::ZeroDimension, "spacing must be positive"))
            }
            _ => Ok(()),
        };
        if let Err(issue) = result {
            return Some(issue);
        }

        let (max, world_height) = (max as i64, world_height as i64);
        let outside = |value: i32, len: i32, margin: i64| {
            let v = value as i64;
            v < -margin || v > len as i64 + margin
        };
        op.anchor_points()
            .into_iter()
            .map(|p| p.add(shift))
            .find(|p| {
                outside(p.x, size.width, max)
                    || outside(p.z, size.depth, max)
                    || outside(p.y, size.height, world_height)
            })
            .map(|p| {
                Issue::new(
                    IssueCode::DimensionTooLarge,
                    format!("anchor {p} lies beyond the hard build limit around the declared size"),
                )
            })
    }
}

fn check_dimensions_bounded(width: i32, height: i32, depth: i32, limits: (i32, i32)) -> Result<(), Issue> {
    check_dimensions(width, height, depth)?;
    let (max_dimension, world_height) = limits;
    if width > max_dimension || depth > max_dimension {
        return Err(Issue::new(
            IssueCode::DimensionTooLarge,
            format!("radius {} exceeds max dimension {max_dimension}", width.max(depth)),
        ));
    }
    if height > world_height {
        return Err(Issue::new(
            IssueCode::HeightExceeded,
            format!("height {height} exceeds world height {world_height}"),
        ));
    }
    Ok(())
}

fn check_structure(
    blueprint: &Blueprint,
    target: &ValidationTarget,
    errors: &mut Vec<Issue>,
    warnings: &mut Vec<Issue>,
) {
    let build_type = if target.build_type.is_empty() {
        blueprint.build_type.as_str()
    } else {
        target.build_type.as_str()
    };
    if !is_building_like(build_type) {
        return;
    }
    let any = |pred: fn(&Operation) -> bool| {
        blueprint
            .operations
            .iter()
            .any(|op| pred(op) || op.fallback().is_some_and(pred))
    };
    if !any(Operation::is_wall) {
        errors.push(Issue::new(
            IssueCode::MissingWalls,
            format!("'{build_type}' needs walls (wall, hollow_box, bulk_walls or hollow cylinder)"),
        ));
    }
    if !any(Operation::is_roof) {
        warnings.push(Issue::new(IssueCode::MissingRoof, format!("'{build_type}' has no roof operation")));
    }
}

/// 特征证据表：(特征名, 操作种类, 方块名片段)
const FEATURE_EVIDENCE: &[(&[&str], &[&str], &[&str])] = &[
    (&["door", "entrance"], &["door"], &["door"]),
    (&["window", "windows"], &["window_strip"], &["glass"]),
    (&["roof"], &["roof_gable", "roof_hip", "roof_flat", "dome"], &["stairs", "slab"]),
    (&["stairs", "staircase"], &["stairs", "spiral_staircase"], &["stairs"]),
    (&["tower", "turret"], &["cylinder"], &[]),
    (&["dome"], &["dome", "sphere"], &[]),
    (&["wall", "walls"], &["wall", "hollow_box", "bulk_walls"], &["wall"]),
    (&["floor"], &["floor", "fill", "bulk_fill"], &[]),
    (&["chimney"], &[], &["brick"]),
    (&["fence"], &[], &["fence"]),
    (&["light", "lighting", "lantern", "torch"], &[], &["lantern", "torch", "glowstone"]),
    (&["pool", "fountain", "moat"], &[], &["water"]),
    (&["garden"], &[], &["grass", "flower", "leaves"]),
];

/// 特征证据：操作种类或方块名
fn has_feature_evidence(blueprint: &Blueprint, feature: &str) -> bool {
    let feature = feature.trim().to_lowercase();
    let (kinds, blocks) = FEATURE_EVIDENCE
        .iter()
        .find(|(names, _, _)| names.contains(&feature.as_str()))
        .map(|(_, kinds, blocks)| (*kinds, *blocks))
        .unwrap_or((&[], &[]));

    let ops = blueprint
        .operations
        .iter()
        .flat_map(|op| std::iter::once(op).chain(op.fallback()));
    for op in ops {
        let kind = op.kind_name();
        if kinds.contains(&kind) || kind.contains(feature.as_str()) {
            return true;
        }
    }
    blueprint.referenced_blocks().iter().any(|b| {
        let id = normalize_block(b);
        blocks.iter().any(|needle| id.contains(needle)) || id.contains(feature.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn house() -> Blueprint {
        Blueprint::new(
            Size::new(7, 6, 7),
            vec![
                Operation::Fill {
                    from: BlockPos::new(0, 0, 0),
                    to: BlockPos::new(6, 0, 6),
                    block: "cobblestone".into(),
                },
                Operation::HollowBox {
                    from: BlockPos::new(0, 1, 0),
                    to: BlockPos::new(6, 4, 6),
                    block: "oak_planks".into(),
                },
                Operation::Door {
                    pos: BlockPos::new(3, 1, 0),
                    block: "oak_door".into(),
                    facing: Default::default(),
                },
                Operation::RoofGable {
                    from: BlockPos::new(0, 5, 0),
                    to: BlockPos::new(6, 5, 6),
                    block: "oak_stairs".into(),
                },
            ],
        )
        .with_build_type("house")
    }

    fn target(features: &[&str]) -> ValidationTarget {
        ValidationTarget {
            build_type: "house".into(),
            requested: Some(Size::new(7, 6, 7)),
            features: features.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_valid_house_scores_one() {
        let config = AppConfig::default();
        let outcome = BlueprintValidator::new(&config).validate(&house(), &target(&["door", "roof"]));
        assert!(outcome.valid, "{:?}", outcome.errors);
        assert_eq!(outcome.score, 1.0);
    }

    #[test]
    fn test_missing_walls_is_error_missing_roof_is_warning() {
        let config = AppConfig::default();
        let bp = house().with_operations(vec![Operation::Fill {
            from: BlockPos::new(0, 0, 0),
            to: BlockPos::new(6, 0, 6),
            block: "stone".into(),
        }]);
        let outcome = BlueprintValidator::new(&config).validate(&bp, &target(&[]));
        assert!(!outcome.valid);
        assert!(outcome.errors.iter().any(|e| e.code == IssueCode::MissingWalls));
        assert!(outcome.warnings.iter().any(|w| w.code == IssueCode::MissingRoof));
    }

    #[test]
    fn test_missing_feature_and_unknown_block() {
        let config = AppConfig::default();
        let mut bp = house();
        bp.operations.push(Operation::Set {
            pos: BlockPos::new(1, 1, 1),
            block: "minecraft:unobtainium".into(),
        });
        let outcome = BlueprintValidator::new(&config).validate(&bp, &target(&["chimney"]));
        let codes: Vec<_> = outcome.errors.iter().map(|e| e.code).collect();
        assert!(codes.contains(&IssueCode::MissingFeature));
        assert!(codes.contains(&IssueCode::UnknownBlock));
    }

    #[test]
    fn test_block_state_suffix_is_normalized() {
        assert_eq!(normalize_block("minecraft:oak_stairs[facing=north]"), "oak_stairs");
        assert_eq!(normalize_block("stone"), "stone");
    }

    #[test]
    fn test_dimension_tolerance_and_footprint() {
        let config = AppConfig::default();
        let mut bp = house();
        bp.size = Size::new(4, 6, 4);
        let outcome = BlueprintValidator::new(&config).validate(&bp, &target(&[]));
        assert!(outcome.warnings.iter().any(|w| w.code == IssueCode::DimensionMismatch));
        assert!(outcome.errors.iter().any(|e| e.code == IssueCode::FootprintTooSmall));
    }

    #[test]
    fn test_bulk_with_bulk_fallback_rejected() {
        let config = AppConfig::default();
        let inner = Operation::BulkFill {
            from: BlockPos::new(0, 0, 0),
            to: BlockPos::new(1, 0, 1),
            block: "stone".into(),
            fallback: Box::new(Operation::Fill {
                from: BlockPos::new(0, 0, 0),
                to: BlockPos::new(1, 0, 1),
                block: "stone".into(),
            }),
        };
        let mut bp = house();
        bp.operations.push(Operation::BulkFill {
            from: BlockPos::new(0, 0, 0),
            to: BlockPos::new(1, 0, 1),
            block: "stone".into(),
            fallback: Box::new(inner),
        });
        let outcome = BlueprintValidator::new(&config).validate(&bp, &target(&[]));
        assert!(outcome.errors.iter().any(|e| e.code == IssueCode::InvalidFallback));
    }

    #[test]
    fn test_extreme_cylinder_radius_is_error_not_overflow() {
        let config = AppConfig::default();
        let mut bp = house();
        bp.operations.push(Operation::Cylinder {
            base: BlockPos::new(-5, 0, 0),
            radius: i32::MAX,
            height: 4,
            block: "stone".into(),
            hollow: true,
        });
        let outcome = BlueprintValidator::new(&config).validate(&bp, &target(&[]));
        assert!(!outcome.valid);
        assert!(outcome.errors.iter().any(|e| e.code == IssueCode::DimensionTooLarge));
    }

    #[test]
    fn test_extreme_negative_width_reported_against_request() {
        let config = AppConfig::default();
        let mut bp = house();
        bp.size = Size::new(i32::MIN, 6, 7);
        let outcome = BlueprintValidator::new(&config).validate(&bp, &target(&[]));
        assert!(outcome.errors.iter().any(|e| e.code == IssueCode::NegativeDimension));
        assert!(outcome.warnings.iter().any(|w| w.code == IssueCode::DimensionMismatch));
    }

    #[test]
    fn test_giant_sphere_outside_declared_size_is_rejected() {
        let config = AppConfig::default();
        let mut bp = house();
        bp.operations.push(Operation::Sphere {
            center: BlockPos::new(3, 3, 3),
            radius: 50_000,
            block: "glass".into(),
            hollow: true,
        });
        let outcome = BlueprintValidator::new(&config).validate(&bp, &target(&[]));
        assert!(!outcome.valid);
        assert!(outcome.errors.iter().any(|e| e.code == IssueCode::DimensionTooLarge));
    }

    #[test]
    fn test_far_anchor_and_oversized_fallback_are_errors() {
        let config = AppConfig::default();
        let mut bp = house();
        bp.operations.push(Operation::Set {
            pos: BlockPos::new(1_000_000, 1, 1),
            block: "stone".into(),
        });
        let outcome = BlueprintValidator::new(&config).validate(&bp, &target(&[]));
        assert!(outcome.errors.iter().any(|e| e.message.contains("hard build limit")));

        let mut bp = house();
        bp.operations.push(Operation::BulkFill {
            from: BlockPos::new(0, 0, 0),
            to: BlockPos::new(6, 0, 6),
            block: "stone".into(),
            fallback: Box::new(Operation::Fill {
                from: BlockPos::new(0, 0, 0),
                to: BlockPos::new(i32::MAX, 0, 6),
                block: "stone".into(),
            }),
        });
        let outcome = BlueprintValidator::new(&config).validate(&bp, &target(&[]));
        assert!(outcome.errors.iter().any(|e| e.code == IssueCode::DimensionTooLarge));
    }

    #[test]
    fn test_small_overhang_stays_a_warning() {
        let config = AppConfig::default();
        let mut bp = house();
        bp.operations.push(Operation::Set {
            pos: BlockPos::new(-1, 1, 3),
            block: "stone".into(),
        });
        let outcome = BlueprintValidator::new(&config).validate(&bp, &target(&[]));
        assert!(outcome.valid, "{:?}", outcome.errors);
        assert!(outcome.warnings.iter().any(|w| w.code == IssueCode::OutOfBounds));
    }

    #[test]
    fn test_score_formula_clamps() {
        assert_eq!(semantic_score(0, 0), 1.0);
        assert!((semantic_score(1, 2) - 0.7).abs() < 1e-9);
        assert_eq!(semantic_score(6, 0), 0.0);
    }
}
