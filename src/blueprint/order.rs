//! 建造顺序优化：按「清场 → 地基 → 地板 → 墙 → 塔/穹顶 → 屋顶 → 门窗楼梯 → 细节 → 整体结构」排序
//!
//! 排序键为 (优先级, 最低 Y)，稳定排序；合并标记（cursor_reset / offset）原位保留并作为分段边界，
//! 每段独立排序。多次应用结果不变。

use crate::blueprint::{Blueprint, Operation};

/// 按操作种类给出的建造优先级（越小越先）
pub fn priority(op: &Operation) -> u8 {
    match op {
        Operation::Clear { .. } => 0,
        Operation::Fill { .. } | Operation::BulkFill { .. } => 10,
        Operation::BulkReplace { .. } => 15,
        Operation::Floor { .. } => 20,
        Operation::Wall { .. } | Operation::HollowBox { .. } | Operation::BulkWalls { .. } => 30,
        Operation::Cylinder { .. } | Operation::Sphere { .. } | Operation::Dome { .. } => 40,
        Operation::RoofGable { .. } | Operation::RoofHip { .. } | Operation::RoofFlat { .. } => 50,
        Operation::Door { .. }
        | Operation::WindowStrip { .. }
        | Operation::Stairs { .. }
        | Operation::SpiralStaircase { .. } => 60,
        Operation::Set { .. } | Operation::Line { .. } => 70,
        Operation::Schematic { .. } => 90,
        // 标记不参与排序
        Operation::CursorReset | Operation::Offset { .. } => u8::MAX,
    }
}

/// 建造顺序优化器
#[derive(Debug, Default, Clone, Copy)]
pub struct BuildOrderOptimizer;

impl BuildOrderOptimizer {
    pub fn new() -> Self {
        Self
    }

    /// 返回重新排序后的新蓝图
    pub fn optimize(&self, blueprint: &Blueprint) -> Blueprint {
        let operations = self.order(&blueprint.operations);
        blueprint.clone().with_operations(operations)
    }

    pub fn order(&self, operations: &[Operation]) -> Vec<Operation> {
        let mut out = Vec::with_capacity(operations.len());
        let mut segment: Vec<&Operation> = Vec::new();

        for op in operations {
            if op.is_marker() {
                flush(&mut segment, &mut out);
                out.push(op.clone());
            } else {
                segment.push(op);
            }
        }
        flush(&mut segment, &mut out);
        out
    }
}

fn flush(segment: &mut Vec<&Operation>, out: &mut Vec<Operation>) {
    // sort_by_key 为稳定排序，同键保持原相对顺序
    segment.sort_by_key(|op| (priority(op), op.min_y().unwrap_or(0)));
    out.extend(segment.drain(..).cloned());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{BlockPos, Size};
    use proptest::prelude::*;

    fn set(y: i32, block: &str) -> Operation {
        Operation::Set {
            pos: BlockPos::new(0, y, 0),
            block: block.into(),
        }
    }

    fn roof(y: i32) -> Operation {
        Operation::RoofGable {
            from: BlockPos::new(0, y, 0),
            to: BlockPos::new(4, y, 4),
            block: "oak_stairs".into(),
        }
    }

    fn wall(y: i32) -> Operation {
        Operation::Wall {
            from: BlockPos::new(0, y, 0),
            to: BlockPos::new(4, y + 3, 0),
            block: "stone".into(),
        }
    }

    fn fill(y: i32) -> Operation {
        Operation::Fill {
            from: BlockPos::new(0, y, 0),
            to: BlockPos::new(4, y, 4),
            block: "cobblestone".into(),
        }
    }

    #[test]
    fn test_foundation_walls_roof_detail_order() {
        let ops = vec![set(5, "lantern"), roof(4), wall(1), fill(0)];
        let ordered = BuildOrderOptimizer::new().order(&ops);
        let kinds: Vec<_> = ordered.iter().map(Operation::kind_name).collect();
        assert_eq!(kinds, vec!["fill", "wall", "roof_gable", "set"]);
    }

    #[test]
    fn test_equal_priority_sorted_by_min_y_then_original_order() {
        let ops = vec![set(3, "a"), set(1, "b"), set(3, "c"), set(1, "d")];
        let ordered = BuildOrderOptimizer::new().order(&ops);
        let blocks: Vec<_> = ordered.iter().flat_map(|op| op.blocks()).collect();
        assert_eq!(blocks, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_markers_keep_position_and_segment_sorting() {
        let ops = vec![
            Operation::CursorReset,
            roof(4),
            fill(0),
            Operation::CursorReset,
            Operation::Offset { dx: 12, dy: 0, dz: 0 },
            set(2, "torch"),
            wall(1),
        ];
        let ordered = BuildOrderOptimizer::new().order(&ops);
        let kinds: Vec<_> = ordered.iter().map(Operation::kind_name).collect();
        assert_eq!(
            kinds,
            vec!["cursor_reset", "fill", "roof_gable", "cursor_reset", "offset", "wall", "set"]
        );
    }

    #[test]
    fn test_optimize_twice_is_identical() {
        let bp = Blueprint::new(
            Size::new(5, 6, 5),
            vec![set(5, "lantern"), roof(4), wall(1), fill(0), set(0, "torch")],
        );
        let optimizer = BuildOrderOptimizer::new();
        let once = optimizer.optimize(&bp);
        let twice = optimizer.optimize(&once);
        assert_eq!(once, twice);
        assert_eq!(once.palette, bp.palette);
    }

    fn arb_op() -> impl Strategy<Value = Operation> {
        (0u8..5, -5i32..20).prop_map(|(kind, y)| match kind {
            0 => set(y, "stone"),
            1 => roof(y),
            2 => wall(y),
            3 => fill(y),
            _ => Operation::CursorReset,
        })
    }

    proptest! {
        #[test]
        fn test_order_is_idempotent_and_sorted(ops in prop::collection::vec(arb_op(), 0..40)) {
            let optimizer = BuildOrderOptimizer::new();
            let once = optimizer.order(&ops);
            let twice = optimizer.order(&once);
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(once.len(), ops.len());

            for segment in once.split(Operation::is_marker) {
                for pair in segment.windows(2) {
                    let a = (priority(&pair[0]), pair[0].min_y().unwrap_or(0));
                    let b = (priority(&pair[1]), pair[1].min_y().unwrap_or(0));
                    prop_assert!(a <= b);
                }
            }
        }
    }
}
