//! 栅格化：把操作展开为逐块放置列表
//!
//! bulk 操作按其 fallback 展开；cursor_reset / offset 标记改变后续操作的平移量；
//! 同一坐标多次写入时保留首次出现的顺序、采用最后写入的方块。

use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;

use serde::Serialize;

use crate::blueprint::{BlockPos, Blueprint, Operation};

/// 单个放置目标（世界坐标）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub pos: BlockPos,
    pub block: String,
}

/// 把蓝图展开为世界坐标下的放置列表
pub fn rasterize(blueprint: &Blueprint, origin: BlockPos) -> Vec<Placement> {
    let mut placements: Vec<Placement> = Vec::new();
    let mut index: HashMap<BlockPos, usize> = HashMap::new();
    let mut shift = BlockPos::default();

    for op in &blueprint.operations {
        match op {
            Operation::CursorReset => {
                shift = BlockPos::default();
                continue;
            }
            Operation::Offset { dx, dy, dz } => {
                shift = shift.offset(*dx, *dy, *dz);
                continue;
            }
            Operation::Schematic { name, .. } => {
                tracing::debug!("Schematic '{}' is expanded by the placement side, skipping", name);
                continue;
            }
            _ => {}
        }

        let base = origin.add(shift);
        for (pos, block) in expand(op) {
            let world = base.add(pos);
            match index.get(&world) {
                Some(&i) => placements[i].block = block.to_string(),
                None => {
                    index.insert(world, placements.len());
                    placements.push(Placement {
                        pos: world,
                        block: block.to_string(),
                    });
                }
            }
        }
    }
    placements
}

/// 估算方块数（不去重），用于软上限告警
pub fn estimate_block_count(operations: &[Operation]) -> u64 {
    operations.iter().map(estimate_op).fold(0u64, u64::saturating_add)
}

fn estimate_op(op: &Operation) -> u64 {
    let r = |v: i32| v.max(0) as u64;
    match op {
        Operation::Clear { from, to }
        | Operation::Fill { from, to, .. }
        | Operation::Floor { from, to, .. }
        | Operation::Wall { from, to, .. }
        | Operation::RoofFlat { from, to, .. } => box_volume(*from, *to),
        Operation::HollowBox { from, to, .. } => {
            let (w, h, d) = extents(*from, *to);
            let cube = |w: u64, h: u64, d: u64| w as u128 * h as u128 * d as u128;
            let shell = cube(w, h, d) - cube(w.saturating_sub(2), h.saturating_sub(2), d.saturating_sub(2));
            u64::try_from(shell).unwrap_or(u64::MAX)
        }
        Operation::RoofGable { from, to, .. } | Operation::RoofHip { from, to, .. } => {
            let (w, _, d) = extents(*from, *to);
            w.saturating_mul(d)
        }
        Operation::Set { .. } => 1,
        Operation::Door { .. } => 2,
        Operation::Line { from, to, .. }
        | Operation::WindowStrip { from, to, .. }
        | Operation::Stairs { from, to, .. } => line_steps(*from, *to).saturating_add(1),
        Operation::SpiralStaircase { height, .. } => r(*height),
        Operation::Cylinder { radius, height, .. } => {
            let area = (PI * (r(*radius) as f64 + 0.5).powi(2)).ceil() as u64;
            area.saturating_mul(r(*height))
        }
        Operation::Sphere { radius, .. } => {
            (4.0 / 3.0 * PI * (r(*radius) as f64 + 0.5).powi(3)).ceil() as u64
        }
        Operation::Dome { radius, .. } => (2.0 * PI * (r(*radius) as f64 + 0.5).powi(2)).ceil() as u64,
        Operation::BulkFill { fallback, .. }
        | Operation::BulkReplace { fallback, .. }
        | Operation::BulkWalls { fallback, .. } => estimate_op(fallback),
        Operation::Schematic { .. } | Operation::CursorReset | Operation::Offset { .. } => 0,
    }
}

/// 单个操作展开为相对坐标与方块
fn expand(op: &Operation) -> Vec<(BlockPos, &str)> {
    match op {
        Operation::Clear { from, to } => cuboid(*from, *to).map(|p| (p, "air")).collect(),
        Operation::Fill { from, to, block }
        | Operation::Floor { from, to, block }
        | Operation::Wall { from, to, block }
        | Operation::RoofFlat { from, to, block } => {
            cuboid(*from, *to).map(|p| (p, block.as_str())).collect()
        }
        Operation::HollowBox { from, to, block } => {
            let (lo, hi) = corners(*from, *to);
            cuboid(*from, *to)
                .filter(|p| {
                    p.x == lo.x || p.x == hi.x || p.y == lo.y || p.y == hi.y || p.z == lo.z || p.z == hi.z
                })
                .map(|p| (p, block.as_str()))
                .collect()
        }
        Operation::Set { pos, block } => vec![(*pos, block.as_str())],
        Operation::Line { from, to, block } | Operation::Stairs { from, to, block, .. } => {
            line(*from, *to).into_iter().map(|p| (p, block.as_str())).collect()
        }
        Operation::WindowStrip {
            from,
            to,
            block,
            spacing,
        } => {
            let step = (*spacing).max(1) as usize;
            line(*from, *to)
                .into_iter()
                .enumerate()
                .filter(|(i, _)| i % step == 0)
                .map(|(_, p)| (p, block.as_str()))
                .collect()
        }
        Operation::Door { pos, block, .. } => vec![(*pos, block.as_str()), (pos.above(), block.as_str())],
        Operation::SpiralStaircase {
            base,
            radius,
            height,
            block,
        } => (0..(*height).max(0))
            .map(|h| {
                let angle = h as f64 * PI / 4.0;
                let x = (*radius as f64 * angle.cos()).round() as i32;
                let z = (*radius as f64 * angle.sin()).round() as i32;
                (base.offset(x, h, z), block.as_str())
            })
            .collect(),
        Operation::Cylinder {
            base,
            radius,
            height,
            block,
            hollow,
        } => {
            let mut out = Vec::new();
            for dy in 0..(*height).max(0) {
                for (dx, dz) in disc(*radius, *hollow) {
                    out.push((base.offset(dx, dy, dz), block.as_str()));
                }
            }
            out
        }
        Operation::Sphere {
            center,
            radius,
            block,
            hollow,
        } => ball(*radius, *hollow, false)
            .into_iter()
            .map(|(dx, dy, dz)| (center.offset(dx, dy, dz), block.as_str()))
            .collect(),
        Operation::Dome {
            center,
            radius,
            block,
        } => ball(*radius, true, true)
            .into_iter()
            .map(|(dx, dy, dz)| (center.offset(dx, dy, dz), block.as_str()))
            .collect(),
        Operation::RoofGable { from, to, block } => gable(*from, *to)
            .into_iter()
            .map(|p| (p, block.as_str()))
            .collect(),
        Operation::RoofHip { from, to, block } => hip(*from, *to)
            .into_iter()
            .map(|p| (p, block.as_str()))
            .collect(),
        Operation::BulkFill { fallback, .. }
        | Operation::BulkReplace { fallback, .. }
        | Operation::BulkWalls { fallback, .. } => expand(fallback),
        Operation::Schematic { .. } | Operation::CursorReset | Operation::Offset { .. } => Vec::new(),
    }
}

fn corners(a: BlockPos, b: BlockPos) -> (BlockPos, BlockPos) {
    (
        BlockPos::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
        BlockPos::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
    )
}

/// 各轴格数；在 i64 中求差，极端坐标不会溢出
fn extents(a: BlockPos, b: BlockPos) -> (u64, u64, u64) {
    let (lo, hi) = corners(a, b);
    let span = |lo: i32, hi: i32| (hi as i64 - lo as i64) as u64 + 1;
    (span(lo.x, hi.x), span(lo.y, hi.y), span(lo.z, hi.z))
}

fn box_volume(a: BlockPos, b: BlockPos) -> u64 {
    let (w, h, d) = extents(a, b);
    w.saturating_mul(h).saturating_mul(d)
}

/// 自下而上遍历长方体内所有格
fn cuboid(a: BlockPos, b: BlockPos) -> impl Iterator<Item = BlockPos> {
    let (lo, hi) = corners(a, b);
    (lo.y..=hi.y).flat_map(move |y| {
        (lo.x..=hi.x).flat_map(move |x| (lo.z..=hi.z).map(move |z| BlockPos::new(x, y, z)))
    })
}

fn line_steps(a: BlockPos, b: BlockPos) -> u64 {
    let axis = |p: i32, q: i32| (q as i64 - p as i64).unsigned_abs();
    axis(a.x, b.x).max(axis(a.y, b.y)).max(axis(a.z, b.z))
}

/// 三维 DDA 直线
fn line(a: BlockPos, b: BlockPos) -> Vec<BlockPos> {
    let steps = line_steps(a, b);
    if steps == 0 {
        return vec![a];
    }
    (0..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            BlockPos::new(
                (a.x as f64 + (b.x as f64 - a.x as f64) * t).round() as i32,
                (a.y as f64 + (b.y as f64 - a.y as f64) * t).round() as i32,
                (a.z as f64 + (b.z as f64 - a.z as f64) * t).round() as i32,
            )
        })
        .collect()
}

fn sq(v: i32) -> i64 {
    let v = v as i64;
    v * v
}

fn disc(radius: i32, hollow: bool) -> Vec<(i32, i32)> {
    let radius = radius.max(0);
    let outer = (radius as f64 + 0.5).powi(2);
    let inner = (radius as f64 - 0.5).powi(2);
    let mut out = Vec::new();
    for dx in -radius..=radius {
        for dz in -radius..=radius {
            let d2 = (sq(dx) + sq(dz)) as f64;
            if d2 <= outer && (!hollow || d2 > inner) {
                out.push((dx, dz));
            }
        }
    }
    out
}

fn ball(radius: i32, hollow: bool, upper_only: bool) -> Vec<(i32, i32, i32)> {
    let radius = radius.max(0);
    let outer = (radius as f64 + 0.5).powi(2);
    let inner = (radius as f64 - 0.5).powi(2);
    let y_start = if upper_only { 0 } else { -radius };
    let mut out = Vec::new();
    for dy in y_start..=radius {
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                let d2 = (sq(dx) + sq(dy) + sq(dz)) as f64;
                if d2 <= outer && (!hollow || d2 > inner) {
                    out.push((dx, dy, dz));
                }
            }
        }
    }
    out
}

/// 双坡屋顶：屋脊沿较长水平轴，每升一层两侧各内收一格
fn gable(a: BlockPos, b: BlockPos) -> Vec<BlockPos> {
    let (lo, hi) = corners(a, b);
    let ridge_along_x = hi.x as i64 - lo.x as i64 >= hi.z as i64 - lo.z as i64;
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut k = 0;
    loop {
        let (short_lo, short_hi) = if ridge_along_x {
            (lo.z + k, hi.z - k)
        } else {
            (lo.x + k, hi.x - k)
        };
        if short_lo > short_hi {
            break;
        }
        let y = lo.y.saturating_add(k);
        let (long_lo, long_hi) = if ridge_along_x { (lo.x, hi.x) } else { (lo.z, hi.z) };
        for l in long_lo..=long_hi {
            for s in [short_lo, short_hi] {
                let p = if ridge_along_x {
                    BlockPos::new(l, y, s)
                } else {
                    BlockPos::new(s, y, l)
                };
                if seen.insert(p) {
                    out.push(p);
                }
            }
        }
        k += 1;
    }
    out
}

/// 四坡屋顶：每升一层四边同时内收
fn hip(a: BlockPos, b: BlockPos) -> Vec<BlockPos> {
    let (lo, hi) = corners(a, b);
    let mut out = Vec::new();
    let mut k = 0;
    while lo.x + k <= hi.x - k && lo.z + k <= hi.z - k {
        let y = lo.y.saturating_add(k);
        let (x0, x1, z0, z1) = (lo.x + k, hi.x - k, lo.z + k, hi.z - k);
        for x in x0..=x1 {
            for z in z0..=z1 {
                if x == x0 || x == x1 || z == z0 || z == z1 {
                    out.push(BlockPos::new(x, y, z));
                }
            }
        }
        k += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::Size;

    fn bp(ops: Vec<Operation>) -> Blueprint {
        Blueprint::new(Size::new(10, 10, 10), ops)
    }

    #[test]
    fn test_fill_is_bottom_up_and_complete() {
        let placements = rasterize(
            &bp(vec![Operation::Fill {
                from: BlockPos::new(0, 0, 0),
                to: BlockPos::new(1, 1, 1),
                block: "stone".into(),
            }]),
            BlockPos::default(),
        );
        assert_eq!(placements.len(), 8);
        assert!(placements[..4].iter().all(|p| p.pos.y == 0));
    }

    #[test]
    fn test_hollow_box_skips_interior() {
        let placements = rasterize(
            &bp(vec![Operation::HollowBox {
                from: BlockPos::new(0, 0, 0),
                to: BlockPos::new(2, 2, 2),
                block: "stone".into(),
            }]),
            BlockPos::default(),
        );
        assert_eq!(placements.len(), 26);
        assert!(!placements.iter().any(|p| p.pos == BlockPos::new(1, 1, 1)));
    }

    #[test]
    fn test_later_write_replaces_block() {
        let placements = rasterize(
            &bp(vec![
                Operation::Set {
                    pos: BlockPos::new(0, 0, 0),
                    block: "stone".into(),
                },
                Operation::Set {
                    pos: BlockPos::new(0, 0, 0),
                    block: "glass".into(),
                },
            ]),
            BlockPos::default(),
        );
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].block, "glass");
    }

    #[test]
    fn test_markers_shift_and_reset() {
        let set = |x| Operation::Set {
            pos: BlockPos::new(x, 0, 0),
            block: "stone".into(),
        };
        let placements = rasterize(
            &bp(vec![
                Operation::CursorReset,
                set(0),
                Operation::CursorReset,
                Operation::Offset { dx: 20, dy: 0, dz: 5 },
                set(0),
                Operation::CursorReset,
                set(1),
            ]),
            BlockPos::new(100, 64, 100),
        );
        let positions: Vec<_> = placements.iter().map(|p| p.pos).collect();
        assert_eq!(
            positions,
            vec![
                BlockPos::new(100, 64, 100),
                BlockPos::new(120, 64, 105),
                BlockPos::new(101, 64, 100)
            ]
        );
    }

    #[test]
    fn test_bulk_expands_through_fallback() {
        let fallback = Operation::Fill {
            from: BlockPos::new(0, 0, 0),
            to: BlockPos::new(2, 0, 2),
            block: "stone".into(),
        };
        let placements = rasterize(
            &bp(vec![Operation::BulkFill {
                from: BlockPos::new(0, 0, 0),
                to: BlockPos::new(2, 0, 2),
                block: "stone".into(),
                fallback: Box::new(fallback),
            }]),
            BlockPos::default(),
        );
        assert_eq!(placements.len(), 9);
    }

    #[test]
    fn test_line_and_window_strip() {
        assert_eq!(line(BlockPos::new(0, 0, 0), BlockPos::new(4, 2, 0)).len(), 5);
        let placements = rasterize(
            &bp(vec![Operation::WindowStrip {
                from: BlockPos::new(0, 1, 0),
                to: BlockPos::new(6, 1, 0),
                block: "glass_pane".into(),
                spacing: 2,
            }]),
            BlockPos::default(),
        );
        assert_eq!(placements.len(), 4);
    }

    #[test]
    fn test_estimate_matches_simple_shapes() {
        let ops = vec![
            Operation::Fill {
                from: BlockPos::new(0, 0, 0),
                to: BlockPos::new(9, 0, 9),
                block: "stone".into(),
            },
            Operation::Door {
                pos: BlockPos::new(0, 1, 0),
                block: "oak_door".into(),
                facing: Default::default(),
            },
        ];
        assert_eq!(estimate_block_count(&ops), 102);
    }

    #[test]
    fn test_gable_roof_rises_to_ridge() {
        let cells = gable(BlockPos::new(0, 5, 0), BlockPos::new(6, 5, 4));
        let top = cells.iter().map(|p| p.y).max().unwrap();
        assert_eq!(top, 7);
        assert!(cells.contains(&BlockPos::new(3, 7, 2)));
    }

    #[test]
    fn test_gable_cells_are_unique_on_wide_roof() {
        let cells = gable(BlockPos::new(0, 0, 0), BlockPos::new(199, 0, 99));
        let unique: HashSet<_> = cells.iter().collect();
        assert_eq!(unique.len(), cells.len());
        // 每层两条檐，共 50 层
        assert_eq!(cells.len(), 200 * 2 * 50);
    }

    #[test]
    fn test_estimate_saturates_on_extreme_geometry() {
        let ops = vec![
            Operation::HollowBox {
                from: BlockPos::new(i32::MIN, i32::MIN, i32::MIN),
                to: BlockPos::new(i32::MAX, i32::MAX, i32::MAX),
                block: "stone".into(),
            },
            Operation::Line {
                from: BlockPos::new(i32::MIN, 0, 0),
                to: BlockPos::new(i32::MAX, 0, 0),
                block: "stone".into(),
            },
            Operation::Sphere {
                center: BlockPos::default(),
                radius: i32::MAX,
                block: "glass".into(),
                hollow: false,
            },
        ];
        assert_eq!(estimate_op(&ops[0]), u64::MAX);
        assert_eq!(estimate_op(&ops[1]), 1u64 << 32);
        assert_eq!(estimate_block_count(&ops), u64::MAX);
        assert_eq!(extents(BlockPos::new(i32::MIN, 0, 0), BlockPos::new(i32::MAX, 0, 0)).0, 1 << 32);
    }

    #[test]
    fn test_negative_radius_expands_to_single_cell() {
        assert_eq!(disc(i32::MIN, false), vec![(0, 0)]);
        assert_eq!(ball(-3, true, false), Vec::<(i32, i32, i32)>::new());
    }
}
