//! 站位覆盖：把目标方块划分到若干站位，每个站位触及半径内的方块由该站位放置
//!
//! 贪心：每轮从所有未覆盖方块生成候选站位（4 个正方向 + 4 个对角方向，距离 R−P，同一 Y，向下取整），
//! 排除与待放方块重合或位于待放方块正下方的候选，选覆盖未覆盖方块最多者。
//! 被分配的下标立即移出未覆盖集合，因此结果是对全部下标的划分。
//!
//! 纯函数，不做 IO，便于性质测试。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::f64::consts::FRAC_1_SQRT_2;

use serde::Serialize;

use crate::blueprint::BlockPos;

/// 站位：位置、分配到的目标下标（升序）、触及半径
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Station {
    pub position: BlockPos,
    pub assigned: Vec<usize>,
    pub reach: f64,
}

/// 有序站位列表
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageAssignment {
    pub stations: Vec<Station>,
}

impl CoverageAssignment {
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter()
    }

    pub fn assigned_count(&self) -> usize {
        self.stations.iter().map(|s| s.assigned.len()).sum()
    }

    /// 各站位下标的并集恰为 0..n 且互不重复
    pub fn is_partition_of(&self, n: usize) -> bool {
        let mut seen = vec![false; n];
        for index in self.stations.iter().flat_map(|s| s.assigned.iter().copied()) {
            match seen.get_mut(index) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }
        seen.into_iter().all(|v| v)
    }
}

/// 按半径分桶的未覆盖方块索引
struct Grid {
    cell: i32,
    buckets: HashMap<(i32, i32, i32), Vec<usize>>,
}

impl Grid {
    fn new(reach: f64, targets: &[BlockPos]) -> Self {
        let cell = (reach.ceil() as i32).max(1);
        let mut buckets: HashMap<(i32, i32, i32), Vec<usize>> = HashMap::new();
        for (i, pos) in targets.iter().enumerate() {
            buckets.entry(Self::key_for(cell, *pos)).or_default().push(i);
        }
        Self { cell, buckets }
    }

    fn key_for(cell: i32, pos: BlockPos) -> (i32, i32, i32) {
        (pos.x.div_euclid(cell), pos.y.div_euclid(cell), pos.z.div_euclid(cell))
    }

    /// 以 center 为中心、半径 reach 内的未覆盖下标
    fn within<'a>(
        &'a self,
        center: BlockPos,
        reach: f64,
        targets: &'a [BlockPos],
    ) -> impl Iterator<Item = usize> + 'a {
        let (cx, cy, cz) = Self::key_for(self.cell, center);
        (-1..=1)
            .flat_map(move |dx| (-1..=1).flat_map(move |dy| (-1..=1).map(move |dz| (cx + dx, cy + dy, cz + dz))))
            .filter_map(move |key| self.buckets.get(&key))
            .flatten()
            .copied()
            .filter(move |&i| targets[i].distance(center) <= reach)
    }

    fn remove(&mut self, index: usize, pos: BlockPos) {
        let key = Self::key_for(self.cell, pos);
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.retain(|&i| i != index);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }
}

/// 8 个候选偏移（x, z）：4 个正方向 + 4 个对角方向
fn candidate_offsets(distance: f64) -> [(f64, f64); 8] {
    let diag = distance * FRAC_1_SQRT_2;
    [
        (distance, 0.0),
        (-distance, 0.0),
        (0.0, distance),
        (0.0, -distance),
        (diag, diag),
        (diag, -diag),
        (-diag, diag),
        (-diag, -diag),
    ]
}

/// 贪心划分目标方块到站位
pub fn plan_stations(targets: &[BlockPos], reach: f64, padding: f64) -> CoverageAssignment {
    let mut uncovered: BTreeSet<usize> = (0..targets.len()).collect();
    // 同一坐标可能出现多次，按计数维护待放集合
    let mut pending: HashMap<BlockPos, usize> = HashMap::new();
    for pos in targets {
        *pending.entry(*pos).or_default() += 1;
    }
    let mut grid = Grid::new(reach, targets);
    let offsets = candidate_offsets((reach - padding).max(0.0));
    let mut stations = Vec::new();

    while let Some(&first) = uncovered.iter().next() {
        let mut seen: HashSet<BlockPos> = HashSet::new();
        let mut best: Option<(BlockPos, usize)> = None;

        for &i in &uncovered {
            let base = targets[i];
            for (ox, oz) in offsets {
                let candidate = BlockPos::new(
                    (base.x as f64 + ox).floor() as i32,
                    base.y,
                    (base.z as f64 + oz).floor() as i32,
                );
                if !seen.insert(candidate)
                    || pending.contains_key(&candidate)
                    || pending.contains_key(&candidate.above())
                {
                    continue;
                }
                let coverage = grid.within(candidate, reach, targets).count();
                if coverage > best.map_or(0, |(_, c)| c) {
                    best = Some((candidate, coverage));
                }
            }
        }

        let (position, mut assigned) = match best {
            Some((position, _)) => (position, grid.within(position, reach, targets).collect::<Vec<_>>()),
            None => (targets[first].offset(1, 0, 0), vec![first]),
        };
        assigned.sort_unstable();

        for &i in &assigned {
            uncovered.remove(&i);
            grid.remove(i, targets[i]);
            if let Some(count) = pending.get_mut(&targets[i]) {
                *count -= 1;
                if *count == 0 {
                    pending.remove(&targets[i]);
                }
            }
        }
        stations.push(Station {
            position,
            assigned,
            reach,
        });
    }

    tracing::debug!(
        targets = targets.len(),
        stations = stations.len(),
        "Station coverage planned"
    );
    CoverageAssignment { stations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_block_gets_one_station() {
        let plan = plan_stations(&[BlockPos::new(0, 0, 0)], 4.5, 0.5);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.stations[0].assigned, vec![0]);
    }

    #[test]
    fn test_ten_collinear_blocks_need_at_most_three_stations() {
        let targets: Vec<_> = (0..10).map(|x| BlockPos::new(x, 0, 0)).collect();
        let plan = plan_stations(&targets, 4.5, 0.5);
        assert!(plan.len() <= 3, "got {} stations", plan.len());
        assert!(plan.is_partition_of(10));
    }

    #[test]
    fn test_station_never_stands_in_or_under_a_target() {
        let targets: Vec<_> = (0..5)
            .flat_map(|x| (0..5).map(move |z| BlockPos::new(x, 0, z)))
            .chain((0..5).map(|x| BlockPos::new(x, 1, 4)))
            .collect();
        let plan = plan_stations(&targets, 4.5, 0.5);
        for station in plan.iter() {
            assert!(!targets.contains(&station.position));
            assert!(!targets.contains(&station.position.above()));
        }
        assert!(plan.is_partition_of(targets.len()));
    }

    #[test]
    fn test_empty_input_yields_no_stations() {
        assert!(plan_stations(&[], 4.5, 0.5).is_empty());
    }

    #[test]
    fn test_duplicate_positions_are_both_assigned() {
        let p = BlockPos::new(3, 2, 1);
        let plan = plan_stations(&[p, p], 4.5, 0.5);
        assert!(plan.is_partition_of(2));
    }

    proptest! {
        #[test]
        fn test_assignment_is_partition_and_within_reach(
            coords in prop::collection::vec((-12i32..12, -3i32..6, -12i32..12), 1..60)
        ) {
            let targets: Vec<_> = coords.into_iter().map(|(x, y, z)| BlockPos::new(x, y, z)).collect();
            let plan = plan_stations(&targets, 4.5, 0.5);
            prop_assert!(plan.is_partition_of(targets.len()));
            prop_assert_eq!(plan.assigned_count(), targets.len());
            for station in plan.iter() {
                prop_assert!(!station.assigned.is_empty());
                for &i in &station.assigned {
                    prop_assert!(targets[i].distance(station.position) <= 4.5);
                }
            }
        }
    }
}
