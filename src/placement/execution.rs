//! 按站位执行放置：移动到站位，逐块放置分配到的目标
//!
//! 移动与放置失败都不中断整体建造，只计数并记录告警；站位之间检查取消令牌。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::blueprint::{BlockPos, Placement};
use crate::placement::coverage::CoverageAssignment;

/// 世界会话错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Movement failed: {0}")]
    Movement(String),
    #[error("Placement failed: {0}")]
    Placement(String),
}

/// 放置执行端（世界会话）边界
#[async_trait]
pub trait WorldSession: Send + Sync {
    async fn move_to(&self, pos: BlockPos) -> Result<(), ExecutionError>;
    async fn place_block(&self, pos: BlockPos, block: &str) -> Result<(), ExecutionError>;
}

/// 执行汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub total: usize,
    pub placed: usize,
    pub failed: usize,
    pub stations_visited: usize,
    pub cancelled: bool,
    pub warnings: Vec<String>,
}

impl ExecutionReport {
    /// 已处理比例（成功 + 失败）/ 总数
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.placed + self.failed) as f64 / self.total as f64
    }
}

/// 按站位顺序执行
pub struct StationWalker {
    session: Arc<dyn WorldSession>,
    cancel: CancellationToken,
}

impl StationWalker {
    pub fn new(session: Arc<dyn WorldSession>) -> Self {
        Self {
            session,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub async fn execute(&self, placements: &[Placement], assignment: &CoverageAssignment) -> ExecutionReport {
        let mut report = ExecutionReport {
            total: placements.len(),
            ..Default::default()
        };

        for (n, station) in assignment.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    station = n,
                    placed = report.placed,
                    "Build cancelled between stations"
                );
                report.cancelled = true;
                break;
            }

            if let Err(e) = self.session.move_to(station.position).await {
                tracing::warn!(station = n, position = %station.position, "{}", e);
                report.failed += station.assigned.len();
                report
                    .warnings
                    .push(format!("station {n} at {}: {e}; {} blocks skipped", station.position, station.assigned.len()));
                continue;
            }
            report.stations_visited += 1;

            for &index in &station.assigned {
                let Some(target) = placements.get(index) else {
                    report.failed += 1;
                    report.warnings.push(format!("station {n}: no placement with index {index}"));
                    continue;
                };
                match self.session.place_block(target.pos, &target.block).await {
                    Ok(()) => report.placed += 1,
                    Err(e) => {
                        tracing::debug!(pos = %target.pos, block = %target.block, "{}", e);
                        report.failed += 1;
                        report.warnings.push(format!("{} {}: {e}", target.block, target.pos));
                    }
                }
            }
            tracing::debug!(
                station = n + 1,
                stations = assignment.len(),
                progress = report.progress(),
                "Station done"
            );
        }

        tracing::info!(
            placed = report.placed,
            failed = report.failed,
            stations = report.stations_visited,
            cancelled = report.cancelled,
            "Placement finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::coverage::plan_stations;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSession {
        moves: Mutex<Vec<BlockPos>>,
        placed: Mutex<Vec<(BlockPos, String)>>,
        reject_block: Option<String>,
        cancel_after_first_move: Option<CancellationToken>,
    }

    #[async_trait]
    impl WorldSession for RecordingSession {
        async fn move_to(&self, pos: BlockPos) -> Result<(), ExecutionError> {
            self.moves.lock().unwrap().push(pos);
            if let Some(token) = &self.cancel_after_first_move {
                token.cancel();
            }
            Ok(())
        }

        async fn place_block(&self, pos: BlockPos, block: &str) -> Result<(), ExecutionError> {
            if self.reject_block.as_deref() == Some(block) {
                return Err(ExecutionError::Placement("no permission".into()));
            }
            self.placed.lock().unwrap().push((pos, block.to_string()));
            Ok(())
        }
    }

    fn row(n: i32, block: &str) -> Vec<Placement> {
        (0..n)
            .map(|x| Placement {
                pos: BlockPos::new(x * 3, 0, 0),
                block: block.into(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_execute_places_every_assigned_block() {
        let placements = row(10, "stone");
        let targets: Vec<_> = placements.iter().map(|p| p.pos).collect();
        let plan = plan_stations(&targets, 4.5, 0.5);
        let session = Arc::new(RecordingSession::default());

        let report = StationWalker::new(session.clone()).execute(&placements, &plan).await;
        assert_eq!(report.placed, 10);
        assert_eq!(report.failed, 0);
        assert_eq!(report.stations_visited, plan.len());
        assert_eq!(session.placed.lock().unwrap().len(), 10);
        assert_eq!(report.progress(), 1.0);
    }

    #[tokio::test]
    async fn test_placement_failures_are_tallied_not_fatal() {
        let mut placements = row(3, "stone");
        placements.push(Placement {
            pos: BlockPos::new(1, 0, 0),
            block: "bedrock".into(),
        });
        let targets: Vec<_> = placements.iter().map(|p| p.pos).collect();
        let plan = plan_stations(&targets, 4.5, 0.5);
        let session = Arc::new(RecordingSession {
            reject_block: Some("bedrock".into()),
            ..Default::default()
        });

        let report = StationWalker::new(session).execute(&placements, &plan).await;
        assert_eq!(report.placed, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_checked_between_stations() {
        let placements = row(20, "stone");
        let targets: Vec<_> = placements.iter().map(|p| p.pos).collect();
        let plan = plan_stations(&targets, 4.5, 0.5);
        assert!(plan.len() > 1);

        let token = CancellationToken::new();
        let session = Arc::new(RecordingSession {
            cancel_after_first_move: Some(token.clone()),
            ..Default::default()
        });
        let report = StationWalker::new(session.clone())
            .with_cancel_token(token)
            .execute(&placements, &plan)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.stations_visited, 1);
        assert_eq!(session.moves.lock().unwrap().len(), 1);
        assert_eq!(report.placed, plan.stations[0].assigned.len());
    }
}
