//! 放置：站位覆盖规划与按站位执行

pub mod coverage;
pub mod execution;

pub use coverage::{plan_stations, CoverageAssignment, Station};
pub use execution::{ExecutionError, ExecutionReport, StationWalker, WorldSession};
