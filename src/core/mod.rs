//! 核心编排层：错误与恢复策略、建造上下文、建造规划

pub mod builder;
pub mod context;
pub mod error;
pub mod recovery;

pub use builder::{plan_build, BuildPlan};
pub use context::BuildContext;
pub use error::{PipelineError, PipelineErrorKind, PipelineStage, PlanError, RoutingError, RoutingErrorKind, RoutingStage};
pub use recovery::{FailurePoint, FailurePolicy, Pathway, RecoveryEngine};
