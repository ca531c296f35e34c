//! 蓝图：操作词表、栅格化、建造顺序、安全检查与校验

pub mod order;
pub mod raster;
pub mod safety;
pub mod schema;
pub mod types;
pub mod validate;

pub use order::BuildOrderOptimizer;
pub use raster::{estimate_block_count, rasterize, Placement};
pub use safety::{check_dimensions, check_request_bounds};
pub use schema::{blueprint_schema_json, vocabulary_prompt};
pub use types::{BlockPos, Blueprint, Facing, Operation, Size};
pub use validate::{BlueprintValidator, Issue, IssueCode, ValidationOutcome, ValidationTarget};
