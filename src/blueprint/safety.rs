//! 安全预检：尺寸合法性与世界高度边界
//!
//! 这些检查不依赖模型调用，路由在任何生成调用之前执行 `check_request_bounds`。

use crate::blueprint::validate::{Issue, IssueCode};
use crate::blueprint::BlockPos;
use crate::config::WorldSection;

/// 依次检查宽、高、深；第一个不合法的轴决定结果
pub fn check_dimensions(width: i32, height: i32, depth: i32) -> Result<(), Issue> {
    for (axis, value) in [("width", width), ("height", height), ("depth", depth)] {
        if value == 0 {
            return Err(Issue::new(
                IssueCode::ZeroDimension,
                format!("{axis} must be positive, got 0"),
            ));
        }
        if value < 0 {
            return Err(Issue::new(
                IssueCode::NegativeDimension,
                format!("{axis} must be positive, got {value}"),
            ));
        }
    }
    Ok(())
}

/// 请求级高度检查：高度提示、起点与包围角都必须落在世界高度范围内
pub fn check_request_bounds(
    height: Option<i32>,
    origin: Option<BlockPos>,
    corner: Option<BlockPos>,
    world: &WorldSection,
) -> Result<(), Issue> {
    let span = world.max_y - world.min_y;
    if let Some(h) = height {
        if h > world.max_y || h > span {
            return Err(Issue::new(
                IssueCode::HeightExceeded,
                format!("requested height {h} exceeds world max height {}", world.max_y),
            ));
        }
    }

    for (label, pos) in [("origin", origin), ("corner", corner)] {
        let Some(pos) = pos else { continue };
        if pos.y < world.min_y || pos.y > world.max_y {
            return Err(Issue::new(
                IssueCode::HeightExceeded,
                format!(
                    "{label} y={} is outside world bounds [{}, {}]",
                    pos.y, world.min_y, world.max_y
                ),
            ));
        }
    }

    if let (Some(h), Some(origin)) = (height, origin) {
        let top = origin.y as i64 + h as i64 - 1;
        if top > world.max_y as i64 {
            return Err(Issue::new(
                IssueCode::HeightExceeded,
                format!(
                    "structure top y={top} exceeds world max height {} (origin y={}, height {h})",
                    world.max_y, origin.y
                ),
            ));
        }
    }
    Ok(())
}
