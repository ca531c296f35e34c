//! 蓝图数据类型：坐标、尺寸、操作（封闭枚举）与蓝图本体
//!
//! 操作以 `"type"` 字段做 serde 标签（snake_case）。需要批量区域编辑能力的 bulk_* 操作
//! 必须携带 `fallback`，用逐块可执行的操作表达同一结果。

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 方块坐标，序列化为 `[x, y, z]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "[i32; 3]", into = "[i32; 3]")]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// 分量饱和相加，模型给出的极端坐标不会溢出
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.z.saturating_add(dz),
        )
    }

    pub fn add(self, other: BlockPos) -> Self {
        self.offset(other.x, other.y, other.z)
    }

    pub fn above(self) -> Self {
        self.offset(0, 1, 0)
    }

    pub fn distance(self, other: BlockPos) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        let dz = self.z as f64 - other.z as f64;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn is_origin(self) -> bool {
        self == Self::default()
    }
}

impl From<[i32; 3]> for BlockPos {
    fn from([x, y, z]: [i32; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<BlockPos> for [i32; 3] {
    fn from(p: BlockPos) -> Self {
        [p.x, p.y, p.z]
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl JsonSchema for BlockPos {
    fn schema_name() -> String {
        "BlockPos".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <[i32; 3]>::json_schema(gen)
    }
}

/// 蓝图包围尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Size {
    pub width: i32,
    pub height: i32,
    pub depth: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32, depth: i32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn footprint(&self) -> i64 {
        self.width as i64 * self.depth as i64
    }
}

/// 朝向（门、楼梯）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    #[default]
    North,
    South,
    East,
    West,
}

fn default_spacing() -> u32 {
    2
}

/// 建造操作（封闭集合）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// 清场：区域置为空气
    Clear { from: BlockPos, to: BlockPos },
    /// 实心填充（地基等）
    Fill {
        from: BlockPos,
        to: BlockPos,
        block: String,
    },
    Floor {
        from: BlockPos,
        to: BlockPos,
        block: String,
    },
    Wall {
        from: BlockPos,
        to: BlockPos,
        block: String,
    },
    /// 空心盒：六个面
    HollowBox {
        from: BlockPos,
        to: BlockPos,
        block: String,
    },
    Set { pos: BlockPos, block: String },
    Line {
        from: BlockPos,
        to: BlockPos,
        block: String,
    },
    /// 沿线段每隔 spacing 格放一块（窗带）
    WindowStrip {
        from: BlockPos,
        to: BlockPos,
        block: String,
        #[serde(default = "default_spacing")]
        spacing: u32,
    },
    Stairs {
        from: BlockPos,
        to: BlockPos,
        block: String,
        #[serde(default)]
        facing: Facing,
    },
    /// 门占两格高
    Door {
        pos: BlockPos,
        block: String,
        #[serde(default)]
        facing: Facing,
    },
    SpiralStaircase {
        base: BlockPos,
        radius: i32,
        height: i32,
        block: String,
    },
    Cylinder {
        base: BlockPos,
        radius: i32,
        height: i32,
        block: String,
        #[serde(default)]
        hollow: bool,
    },
    Sphere {
        center: BlockPos,
        radius: i32,
        block: String,
        #[serde(default)]
        hollow: bool,
    },
    /// 上半球壳
    Dome {
        center: BlockPos,
        radius: i32,
        block: String,
    },
    RoofGable {
        from: BlockPos,
        to: BlockPos,
        block: String,
    },
    RoofHip {
        from: BlockPos,
        to: BlockPos,
        block: String,
    },
    RoofFlat {
        from: BlockPos,
        to: BlockPos,
        block: String,
    },
    BulkFill {
        from: BlockPos,
        to: BlockPos,
        block: String,
        fallback: Box<Operation>,
    },
    BulkReplace {
        from: BlockPos,
        to: BlockPos,
        source_block: String,
        block: String,
        fallback: Box<Operation>,
    },
    BulkWalls {
        from: BlockPos,
        to: BlockPos,
        block: String,
        fallback: Box<Operation>,
    },
    /// 整体结构引用，由放置端按名称展开
    Schematic { name: String, origin: BlockPos },
    /// 复合合并标记：游标回到原点
    CursorReset,
    /// 复合合并标记：后续操作整体平移
    Offset { dx: i32, dy: i32, dz: i32 },
}

impl Operation {
    /// 与序列化标签一致的种类名
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Clear { .. } => "clear",
            Self::Fill { .. } => "fill",
            Self::Floor { .. } => "floor",
            Self::Wall { .. } => "wall",
            Self::HollowBox { .. } => "hollow_box",
            Self::Set { .. } => "set",
            Self::Line { .. } => "line",
            Self::WindowStrip { .. } => "window_strip",
            Self::Stairs { .. } => "stairs",
            Self::Door { .. } => "door",
            Self::SpiralStaircase { .. } => "spiral_staircase",
            Self::Cylinder { .. } => "cylinder",
            Self::Sphere { .. } => "sphere",
            Self::Dome { .. } => "dome",
            Self::RoofGable { .. } => "roof_gable",
            Self::RoofHip { .. } => "roof_hip",
            Self::RoofFlat { .. } => "roof_flat",
            Self::BulkFill { .. } => "bulk_fill",
            Self::BulkReplace { .. } => "bulk_replace",
            Self::BulkWalls { .. } => "bulk_walls",
            Self::Schematic { .. } => "schematic",
            Self::CursorReset => "cursor_reset",
            Self::Offset { .. } => "offset",
        }
    }

    /// 需要批量区域编辑能力
    pub fn is_bulk(&self) -> bool {
        self.fallback().is_some()
    }

    /// 合并标记（不产生方块，作为排序分段边界）
    pub fn is_marker(&self) -> bool {
        matches!(self, Self::CursorReset | Self::Offset { .. })
    }

    pub fn is_roof(&self) -> bool {
        matches!(
            self,
            Self::RoofGable { .. } | Self::RoofHip { .. } | Self::RoofFlat { .. } | Self::Dome { .. }
        )
    }

    pub fn is_wall(&self) -> bool {
        matches!(
            self,
            Self::Wall { .. } | Self::HollowBox { .. } | Self::BulkWalls { .. }
        ) || matches!(self, Self::Cylinder { hollow: true, .. })
    }

    /// bulk 操作的逐块回退
    pub fn fallback(&self) -> Option<&Operation> {
        match self {
            Self::BulkFill { fallback, .. }
            | Self::BulkReplace { fallback, .. }
            | Self::BulkWalls { fallback, .. } => Some(fallback),
            _ => None,
        }
    }

    /// 引用的方块 id
    pub fn blocks(&self) -> Vec<&str> {
        match self {
            Self::Clear { .. } | Self::Schematic { .. } | Self::CursorReset | Self::Offset { .. } => {
                Vec::new()
            }
            Self::BulkReplace {
                source_block,
                block,
                ..
            } => vec![source_block.as_str(), block.as_str()],
            Self::Fill { block, .. }
            | Self::Floor { block, .. }
            | Self::Wall { block, .. }
            | Self::HollowBox { block, .. }
            | Self::Set { block, .. }
            | Self::Line { block, .. }
            | Self::WindowStrip { block, .. }
            | Self::Stairs { block, .. }
            | Self::Door { block, .. }
            | Self::SpiralStaircase { block, .. }
            | Self::Cylinder { block, .. }
            | Self::Sphere { block, .. }
            | Self::Dome { block, .. }
            | Self::RoofGable { block, .. }
            | Self::RoofHip { block, .. }
            | Self::RoofFlat { block, .. }
            | Self::BulkFill { block, .. }
            | Self::BulkWalls { block, .. } => vec![block.as_str()],
        }
    }

    /// 几何参数中出现的坐标点（球体 / 圆柱按包围盒两角给出）
    pub fn anchor_points(&self) -> Vec<BlockPos> {
        match self {
            Self::Clear { from, to }
            | Self::Fill { from, to, .. }
            | Self::Floor { from, to, .. }
            | Self::Wall { from, to, .. }
            | Self::HollowBox { from, to, .. }
            | Self::Line { from, to, .. }
            | Self::WindowStrip { from, to, .. }
            | Self::Stairs { from, to, .. }
            | Self::RoofGable { from, to, .. }
            | Self::RoofHip { from, to, .. }
            | Self::RoofFlat { from, to, .. }
            | Self::BulkFill { from, to, .. }
            | Self::BulkReplace { from, to, .. }
            | Self::BulkWalls { from, to, .. } => vec![*from, *to],
            Self::Set { pos, .. } => vec![*pos],
            Self::Door { pos, .. } => vec![*pos, pos.above()],
            Self::SpiralStaircase {
                base,
                radius,
                height,
                ..
            }
            | Self::Cylinder {
                base,
                radius,
                height,
                ..
            } => {
                let r = radius.saturating_abs();
                vec![
                    base.offset(-r, 0, -r),
                    base.offset(r, height.saturating_sub(1).max(0), r),
                ]
            }
            Self::Sphere { center, radius, .. } => {
                let r = radius.saturating_abs();
                vec![center.offset(-r, -r, -r), center.offset(r, r, r)]
            }
            Self::Dome { center, radius, .. } => {
                let r = radius.saturating_abs();
                vec![center.offset(-r, 0, -r), center.offset(r, r, r)]
            }
            Self::Schematic { origin, .. } => vec![*origin],
            Self::CursorReset | Self::Offset { .. } => Vec::new(),
        }
    }

    /// 几何中最低的 Y；无几何时为 None
    pub fn min_y(&self) -> Option<i32> {
        self.anchor_points().iter().map(|p| p.y).min()
    }
}

/// 蓝图：尺寸、调色板、有序操作列表及来源标签
///
/// 各阶段返回新的 Blueprint，而不是原地修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Blueprint {
    pub size: Size,
    #[serde(default)]
    pub palette: Vec<String>,
    #[serde(alias = "steps")]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub build_type: String,
    #[serde(default)]
    pub generation_method: String,
}

impl Blueprint {
    pub fn new(size: Size, operations: Vec<Operation>) -> Self {
        let mut palette: Vec<String> = Vec::new();
        for block in operations.iter().flat_map(|op| op.blocks()) {
            if !palette.iter().any(|b| b == block) {
                palette.push(block.to_string());
            }
        }
        Self {
            size,
            palette,
            operations,
            build_type: String::new(),
            generation_method: String::new(),
        }
    }

    pub fn with_operations(self, operations: Vec<Operation>) -> Self {
        Self { operations, ..self }
    }

    pub fn with_build_type(self, build_type: impl Into<String>) -> Self {
        Self {
            build_type: build_type.into(),
            ..self
        }
    }

    pub fn with_generation_method(self, method: impl Into<String>) -> Self {
        Self {
            generation_method: method.into(),
            ..self
        }
    }

    /// 所有操作引用的方块（去重，保持首次出现顺序）
    pub fn referenced_blocks(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for op in &self.operations {
            for block in op.blocks() {
                if !seen.contains(&block) {
                    seen.push(block);
                }
            }
            if let Some(fallback) = op.fallback() {
                for block in fallback.blocks() {
                    if !seen.contains(&block) {
                        seen.push(block);
                    }
                }
            }
        }
        seen
    }
}
