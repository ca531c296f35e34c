//! 设计方案：尺寸、风格、材料角色与特征列表（蓝图生成的上一步）

use std::collections::BTreeMap;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::blueprint::validate::normalize_block;
use crate::blueprint::{check_dimensions, Issue, IssueCode, Size};
use crate::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DesignPlan {
    pub width: i32,
    pub height: i32,
    pub depth: i32,
    /// 风格标签，如 "rustic cottage"
    #[serde(default)]
    pub style: String,
    /// 材料角色 → 方块 id，如 wall → stone_bricks
    #[serde(default)]
    pub materials: BTreeMap<String, String>,
    /// 特征，如 door、roof、chimney
    #[serde(default)]
    pub features: Vec<String>,
}

impl DesignPlan {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height, self.depth)
    }

    /// 生成后立即做的结构检查：尺寸合法、不超硬上限、材料在白名单内
    pub fn check(&self, config: &AppConfig) -> Result<(), Issue> {
        check_dimensions(self.width, self.height, self.depth)?;

        let max = config.generation.max_dimension;
        if self.width > max || self.depth > max {
            return Err(Issue::new(
                IssueCode::DimensionTooLarge,
                format!("plan {}x{} exceeds max dimension {max}", self.width, self.depth),
            ));
        }
        let world_height = config.world.max_y - config.world.min_y;
        if self.height > world_height {
            return Err(Issue::new(
                IssueCode::HeightExceeded,
                format!("plan height {} exceeds world height {world_height}", self.height),
            ));
        }
        for (role, block) in &self.materials {
            let id = normalize_block(block);
            if !config.generation.allowed_blocks.iter().any(|b| b == id) {
                return Err(Issue::new(
                    IssueCode::UnknownBlock,
                    format!("material '{role}' uses unknown block '{id}'"),
                ));
            }
        }
        Ok(())
    }

    /// 拼入蓝图提示的摘要
    pub fn to_prompt(&self) -> String {
        let materials: Vec<String> = self
            .materials
            .iter()
            .map(|(role, block)| format!("{role}={block}"))
            .collect();
        format!(
            "Design plan: {}x{}x{} (width x height x depth), style '{}', materials [{}], features [{}].",
            self.width,
            self.height,
            self.depth,
            self.style,
            materials.join(", "),
            self.features.join(", ")
        )
    }
}

pub fn design_plan_schema_json() -> String {
    let schema = schema_for!(DesignPlan);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
