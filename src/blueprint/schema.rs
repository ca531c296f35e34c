//! 蓝图 JSON Schema 生成（schemars）与操作词表提示
//!
//! 用于将合法蓝图的 JSON 结构注入 system prompt，减少模型输出格式错误。

use schemars::schema_for;

use crate::blueprint::Blueprint;
use crate::config::AppConfig;

/// 蓝图的 JSON Schema 字符串，可拼入 system prompt
pub fn blueprint_schema_json() -> String {
    let schema = schema_for!(Blueprint);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// 封闭操作词表，每行一种：`type` 字段值与参数
const VOCABULARY: &[(&str, &str)] = &[
    ("clear", "from, to: set the region to air"),
    ("fill", "from, to, block: solid box (foundations)"),
    ("floor", "from, to, block: one-layer floor"),
    ("wall", "from, to, block: straight wall, one of x/z thin"),
    ("hollow_box", "from, to, block: six faces of a box"),
    ("set", "pos, block: single block"),
    ("line", "from, to, block: straight line"),
    ("window_strip", "from, to, block, spacing: every `spacing`-th block on a line"),
    ("stairs", "from, to, block, facing: staircase along a line"),
    ("door", "pos, block, facing: two blocks tall"),
    ("spiral_staircase", "base, radius, height, block"),
    ("cylinder", "base, radius, height, block, hollow"),
    ("sphere", "center, radius, block, hollow"),
    ("dome", "center, radius, block: upper half shell"),
    ("roof_gable", "from, to, block: ridge along the longer axis"),
    ("roof_hip", "from, to, block: four slopes"),
    ("roof_flat", "from, to, block"),
    ("bulk_fill", "from, to, block, fallback: fast region fill; fallback is a stepwise op"),
    ("bulk_replace", "from, to, source_block, block, fallback"),
    ("bulk_walls", "from, to, block, fallback"),
];

/// 生成提示中的操作词表、方块白名单与尺寸上限
pub fn vocabulary_prompt(config: &AppConfig) -> String {
    let mut out = String::from("Allowed operation types (field \"type\"):\n");
    for (kind, params) in VOCABULARY {
        out.push_str(&format!("- {kind}: {params}\n"));
    }
    out.push_str(
        "Coordinates are [x, y, z] arrays relative to the build origin; y is up.\n\
         Every bulk_* operation MUST include a \"fallback\" using only non-bulk operations.\n",
    );
    out.push_str(&format!(
        "Allowed blocks: {}\n",
        config.generation.allowed_blocks.join(", ")
    ));
    out.push_str(&format!(
        "Hard limits: width and depth <= {}, height <= {}, at most {} operations.\n",
        config.generation.max_dimension,
        config.world.max_y - config.world.min_y,
        config.generation.max_operations
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_operation_tags() {
        let schema = blueprint_schema_json();
        assert!(schema.contains("hollow_box"));
        assert!(schema.contains("fallback"));
    }

    #[test]
    fn test_vocabulary_prompt_lists_limits() {
        let prompt = vocabulary_prompt(&AppConfig::default());
        assert!(prompt.contains("bulk_walls"));
        assert!(prompt.contains("oak_planks"));
        assert!(prompt.contains("<= 128"));
    }
}
