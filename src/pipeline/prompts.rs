//! 生成提示词
//!
//! system 部分放角色与硬约束（词表、方块白名单、尺寸上限），user 部分放请求与上下文。

use serde_json::Value;

use crate::blueprint::{vocabulary_prompt, Issue, ValidationOutcome};
use crate::config::AppConfig;
use crate::llm::GenerationPrompt;
use crate::pipeline::analysis::Analysis;
use crate::pipeline::plan::DesignPlan;
use crate::pipeline::reference::ReferenceDescription;

const ARCHITECT_ROLE: &str = "You are a block-world architect. You design structures that can be built block by block, \
bottom-up, inside a voxel world.";

fn analysis_context(analysis: &Analysis) -> String {
    let mut lines = vec![format!(
        "Build type: {} (confidence {:.2})",
        analysis.build_type, analysis.confidence
    )];
    if let Some(theme) = &analysis.theme {
        lines.push(format!("Theme: {theme}"));
    }
    let d = analysis.dimensions;
    if !d.is_empty() {
        let fmt = |v: Option<i32>| v.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string());
        lines.push(format!(
            "Requested size (width x height x depth): {} x {} x {}",
            fmt(d.width),
            fmt(d.height),
            fmt(d.depth)
        ));
    }
    if !analysis.features.is_empty() {
        lines.push(format!("Required features: {}", analysis.features.join(", ")));
    }
    lines.join("\n")
}

/// V1 的轻量模型分析
pub fn analysis_prompt(request: &str) -> GenerationPrompt {
    GenerationPrompt::new(
        "Classify a structure request for a block-world builder. Return build_type (one lowercase word such as \
         house, tower, castle, bridge, wall, statue), confidence (0..1), theme (or null), dimensions \
         {width, height, depth} (null when not stated), image_reference (or null) and features (list of words).",
        format!("Request: {request}"),
    )
}

pub fn plan_prompt(
    request: &str,
    analysis: &Analysis,
    reference: Option<&ReferenceDescription>,
    config: &AppConfig,
) -> GenerationPrompt {
    let mut user = format!("Request: {request}\n{}", analysis_context(analysis));
    if let Some(reference) = reference {
        user.push('\n');
        user.push_str(&reference.to_prompt());
    }
    user.push_str("\nProduce a design plan: overall size, style label, material roles mapped to allowed blocks, and the feature list.");
    GenerationPrompt::new(format!("{ARCHITECT_ROLE}\n\n{}", vocabulary_prompt(config)), user)
}

pub fn blueprint_prompt(
    request: &str,
    analysis: &Analysis,
    plan: Option<&DesignPlan>,
    reference: Option<&ReferenceDescription>,
    config: &AppConfig,
) -> GenerationPrompt {
    let mut user = format!("Request: {request}\n{}", analysis_context(analysis));
    if let Some(plan) = plan {
        user.push('\n');
        user.push_str(&plan.to_prompt());
    }
    if let Some(reference) = reference {
        user.push('\n');
        user.push_str(&reference.to_prompt());
    }
    user.push_str(
        "\nProduce the full blueprint: size, palette, ordered operations (foundation first, then walls, roof, \
         and details), build_type.",
    );
    GenerationPrompt::new(format!("{ARCHITECT_ROLE}\n\n{}", vocabulary_prompt(config)), user)
}

/// 修复提示：当前蓝图 + 全部历史错误 + 当前分数与扣分明细
pub fn repair_prompt(
    request: &str,
    blueprint: &Value,
    history: &[Vec<Issue>],
    current: &ValidationOutcome,
    config: &AppConfig,
) -> GenerationPrompt {
    let mut user = format!("Request: {request}\n\nCurrent blueprint:\n{blueprint}\n\n");
    user.push_str("Validation errors from every attempt so far (oldest first):\n");
    for (round, errors) in history.iter().enumerate() {
        for issue in errors {
            user.push_str(&format!("- [attempt {}] {issue}\n", round + 1));
        }
    }
    if !current.warnings.is_empty() {
        user.push_str("Current warnings:\n");
        for warning in &current.warnings {
            user.push_str(&format!("- {warning}\n"));
        }
    }
    user.push_str(&format!("\nSemantic quality:\n{}\n", current.penalty_breakdown()));
    user.push_str("\nReturn a corrected full blueprint that fixes every error without reintroducing earlier ones.");
    GenerationPrompt::new(format!("{ARCHITECT_ROLE}\n\n{}", vocabulary_prompt(config)), user)
}

/// 复合建造的布局规划
pub fn layout_prompt(request: &str, max_components: usize) -> GenerationPrompt {
    GenerationPrompt::new(
        format!(
            "You plan the layout of a multi-structure build in a block world. Split the request into at most \
             {max_components} components. Each component has a name, a one-sentence description, a build_type, an \
             offset [x, y, z] relative to the shared origin (y usually 0), and a size {{width, height, depth}}. \
             Components must not overlap on the ground plane."
        ),
        format!("Request: {request}"),
    )
}
