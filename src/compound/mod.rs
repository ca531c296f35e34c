//! 复合建造：检测多结构请求，规划布局，逐组件运行生成管线并合并
//!
//! 单个组件失败只跳过该组件；调用预算耗尽时停止后续组件。合并时每个组件的操作前加
//! cursor_reset，偏移非零时再加 offset 标记。

use std::sync::OnceLock;

use regex::Regex;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::blueprint::{BlockPos, Blueprint, Operation, Size};
use crate::config::CompoundSection;
use crate::core::{PipelineError, PipelineStage};
use crate::pipeline::{Analyzer, CallBudget, DimensionHints, GenerationMode, GenerationPipeline};

/// 参与「三种以上不同结构」判定的结构名词
const STRUCTURE_NOUNS: &[&str] = &[
    "house", "tower", "castle", "bridge", "church", "temple", "barn", "shop", "farm", "hut", "cottage",
    "cabin", "windmill", "lighthouse", "statue", "market", "tavern", "inn", "stable", "mill", "villa",
    "library", "school",
];

const NUMBER_WORDS: &[(&str, u32)] = &[
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("twelve", 12),
    ("dozen", 12),
];

fn count_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d+|three|four|five|six|seven|eight|nine|ten|twelve|dozen)\s+(?:[a-z]+\s+)?([a-z]+s)\b").ok()
    })
    .as_ref()
}

fn words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

fn singular(word: &str) -> &str {
    word.strip_suffix("es")
        .filter(|s| STRUCTURE_NOUNS.contains(s))
        .or_else(|| word.strip_suffix('s'))
        .unwrap_or(word)
}

/// 判定是否为复合建造请求
pub fn is_compound_request(request: &str, config: &CompoundSection) -> bool {
    let text = request.to_lowercase();
    let tokens = words(&text);

    if config
        .trigger_keywords
        .iter()
        .any(|k| tokens.iter().any(|w| w == k || singular(w) == k))
    {
        return true;
    }

    if let Some(re) = count_regex() {
        for caps in re.captures_iter(&text) {
            let (Some(count), Some(noun)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let n = count.as_str().parse::<u32>().ok().or_else(|| {
                NUMBER_WORDS
                    .iter()
                    .find(|(w, _)| *w == count.as_str())
                    .map(|(_, n)| *n)
            });
            if n.is_some_and(|n| n > 2) && STRUCTURE_NOUNS.contains(&singular(noun.as_str())) {
                return true;
            }
        }
    }

    let mut distinct: Vec<&str> = Vec::new();
    for w in &tokens {
        let s = singular(w);
        if STRUCTURE_NOUNS.contains(&s) && !distinct.contains(&s) {
            distinct.push(s);
        }
    }
    distinct.len() >= 3
}

/// 布局中的单个组件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LayoutComponent {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub build_type: String,
    #[serde(default)]
    pub offset: BlockPos,
    pub size: Size,
}

impl LayoutComponent {
    /// 地面投影是否重叠
    fn overlaps(&self, other: &LayoutComponent) -> bool {
        let span = |start: i32, len: i32| (start, start.saturating_add(len.max(1)));
        let (ax0, ax1) = span(self.offset.x, self.size.width);
        let (az0, az1) = span(self.offset.z, self.size.depth);
        let (bx0, bx1) = span(other.offset.x, other.size.width);
        let (bz0, bz1) = span(other.offset.z, other.size.depth);
        ax0 < bx1 && bx0 < ax1 && az0 < bz1 && bz0 < az1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LayoutPlan {
    pub components: Vec<LayoutComponent>,
}

pub fn layout_schema_json() -> String {
    let schema = schema_for!(LayoutPlan);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// 组件失败记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentFailure {
    pub name: String,
    pub reason: String,
}

/// 复合建造报告：哪些组件成功、哪些失败、布局中丢弃了多少
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompoundReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<ComponentFailure>,
    pub dropped: usize,
}

impl CompoundReport {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// 复合建造产出；全部组件失败时 blueprint 为 None
#[derive(Debug, Clone)]
pub struct CompoundOutput {
    pub blueprint: Option<Blueprint>,
    pub report: CompoundReport,
}

pub struct CompoundDecomposer<'a> {
    pipeline: &'a GenerationPipeline,
    analyzer: &'a dyn Analyzer,
}

impl<'a> CompoundDecomposer<'a> {
    pub fn new(pipeline: &'a GenerationPipeline, analyzer: &'a dyn Analyzer) -> Self {
        Self { pipeline, analyzer }
    }

    pub async fn build(&self, request: &str, budget: &mut CallBudget) -> Result<CompoundOutput, PipelineError> {
        let config = &self.pipeline.config().compound;
        let mut report = CompoundReport::default();

        let mut components = self.plan_layout(request, budget).await?;
        if components.len() > config.max_components {
            let dropped = components.len() - config.max_components;
            tracing::warn!(
                kept = config.max_components,
                dropped,
                "Compound layout truncated to max components"
            );
            components.truncate(config.max_components);
            report.dropped += dropped;
        }

        let mut kept: Vec<LayoutComponent> = Vec::new();
        for component in components {
            if let Some(other) = kept.iter().find(|k| k.overlaps(&component)) {
                tracing::warn!(
                    component = %component.name,
                    overlaps = %other.name,
                    "Dropping overlapping compound component"
                );
                report.dropped += 1;
                continue;
            }
            kept.push(component);
        }

        let mut parts: Vec<(LayoutComponent, Blueprint)> = Vec::new();
        let mut pending = kept.into_iter();
        while let Some(component) = pending.next() {
            if self.pipeline.cancel_token().is_cancelled() {
                return Err(PipelineError::cancelled(PipelineStage::Layout));
            }

            let analysis = {
                let base = self.analyzer.analyze(&component.description);
                let build_type = if component.build_type.is_empty() {
                    base.build_type.clone()
                } else {
                    component.build_type.to_lowercase()
                };
                let mut analysis = base.with_build_type(build_type);
                analysis.dimensions = DimensionHints {
                    width: Some(component.size.width),
                    height: Some(component.size.height),
                    depth: Some(component.size.depth),
                };
                analysis
            };
            let component_request = format!(
                "{} (one part of: {request}): {}",
                component.name, component.description
            );

            match self
                .pipeline
                .run(&component_request, &analysis, GenerationMode::Full, budget)
                .await
            {
                Ok(output) => {
                    tracing::info!(component = %component.name, "Compound component generated");
                    report.succeeded.push(component.name.clone());
                    parts.push((component, output.blueprint));
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) if e.is_budget_exhausted() => {
                    tracing::warn!(
                        component = %component.name,
                        used = budget.used(),
                        "Compound call budget exhausted, skipping remaining components"
                    );
                    report.failed.push(ComponentFailure {
                        name: component.name,
                        reason: e.to_string(),
                    });
                    for rest in pending.by_ref() {
                        report.failed.push(ComponentFailure {
                            name: rest.name,
                            reason: "call budget exhausted".to_string(),
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(component = %component.name, "Skipping failed compound component: {}", e);
                    report.failed.push(ComponentFailure {
                        name: component.name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            dropped = report.dropped,
            "Compound build finished"
        );
        let blueprint = if parts.is_empty() { None } else { Some(merge(&parts)) };
        Ok(CompoundOutput { blueprint, report })
    }

    async fn plan_layout(&self, request: &str, budget: &mut CallBudget) -> Result<Vec<LayoutComponent>, PipelineError> {
        budget
            .consume()
            .map_err(|e| PipelineError::generation(PipelineStage::Layout, e))?;
        let config = &self.pipeline.config().compound;
        let prompt = crate::pipeline::prompts::layout_prompt(request, config.max_components);
        let schema = layout_schema_json();
        let layout = self
            .pipeline
            .client()
            .invoke_with(&prompt, Some(&schema), |value| {
                let layout: LayoutPlan = serde_json::from_value(value).map_err(|e| e.to_string())?;
                if layout.components.is_empty() {
                    return Err("layout has no components".to_string());
                }
                Ok(layout)
            })
            .await
            .map_err(|e| PipelineError::generation(PipelineStage::Layout, e))?;
        Ok(layout.components)
    }
}

/// 合并组件蓝图：调色板取并集，操作按组件拼接并加定位标记
pub fn merge(parts: &[(LayoutComponent, Blueprint)]) -> Blueprint {
    let mut palette: Vec<String> = Vec::new();
    let mut operations: Vec<Operation> = Vec::new();
    let mut extent = Size::new(1, 1, 1);

    for (component, blueprint) in parts {
        for block in &blueprint.palette {
            if !palette.contains(block) {
                palette.push(block.clone());
            }
        }
        operations.push(Operation::CursorReset);
        let offset = component.offset;
        if !offset.is_origin() {
            operations.push(Operation::Offset {
                dx: offset.x,
                dy: offset.y,
                dz: offset.z,
            });
        }
        operations.extend(blueprint.operations.iter().cloned());

        extent.width = extent.width.max(offset.x.saturating_add(blueprint.size.width));
        extent.height = extent.height.max(offset.y.saturating_add(blueprint.size.height));
        extent.depth = extent.depth.max(offset.z.saturating_add(blueprint.size.depth));
    }

    Blueprint {
        size: extent,
        palette,
        operations,
        build_type: "compound".to_string(),
        generation_method: GenerationMode::Full.method_tag().to_string(),
    }
}
