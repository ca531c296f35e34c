//! 请求分析：从自然语言请求推断建筑类型、风格、尺寸提示、参考图与特征
//!
//! `Analyzer` 是同步边界，不做外部调用、不会失败（置信度可能很低）。
//! 可选的模型分析（V1 路径）在 `GenerationPipeline::analyze_with_model` 中。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::blueprint::Size;

/// 尺寸提示（缺省的轴为 None）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionHints {
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub depth: Option<i32>,
}

impl DimensionHints {
    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.depth.is_none()
    }

    /// 转为校验用的请求尺寸；缺省轴为 0（不参与容差检查）
    pub fn to_size(&self) -> Option<Size> {
        if self.is_empty() {
            return None;
        }
        Some(Size::new(
            self.width.unwrap_or(0),
            self.height.unwrap_or(0),
            self.depth.unwrap_or(0),
        ))
    }
}

/// 请求分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub build_type: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub dimensions: DimensionHints,
    #[serde(default)]
    pub image_reference: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

impl Analysis {
    pub fn with_build_type(self, build_type: impl Into<String>) -> Self {
        Self {
            build_type: build_type.into(),
            ..self
        }
    }
}

/// 分析器边界
pub trait Analyzer: Send + Sync {
    fn analyze(&self, request: &str) -> Analysis;
}

/// 关键词 → 建筑类型（按表序优先）
const BUILD_TYPES: &[(&str, &[&str])] = &[
    ("castle", &["castle", "fortress", "citadel", "keep"]),
    ("tower", &["tower", "spire", "lighthouse", "turret", "minaret"]),
    ("bridge", &["bridge", "viaduct"]),
    ("church", &["church", "chapel", "cathedral"]),
    ("temple", &["temple", "shrine", "pagoda"]),
    ("pyramid", &["pyramid", "ziggurat"]),
    ("statue", &["statue", "sculpture", "monument"]),
    ("wall", &["rampart", "palisade", "city wall"]),
    ("barn", &["barn", "stable", "farm"]),
    ("shop", &["shop", "store", "market", "bakery"]),
    ("house", &["house", "home", "cottage", "cabin", "hut", "villa", "mansion"]),
];

const THEMES: &[&str] = &[
    "medieval",
    "modern",
    "rustic",
    "fantasy",
    "japanese",
    "gothic",
    "desert",
    "nordic",
    "steampunk",
    "futuristic",
    "victorian",
];

/// 词形 → 规范特征名
const FEATURES: &[(&str, &str)] = &[
    ("door", "door"),
    ("entrance", "door"),
    ("window", "window"),
    ("roof", "roof"),
    ("staircase", "stairs"),
    ("stairs", "stairs"),
    ("chimney", "chimney"),
    ("dome", "dome"),
    ("fence", "fence"),
    ("garden", "garden"),
    ("pool", "pool"),
    ("fountain", "fountain"),
    ("moat", "moat"),
    ("lantern", "light"),
    ("lights", "light"),
    ("torch", "light"),
];

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".gif"];

/// 不做外部调用的关键词分析器
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Analyzer for HeuristicAnalyzer {
    fn analyze(&self, request: &str) -> Analysis {
        let text = request.to_lowercase();
        let words = tokenize(&text);

        let (build_type, mut confidence) = BUILD_TYPES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| contains_term(&text, &words, k)))
            .map(|(t, _)| (t.to_string(), 0.8))
            .unwrap_or_else(|| ("structure".to_string(), 0.3));

        let theme = THEMES
            .iter()
            .find(|t| words.iter().any(|w| w == *t))
            .map(|t| t.to_string());

        let dimensions = parse_dimensions(&text);
        if !dimensions.is_empty() {
            confidence += 0.1;
        }
        if theme.is_some() {
            confidence += 0.05;
        }

        let mut features: Vec<String> = Vec::new();
        for (word, canonical) in FEATURES {
            let present = words
                .iter()
                .any(|w| w == word || w.strip_suffix('s') == Some(*word));
            if present && *canonical != build_type && !features.iter().any(|f| f == canonical) {
                features.push(canonical.to_string());
            }
        }

        let image_reference = request
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| matches!(c, '"' | '\'' | ',' | '(' | ')' | '<' | '>')))
            .find(|t| {
                let lower = t.to_lowercase();
                IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
            })
            .map(str::to_string);

        let analysis = Analysis {
            build_type,
            confidence: f64::min(confidence, 1.0),
            theme,
            dimensions,
            image_reference,
            features,
        };
        tracing::debug!(
            build_type = %analysis.build_type,
            confidence = analysis.confidence,
            features = analysis.features.len(),
            "Request analyzed"
        );
        analysis
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// 单词按词边界匹配（含复数 s）；多词短语按子串匹配
fn contains_term(text: &str, words: &[String], term: &str) -> bool {
    if term.contains(' ') {
        return text.contains(term);
    }
    words
        .iter()
        .any(|w| w == term || w.strip_suffix('s') == Some(term) || w.strip_suffix("es") == Some(term))
}

fn dims_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*[x×]\s*(\d+)(?:\s*[x×]\s*(\d+))?").ok())
        .as_ref()
}

fn axis_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(-?\d+)\s*(?:blocks?\s+)?(tall|high|wide|deep|long)\b").ok()
    })
    .as_ref()
}

/// 数字提示饱和到 i32 范围，超长数字不会被静默丢弃
fn parse_hint(digits: &str) -> Option<i32> {
    match digits.parse::<i64>() {
        Ok(v) => Some(v.clamp(i32::MIN as i64, i32::MAX as i64) as i32),
        Err(_) if digits.trim_start_matches('-').bytes().all(|b| b.is_ascii_digit()) => {
            Some(if digits.starts_with('-') { i32::MIN } else { i32::MAX })
        }
        Err(_) => None,
    }
}

/// `WxHxD`（两项时为 `WxD`）与 `N blocks tall/wide/deep` 短语
pub fn parse_dimensions(text: &str) -> DimensionHints {
    let mut hints = DimensionHints::default();

    if let Some(caps) = dims_regex().and_then(|re| re.captures(text)) {
        let n = |i: usize| caps.get(i).and_then(|m| parse_hint(m.as_str()));
        match n(3) {
            Some(depth) => {
                hints.width = n(1);
                hints.height = n(2);
                hints.depth = Some(depth);
            }
            None => {
                hints.width = n(1);
                hints.depth = n(2);
            }
        }
    }

    if let Some(re) = axis_regex() {
        for caps in re.captures_iter(text) {
            let Some(value) = caps.get(1).and_then(|m| parse_hint(m.as_str())) else {
                continue;
            };
            match caps.get(2).map(|m| m.as_str()) {
                Some("tall" | "high") => hints.height = Some(value),
                Some("wide") => hints.width = Some(value),
                Some("deep" | "long") => hints.depth = Some(value),
                _ => {}
            }
        }
    }
    hints
}
