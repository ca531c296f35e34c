//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MASON__*` 覆盖（双下划线表示嵌套，如 `MASON__GENERATION__MAX_ATTEMPTS=5`）。
//! 启动时读取一次，之后只读，经 `BuildContext` 以 `Arc<AppConfig>` 共享。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub generation: GenerationSection,
    pub compound: CompoundSection,
    pub routing: RoutingSection,
    pub placement: PlacementSection,
    pub world: WorldSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

impl AppSection {
    /// 日志中使用的实例名，未配置时为 "mason"
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("mason")
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 采样温度，未设置时用端点默认值
    pub temperature: Option<f32>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

/// [generation] 段：重试、修复轮数与蓝图硬限制
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSection {
    /// 单次逻辑调用的最大尝试次数（含首次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 单次尝试超时（秒），超时按尝试计，不按逻辑调用计
    #[serde(default = "default_request_timeout")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_max_repair_attempts")]
    pub max_repair_attempts: u32,
    #[serde(default = "default_max_operations")]
    pub max_operations: usize,
    /// 估算方块数超出时只告警
    #[serde(default = "default_max_estimated_blocks")]
    pub max_estimated_blocks: usize,
    /// 宽 / 深的硬上限
    #[serde(default = "default_max_dimension")]
    pub max_dimension: i32,
    /// 与请求尺寸的容差（比例）
    #[serde(default = "default_dimension_tolerance")]
    pub dimension_tolerance: f64,
    /// 各建筑类型的最小占地面积（宽×深）；未列出的类型使用 "default"
    #[serde(default = "default_min_footprints")]
    pub min_footprints: HashMap<String, i64>,
    #[serde(default = "default_allowed_blocks")]
    pub allowed_blocks: Vec<String>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    8_000
}

fn default_max_repair_attempts() -> u32 {
    3
}

fn default_max_operations() -> usize {
    400
}

fn default_max_estimated_blocks() -> usize {
    250_000
}

fn default_max_dimension() -> i32 {
    128
}

fn default_dimension_tolerance() -> f64 {
    0.2
}

fn default_min_footprints() -> HashMap<String, i64> {
    [
        ("default", 16),
        ("house", 25),
        ("tower", 9),
        ("castle", 100),
        ("bridge", 6),
        ("wall", 4),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn default_allowed_blocks() -> Vec<String> {
    [
        "stone",
        "cobblestone",
        "stone_bricks",
        "mossy_stone_bricks",
        "bricks",
        "sandstone",
        "smooth_stone",
        "deepslate_bricks",
        "oak_planks",
        "spruce_planks",
        "birch_planks",
        "dark_oak_planks",
        "oak_log",
        "spruce_log",
        "stripped_oak_log",
        "glass",
        "glass_pane",
        "white_concrete",
        "gray_concrete",
        "black_concrete",
        "white_wool",
        "red_wool",
        "terracotta",
        "quartz_block",
        "oak_stairs",
        "spruce_stairs",
        "stone_brick_stairs",
        "cobblestone_stairs",
        "oak_slab",
        "stone_slab",
        "oak_door",
        "spruce_door",
        "iron_door",
        "oak_fence",
        "cobblestone_wall",
        "lantern",
        "torch",
        "glowstone",
        "water",
        "dirt",
        "grass_block",
        "gravel",
        "air",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_request_timeout(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_repair_attempts: default_max_repair_attempts(),
            max_operations: default_max_operations(),
            max_estimated_blocks: default_max_estimated_blocks(),
            max_dimension: default_max_dimension(),
            dimension_tolerance: default_dimension_tolerance(),
            min_footprints: default_min_footprints(),
            allowed_blocks: default_allowed_blocks(),
        }
    }
}

impl GenerationSection {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// 某建筑类型的最小占地面积
    pub fn min_footprint(&self, build_type: &str) -> i64 {
        self.min_footprints
            .get(build_type)
            .or_else(|| self.min_footprints.get("default"))
            .copied()
            .unwrap_or(1)
    }
}

/// [compound] 段：复合建造的组件上限、调用预算与触发词
#[derive(Debug, Clone, Deserialize)]
pub struct CompoundSection {
    #[serde(default = "default_max_components")]
    pub max_components: usize,
    /// 一次复合建造内允许的生成调用总数（含布局调用）
    #[serde(default = "default_max_total_calls")]
    pub max_total_calls: usize,
    #[serde(default = "default_trigger_keywords")]
    pub trigger_keywords: Vec<String>,
}

fn default_max_components() -> usize {
    10
}

fn default_max_total_calls() -> usize {
    30
}

fn default_trigger_keywords() -> Vec<String> {
    [
        "village",
        "town",
        "city",
        "settlement",
        "compound",
        "complex",
        "campus",
        "district",
        "kingdom",
        "base",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for CompoundSection {
    fn default() -> Self {
        Self {
            max_components: default_max_components(),
            max_total_calls: default_max_total_calls(),
            trigger_keywords: default_trigger_keywords(),
        }
    }
}

/// [routing] 段：目录匹配阈值、V2 开关与地标启发
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingSection {
    #[serde(default = "default_catalog_threshold")]
    pub catalog_threshold: f64,
    /// 全局启用 V2 生成（会话开关可单独开启）
    #[serde(default)]
    pub enable_v2: bool,
    #[serde(default = "default_landmark_keywords")]
    pub landmark_keywords: Vec<String>,
    /// V1 分析失败时使用的安全默认类型
    #[serde(default = "default_build_type")]
    pub default_build_type: String,
    /// 本地蓝图目录，未设置时用 ./catalog
    pub catalog_dir: Option<PathBuf>,
}

fn default_catalog_threshold() -> f64 {
    0.6
}

fn default_landmark_keywords() -> Vec<String> {
    [
        "eiffel",
        "colosseum",
        "pyramid",
        "big ben",
        "taj mahal",
        "parthenon",
        "pagoda",
        "lighthouse",
        "windmill",
        "bridge",
        "gate",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_build_type() -> String {
    "house".to_string()
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            catalog_threshold: default_catalog_threshold(),
            enable_v2: false,
            landmark_keywords: default_landmark_keywords(),
            default_build_type: default_build_type(),
            catalog_dir: None,
        }
    }
}

impl RoutingSection {
    pub fn catalog_dir(&self) -> PathBuf {
        self.catalog_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("catalog"))
    }
}

/// [placement] 段：触及半径与站位内缩
#[derive(Debug, Clone, Deserialize)]
pub struct PlacementSection {
    #[serde(default = "default_reach")]
    pub reach: f64,
    #[serde(default = "default_padding")]
    pub padding: f64,
    /// 栅格化前的估算方块数硬上限，超出时拒绝规划
    #[serde(default = "default_max_plan_blocks")]
    pub max_plan_blocks: u64,
}

fn default_reach() -> f64 {
    4.5
}

fn default_padding() -> f64 {
    0.5
}

fn default_max_plan_blocks() -> u64 {
    2_000_000
}

impl Default for PlacementSection {
    fn default() -> Self {
        Self {
            reach: default_reach(),
            padding: default_padding(),
            max_plan_blocks: default_max_plan_blocks(),
        }
    }
}

/// [world] 段：世界高度边界
#[derive(Debug, Clone, Deserialize)]
pub struct WorldSection {
    #[serde(default = "default_min_y")]
    pub min_y: i32,
    #[serde(default = "default_max_y")]
    pub max_y: i32,
}

fn default_min_y() -> i32 {
    -64
}

fn default_max_y() -> i32 {
    320
}

impl Default for WorldSection {
    fn default() -> Self {
        Self {
            min_y: default_min_y(),
            max_y: default_max_y(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 MASON__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MASON__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MASON")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
