//! Mason - 方块世界建造编排核心
//!
//! 模块划分：
//! - **blueprint**: 操作词表、栅格化、建造顺序优化、安全预检与校验
//! - **compound**: 复合建造检测、布局与合并
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复策略、建造上下文、建造规划
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与容错生成客户端
//! - **observability**: 日志初始化与生成统计
//! - **pipeline**: 分析、视觉参考、设计方案、蓝图生成与修复循环
//! - **placement**: 站位覆盖规划与按站位执行
//! - **router**: 请求路由、本地目录与资源加载

pub mod blueprint;
pub mod compound;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod placement;
pub mod router;

pub use crate::core::{plan_build, BuildContext, BuildPlan};
pub use router::{BuildRequest, RequestRouter, RoutedBuild, RoutingDecision, SessionOptions};
