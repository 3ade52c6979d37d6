//! 模型编排器模块
//!
//! 为每个请求从目录中选出一个模型，同时考虑上下文窗口、限流冷却、健康状态和优化策略。
//!
//! ## 模块结构
//!
//! - `tier` - 模型等级定义 (Small/Large/Reasoning)
//! - `strategy` - 优化策略标签、偏好、策略 trait 和注册表
//! - `strategies` - 内置策略实现
//! - `round_robin` - 打平候选的轮询
//! - `selector` - 模型选择器
//! - `fallback` - 降级处理器
//!
//! ## 选择流程
//!
//! 1. 分析请求，得到请求类型和目标等级
//! 2. 按上下文窗口过滤整个目录，没有任何模型放得下时直接失败
//! 3. 目标等级内按冷却、预算、健康过滤后排序，打平的候选轮询
//! 4. 目标等级为空时按最近等级降级，必要时绕过健康检查

mod fallback;
mod round_robin;
mod selector;
pub mod strategies;
mod strategy;
mod tier;

pub use fallback::{escalation_order, FallbackPolicy, FallbackRunner};
pub use round_robin::RoundRobinSelector;
pub use selector::{ModelSelector, SelectionRequest, SelectionResult};
pub use strategies::*;
pub use strategy::{
    OptimizationStrategy, Preferences, RankedModel, RankingContext, SelectionStrategy,
    StrategyInfo, StrategyRegistry,
};
pub use tier::{CategoryPool, ModelCategorizer, ModelCategory};
