//! 均衡策略
//!
//! 最小化单位能力成本 `(价格 + 1) / 能力`。
//! 加 1 使免费模型之间仍按能力区分，同时避免昂贵模型仅因能力高而胜出。

use super::quality;
use crate::catalog::ModelEntry;
use crate::orchestrator::strategy::{OptimizationStrategy, RankingContext, SelectionStrategy};

/// 均衡策略
pub struct BalancedStrategy;

impl BalancedStrategy {
    /// 创建新的均衡策略
    pub fn new() -> Self {
        Self
    }
}

impl Default for BalancedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for BalancedStrategy {
    fn kind(&self) -> OptimizationStrategy {
        OptimizationStrategy::Balanced
    }

    fn display_name(&self) -> &str {
        "均衡"
    }

    fn description(&self) -> &str {
        "在价格和能力之间取得平衡"
    }

    fn score(&self, model: &ModelEntry, ctx: &RankingContext<'_>) -> f64 {
        (model.blended_price() + 1.0) / quality(model, ctx.category)
    }
}
