//! 最便宜策略
//!
//! 免费模型优先；免费模型之间、以及没有免费模型时的付费模型之间，按价格升序。

use super::cheapness_score;
use crate::catalog::ModelEntry;
use crate::orchestrator::strategy::{OptimizationStrategy, RankingContext, SelectionStrategy};

/// 最便宜策略
pub struct CheapStrategy;

impl CheapStrategy {
    /// 创建新的最便宜策略
    pub fn new() -> Self {
        Self
    }
}

impl Default for CheapStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for CheapStrategy {
    fn kind(&self) -> OptimizationStrategy {
        OptimizationStrategy::Cheap
    }

    fn display_name(&self) -> &str {
        "最便宜"
    }

    fn description(&self) -> &str {
        "优先免费模型，其次选择价格最低的模型"
    }

    fn score(&self, model: &ModelEntry, _ctx: &RankingContext<'_>) -> f64 {
        cheapness_score(model)
    }
}
