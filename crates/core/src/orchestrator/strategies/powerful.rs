//! 能力优先策略
//!
//! 选择能力分最高的模型，忽略价格。

use super::quality;
use crate::catalog::ModelEntry;
use crate::orchestrator::strategy::{OptimizationStrategy, RankingContext, SelectionStrategy};
use crate::orchestrator::tier::ModelCategory;

/// 推理专长加成，仅在推理等级内生效
const REASONING_SPECIALIST_BONUS: f64 = 2.0;

/// 能力优先策略
pub struct PowerfulStrategy;

impl PowerfulStrategy {
    /// 创建新的能力优先策略
    pub fn new() -> Self {
        Self
    }
}

impl Default for PowerfulStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for PowerfulStrategy {
    fn kind(&self) -> OptimizationStrategy {
        OptimizationStrategy::Powerful
    }

    fn display_name(&self) -> &str {
        "能力优先"
    }

    fn description(&self) -> &str {
        "选择能力最强的模型，推理等级内优先推理专长模型"
    }

    fn score(&self, model: &ModelEntry, ctx: &RankingContext<'_>) -> f64 {
        let mut strength = quality(model, ctx.category);
        if ctx.category == ModelCategory::Reasoning && model.is_reasoning_specialized() {
            strength += REASONING_SPECIALIST_BONUS;
        }
        -strength
    }
}
