//! 内置选择策略
//!
//! 每个 `OptimizationStrategy` 对应一个实现。

mod balanced;
mod cheap;
mod cost_optimized;
mod powerful;
mod speed_optimized;

pub use balanced::BalancedStrategy;
pub use cheap::CheapStrategy;
pub use cost_optimized::CostOptimizedStrategy;
pub use powerful::PowerfulStrategy;
pub use speed_optimized::SpeedOptimizedStrategy;

use super::strategy::StrategyRegistry;
use super::tier::ModelCategory;
use crate::catalog::{ModelEntry, DEFAULT_CONTEXT_WINDOW};
use std::sync::Arc;

/// 付费模型在 cheap 排序中的固定惩罚，保证任何免费模型都排在付费模型之前
pub(crate) const PAID_PENALTY: f64 = 1_000_000.0;

/// 价格分：免费模型只比较名义价格，付费模型整体后移
pub(crate) fn cheapness_score(model: &ModelEntry) -> f64 {
    let price = model.blended_price();
    if model.free {
        price
    } else {
        PAID_PENALTY + price
    }
}

/// 能力分
///
/// 等级权重 × 上下文加成；目标为推理等级时，推理专长模型额外加权。
pub(crate) fn quality(model: &ModelEntry, target: ModelCategory) -> f64 {
    let ratio = model.context_window as f64 / DEFAULT_CONTEXT_WINDOW as f64;
    let context_bonus = 1.0 + 0.1 * ratio.ln().max(0.0);
    let mut quality = model.category.capability() * context_bonus;
    if target == ModelCategory::Reasoning && model.is_reasoning_specialized() {
        quality *= 1.5;
    }
    quality
}

/// 注册所有内置策略
pub fn register_builtin_strategies(registry: &mut StrategyRegistry) {
    registry.register(Arc::new(CheapStrategy::new()));
    registry.register(Arc::new(BalancedStrategy::new()));
    registry.register(Arc::new(PowerfulStrategy::new()));
    registry.register(Arc::new(SpeedOptimizedStrategy::new()));
    registry.register(Arc::new(CostOptimizedStrategy::new()));
}

/// 创建带有内置策略的注册表
pub fn create_default_registry() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    register_builtin_strategies(&mut registry);
    registry
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::strategy::OptimizationStrategy;

    #[test]
    fn test_default_registry_covers_all_strategies() {
        let registry = create_default_registry();
        for kind in OptimizationStrategy::all() {
            assert!(registry.contains(*kind));
            assert_eq!(registry.get(*kind).kind(), *kind);
        }
        assert_eq!(registry.list_all().len(), 5);
        assert_eq!(
            registry.list_all().iter().filter(|i| i.is_default).count(),
            1
        );
    }

    #[test]
    fn test_quality_prefers_larger_tiers_and_context() {
        let small = test_support::model("a", "s", 8192, 0.0, ModelCategory::Small);
        let large = test_support::model("a", "l", 8192, 0.0, ModelCategory::Large);
        let large_wide = test_support::model("a", "lw", 131072, 0.0, ModelCategory::Large);
        let target = ModelCategory::Large;

        assert!(quality(&large, target) > quality(&small, target));
        assert!(quality(&large_wide, target) > quality(&large, target));
    }
}
