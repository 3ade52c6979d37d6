//! 成本优化策略
//!
//! 排序同 cheap，但强制 `max_cost_per_million` 上限：超出上限的付费模型不参与排序。

use super::cheapness_score;
use crate::catalog::ModelEntry;
use crate::orchestrator::strategy::{OptimizationStrategy, RankingContext, SelectionStrategy};

/// 成本优化策略
pub struct CostOptimizedStrategy;

impl CostOptimizedStrategy {
    /// 创建新的成本优化策略
    pub fn new() -> Self {
        Self
    }
}

impl Default for CostOptimizedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for CostOptimizedStrategy {
    fn kind(&self) -> OptimizationStrategy {
        OptimizationStrategy::CostOptimized
    }

    fn display_name(&self) -> &str {
        "成本上限"
    }

    fn description(&self) -> &str {
        "在价格上限内选择成本最低的模型"
    }

    fn score(&self, model: &ModelEntry, _ctx: &RankingContext<'_>) -> f64 {
        cheapness_score(model)
    }

    fn admits(&self, model: &ModelEntry, ctx: &RankingContext<'_>) -> bool {
        match ctx.preferences.max_cost_per_million {
            Some(ceiling) => model.free || model.blended_price() <= ceiling,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::strategies::test_support::{model, Fixture};
    use crate::orchestrator::strategy::Preferences;
    use crate::orchestrator::tier::ModelCategory;

    fn pool() -> Vec<ModelEntry> {
        vec![
            model("anthropic", "claude-opus", 200000, 90.0, ModelCategory::Large),
            model("groq", "llama-3.3-70b", 131072, 1.38, ModelCategory::Large),
            model("openai", "gpt-4o", 128000, 12.5, ModelCategory::Large),
        ]
    }

    #[test]
    fn test_ceiling_excludes_expensive_models() {
        let fixture = Fixture::new(
            Preferences::new(OptimizationStrategy::CostOptimized).with_max_cost(15.0),
        );
        let ranked = CostOptimizedStrategy::new().rank(&pool(), &fixture.ctx(ModelCategory::Large));

        let names: Vec<_> = ranked.iter().map(|r| r.model.name.as_str()).collect();
        assert_eq!(names, vec!["llama-3.3-70b", "gpt-4o"]);
    }

    #[test]
    fn test_free_models_ignore_ceiling() {
        let fixture =
            Fixture::new(Preferences::new(OptimizationStrategy::CostOptimized).with_max_cost(0.0));
        let free = model("google", "gemini-pro", 32000, 5.0, ModelCategory::Large).with_free(true);
        let mut models = pool();
        models.push(free);

        let ranked = CostOptimizedStrategy::new().rank(&models, &fixture.ctx(ModelCategory::Large));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].model.name, "gemini-pro");
    }

    #[test]
    fn test_no_ceiling_behaves_like_cheap() {
        let fixture = Fixture::new(Preferences::new(OptimizationStrategy::CostOptimized));
        let ranked = CostOptimizedStrategy::new().rank(&pool(), &fixture.ctx(ModelCategory::Large));
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].model.name, "llama-3.3-70b");
    }
}
