//! 速度优化策略
//!
//! 按平均首 token 延迟升序；没有性能样本的模型使用 provider 的静态延迟基线。

use crate::catalog::ModelEntry;
use crate::orchestrator::strategy::{OptimizationStrategy, RankingContext, SelectionStrategy};

/// 速度优化策略
pub struct SpeedOptimizedStrategy;

impl SpeedOptimizedStrategy {
    /// 创建新的速度优化策略
    pub fn new() -> Self {
        Self
    }
}

impl Default for SpeedOptimizedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for SpeedOptimizedStrategy {
    fn kind(&self) -> OptimizationStrategy {
        OptimizationStrategy::Fastest
    }

    fn display_name(&self) -> &str {
        "速度优先"
    }

    fn description(&self) -> &str {
        "选择首 token 延迟最低的模型"
    }

    fn score(&self, model: &ModelEntry, ctx: &RankingContext<'_>) -> f64 {
        ctx.tracker
            .average_ttft(&model.provider, &model.name)
            .unwrap_or_else(|| ctx.config.latency_baseline_ms(&model.provider) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::strategies::test_support::{model, Fixture};
    use crate::orchestrator::strategy::Preferences;
    use crate::orchestrator::tier::ModelCategory;
    use crate::rate_limit::PerformanceSample;

    fn pool() -> Vec<ModelEntry> {
        vec![
            model("openai", "gpt-4o", 128000, 12.5, ModelCategory::Large),
            model("groq", "llama-3.3-70b", 131072, 1.38, ModelCategory::Large),
            model("acme", "acme-large", 32000, 3.0, ModelCategory::Large),
        ]
    }

    #[test]
    fn test_static_provider_ordering_without_samples() {
        let fixture = Fixture::new(Preferences::new(OptimizationStrategy::Fastest));
        let ranked = SpeedOptimizedStrategy::new().rank(&pool(), &fixture.ctx(ModelCategory::Large));

        let names: Vec<_> = ranked.iter().map(|r| r.model.name.as_str()).collect();
        assert_eq!(names, vec!["llama-3.3-70b", "gpt-4o", "acme-large"]);
    }

    #[test]
    fn test_recorded_samples_override_baseline() {
        let fixture = Fixture::new(Preferences::new(OptimizationStrategy::Fastest));
        for _ in 0..3 {
            fixture.tracker.record_performance(
                "groq",
                "llama-3.3-70b",
                PerformanceSample::new(2000, 4000),
            );
            fixture
                .tracker
                .record_performance("openai", "gpt-4o", PerformanceSample::new(90, 3000));
        }

        let ranked = SpeedOptimizedStrategy::new().rank(&pool(), &fixture.ctx(ModelCategory::Large));
        assert_eq!(ranked[0].model.name, "gpt-4o");
        assert_eq!(ranked[0].score, 90.0);
        assert_eq!(ranked.last().unwrap().model.name, "llama-3.3-70b");
    }
}
