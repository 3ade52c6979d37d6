//! 模型选择器
//!
//! 整合请求分析、等级映射、限流过滤、策略排序和轮询打平，
//! 对外提供 `select_model` / `select_with_fallback` / `batch_select`。

use super::fallback::{FallbackPolicy, FallbackRunner};
use super::round_robin::RoundRobinSelector;
use super::strategies::create_default_registry;
use super::strategy::{
    OptimizationStrategy, Preferences, RankedModel, RankingContext, SelectionStrategy,
    StrategyRegistry,
};
use super::tier::{ModelCategorizer, ModelCategory};
use crate::analyzer::{ChatMessage, RequestAnalysis, RequestAnalyzer, ToolDeclaration};
use crate::catalog::{Catalog, ModelEntry};
use crate::config::RouterConfig;
use crate::errors::{RoutingError, RoutingResult};
use crate::rate_limit::RateLimitTracker;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// 分数差在该范围内视为打平
const SCORE_EPSILON: f64 = 1e-9;

/// 选择请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionRequest {
    /// 对话消息
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// 工具声明
    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
    /// 调用方给出的输出上限
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// 选择偏好，None 时使用配置中的默认策略
    #[serde(default)]
    pub preferences: Option<Preferences>,
}

impl SelectionRequest {
    /// 创建新的选择请求
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// 单条用户消息
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::user(prompt)])
    }

    /// 设置工具声明
    pub fn with_tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.tools = tools;
        self
    }

    /// 设置输出上限
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// 设置策略（保留其它偏好）
    pub fn with_strategy(mut self, strategy: OptimizationStrategy) -> Self {
        let preferences = self.preferences.take().unwrap_or_default();
        self.preferences = Some(preferences.with_strategy(strategy));
        self
    }

    /// 设置完整偏好
    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = Some(preferences);
        self
    }
}

/// 选择结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    /// 选中的模型
    pub model: ModelEntry,
    /// 选中模型所在的等级
    pub category: ModelCategory,
    /// 请求分析得出的目标等级
    pub requested_category: ModelCategory,
    /// 实际使用的策略
    pub strategy: OptimizationStrategy,
    /// 请求分析结果
    pub analysis: RequestAnalysis,
    /// 预估输入 tokens
    pub input_tokens: u32,
    /// 预留输出 tokens
    pub output_tokens: u32,
    /// 输入 + 输出
    pub total_tokens: u32,
    /// 该等级通过过滤的候选数
    pub candidate_count: usize,
    /// 备选模型，按优先级排序
    pub fallbacks: Vec<ModelEntry>,
    /// 选择原因
    pub reason: String,
    /// 是否是降级选择
    pub is_fallback: bool,
    /// 降级原因（如果是降级）
    pub fallback_reason: Option<String>,
    /// 是否绕过了健康检查
    pub health_bypassed: bool,
}

/// 可用性过滤方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AvailabilityFilter {
    /// 冷却、预算和健康检查全部生效
    Strict,
    /// 忽略健康检查，冷却和预算仍然生效
    BypassHealth,
}

/// 一次选择的预计算结果，在各等级尝试之间共享
pub(crate) struct PreparedSelection {
    pub(crate) analysis: RequestAnalysis,
    pub(crate) requested_category: ModelCategory,
    pub(crate) preferences: Preferences,
    pub(crate) strategy: Arc<dyn SelectionStrategy>,
    pub(crate) input_tokens: u32,
    pub(crate) output_tokens: u32,
    pub(crate) total_tokens: u32,
    /// 上下文窗口足够且未被排除的模型
    pub(crate) candidates: Vec<ModelEntry>,
}

/// 模型选择器
///
/// `Send + Sync`，可以放进 `Arc` 在多个线程间共享。
pub struct ModelSelector {
    catalog: Arc<Catalog>,
    tracker: Arc<RateLimitTracker>,
    round_robin: Arc<RoundRobinSelector>,
    registry: StrategyRegistry,
    analyzer: RequestAnalyzer,
    config: RouterConfig,
}

impl ModelSelector {
    /// 创建新的模型选择器
    pub fn new(
        catalog: Arc<Catalog>,
        tracker: Arc<RateLimitTracker>,
        round_robin: Arc<RoundRobinSelector>,
    ) -> Self {
        let config = RouterConfig::default();
        Self {
            catalog,
            tracker,
            round_robin,
            registry: create_default_registry(),
            analyzer: RequestAnalyzer::with_config(config.analyzer_config()),
            config,
        }
    }

    /// 按配置创建，跟踪器和轮询状态由选择器新建
    pub fn from_config(catalog: Arc<Catalog>, config: RouterConfig) -> Self {
        let tracker = Arc::new(RateLimitTracker::from_config(&config));
        Self::new(catalog, tracker, Arc::new(RoundRobinSelector::new())).with_config(config)
    }

    /// 设置路由配置
    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.analyzer = RequestAnalyzer::with_config(config.analyzer_config());
        self.config = config;
        self
    }

    /// 设置策略注册表
    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// 模型目录
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// 限流跟踪器
    pub fn tracker(&self) -> &Arc<RateLimitTracker> {
        &self.tracker
    }

    /// 轮询选择器
    pub fn round_robin(&self) -> &Arc<RoundRobinSelector> {
        &self.round_robin
    }

    /// 策略注册表
    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// 路由配置
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// 选择模型
    ///
    /// 目标等级为空时按等级降级，但不会绕过健康检查。
    pub fn select_model(&self, request: &SelectionRequest) -> RoutingResult<SelectionResult> {
        self.select_with_policy(request, FallbackPolicy::NextCategory)
    }

    /// 选择模型，严格过滤全部失败后按配置允许绕过健康检查
    pub fn select_with_fallback(
        &self,
        request: &SelectionRequest,
    ) -> RoutingResult<SelectionResult> {
        self.select_with_policy(request, self.config.fallback_policy())
    }

    /// 使用指定降级策略选择模型
    pub fn select_with_policy(
        &self,
        request: &SelectionRequest,
        policy: FallbackPolicy,
    ) -> RoutingResult<SelectionResult> {
        let prepared = self.prepare(request)?;
        FallbackRunner::new(policy).run(self, &prepared)
    }

    /// 批量选择，每个请求独立执行
    pub fn batch_select(
        &self,
        requests: &[SelectionRequest],
    ) -> Vec<RoutingResult<SelectionResult>> {
        requests
            .iter()
            .map(|request| self.select_with_fallback(request))
            .collect()
    }

    /// 分析请求、分配 tokens、构建上下文窗口候选池
    pub(crate) fn prepare(&self, request: &SelectionRequest) -> RoutingResult<PreparedSelection> {
        let analysis = self
            .analyzer
            .analyze(&request.messages, &request.tools, request.max_tokens);
        let requested_category = ModelCategorizer::category_for(&analysis);

        if self.catalog.is_empty() {
            return Err(RoutingError::NoAvailableModels {
                category: requested_category,
            });
        }

        let mut preferences = self.effective_preferences(request);
        let input_tokens = analysis.input_tokens;
        let output_tokens = self.config.output_tokens.allocate(
            analysis.request_type,
            preferences.strategy,
            request.max_tokens,
        );
        let total_tokens = input_tokens.saturating_add(output_tokens);

        let fitting: Vec<&ModelEntry> = self
            .catalog
            .models()
            .iter()
            .filter(|m| m.context_window >= total_tokens)
            .collect();

        if fitting.is_empty() {
            return Err(RoutingError::ContextWindowExceeded {
                required: total_tokens,
                largest: self.catalog.largest_context_window(),
            });
        }

        let candidates: Vec<ModelEntry> = fitting
            .into_iter()
            .filter(|m| !preferences.is_excluded(m))
            .cloned()
            .collect();

        let mut strategy = self.registry.get(preferences.strategy);
        let ctx = RankingContext {
            analysis: &analysis,
            category: requested_category,
            preferences: &preferences,
            tracker: &self.tracker,
            config: &self.config,
        };
        let admitted = candidates.iter().any(|m| strategy.admits(m, &ctx));
        if !candidates.is_empty() && !admitted {
            warn!(
                "[ModelSelector] 价格上限 {:?} 排除了所有候选，改用 balanced",
                preferences.max_cost_per_million
            );
            preferences.strategy = OptimizationStrategy::Balanced;
            preferences.max_cost_per_million = None;
            strategy = self.registry.get(OptimizationStrategy::Balanced);
        }

        debug!(
            "[ModelSelector] type={} category={} strategy={} tokens={}+{} candidates={}",
            analysis.request_type,
            requested_category,
            preferences.strategy,
            input_tokens,
            output_tokens,
            candidates.len()
        );

        Ok(PreparedSelection {
            analysis,
            requested_category,
            preferences,
            strategy,
            input_tokens,
            output_tokens,
            total_tokens,
            candidates,
        })
    }

    /// 无效偏好退回默认策略，不让选择失败
    fn effective_preferences(&self, request: &SelectionRequest) -> Preferences {
        let preferences = request
            .preferences
            .clone()
            .unwrap_or_else(|| Preferences::new(self.config.default_strategy));

        match preferences.validate() {
            Ok(()) => preferences,
            Err(e) => {
                warn!("[ModelSelector] {}，改用 balanced", e);
                Preferences {
                    strategy: OptimizationStrategy::Balanced,
                    max_cost_per_million: None,
                    ..preferences
                }
            }
        }
    }

    /// 指定等级内通过过滤的候选
    fn available_in(
        &self,
        prepared: &PreparedSelection,
        category: ModelCategory,
        filter: AvailabilityFilter,
    ) -> Vec<ModelEntry> {
        prepared
            .candidates
            .iter()
            .filter(|m| m.category == category)
            .filter(|m| match filter {
                AvailabilityFilter::Strict => {
                    self.tracker
                        .is_available(&m.provider, &m.name, prepared.total_tokens)
                }
                AvailabilityFilter::BypassHealth => {
                    !self
                        .tracker
                        .is_rate_limited(&m.provider, &m.name, prepared.total_tokens)
                }
            })
            .cloned()
            .collect()
    }

    fn rank_in(
        &self,
        prepared: &PreparedSelection,
        category: ModelCategory,
        pool: &[ModelEntry],
    ) -> Vec<RankedModel> {
        let ctx = RankingContext {
            analysis: &prepared.analysis,
            category,
            preferences: &prepared.preferences,
            tracker: &self.tracker,
            config: &self.config,
        };
        prepared.strategy.rank(pool, &ctx)
    }

    /// 在单个等级内尝试选择
    ///
    /// 排序后取分数打平的头部，偏好 provider 优先，再交给轮询选择器。
    /// 备选列表为同等级剩余候选，其后是其它等级的可用候选。
    pub(crate) fn try_category(
        &self,
        prepared: &PreparedSelection,
        category: ModelCategory,
        filter: AvailabilityFilter,
    ) -> Option<SelectionResult> {
        let pool = self.available_in(prepared, category, filter);
        if pool.is_empty() {
            debug!("[ModelSelector] 等级 {} 没有可用候选 ({:?})", category, filter);
            return None;
        }

        let ranked = self.rank_in(prepared, category, &pool);
        let best = ranked.first()?.score;

        let mut ties: Vec<usize> = ranked
            .iter()
            .enumerate()
            .take_while(|(_, r)| r.score == best || (r.score - best).abs() <= SCORE_EPSILON)
            .map(|(i, _)| i)
            .collect();

        if let Some(provider) = prepared.preferences.preferred_provider.as_deref() {
            let preferred: Vec<usize> = ties
                .iter()
                .copied()
                .filter(|&i| ranked[i].model.provider.eq_ignore_ascii_case(provider))
                .collect();
            if !preferred.is_empty() {
                ties = preferred;
            }
        }

        let key = RoundRobinSelector::key_for(category, prepared.strategy.kind());
        let chosen_index = *self.round_robin.pick(&key, &ties)?;
        let chosen = ranked[chosen_index].model.clone();

        let mut fallbacks: Vec<ModelEntry> = ranked
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != chosen_index)
            .map(|(_, r)| r.model.clone())
            .collect();
        for other in super::fallback::escalation_order(category) {
            let other_pool = self.available_in(prepared, other, filter);
            fallbacks.extend(
                self.rank_in(prepared, other, &other_pool)
                    .into_iter()
                    .map(|r| r.model),
            );
        }

        debug!(
            "[ModelSelector] 选中 {} (等级 {}，打平 {} 个，候选 {} 个)",
            chosen.key(),
            category,
            ties.len(),
            pool.len()
        );

        let reason = format!(
            "{} 策略在 {} 等级 {} 个候选中选择 {}",
            prepared.strategy.display_name(),
            category,
            pool.len(),
            chosen.key()
        );

        Some(SelectionResult {
            model: chosen,
            category,
            requested_category: prepared.requested_category,
            strategy: prepared.preferences.strategy,
            analysis: prepared.analysis.clone(),
            input_tokens: prepared.input_tokens,
            output_tokens: prepared.output_tokens,
            total_tokens: prepared.total_tokens,
            candidate_count: pool.len(),
            fallbacks,
            reason,
            is_fallback: false,
            fallback_reason: None,
            health_bypassed: false,
        })
    }

    /// 价格上限生效时，去掉上限改用 balanced 重新构建
    ///
    /// 上限内的模型可能全部在冷却中，此时上限外仍可能有可用模型。
    pub(crate) fn without_cost_ceiling(
        &self,
        prepared: &PreparedSelection,
    ) -> Option<PreparedSelection> {
        prepared.preferences.max_cost_per_million?;
        if prepared.strategy.kind() != OptimizationStrategy::CostOptimized {
            return None;
        }

        let preferences = Preferences {
            strategy: OptimizationStrategy::Balanced,
            max_cost_per_million: None,
            ..prepared.preferences.clone()
        };
        Some(PreparedSelection {
            analysis: prepared.analysis.clone(),
            requested_category: prepared.requested_category,
            preferences,
            strategy: self.registry.get(OptimizationStrategy::Balanced),
            input_tokens: prepared.input_tokens,
            output_tokens: prepared.output_tokens,
            total_tokens: prepared.total_tokens,
            candidates: prepared.candidates.clone(),
        })
    }

    /// 所有尝试失败后的错误
    ///
    /// 每个候选都处于冷却（或预算不足）时报告限流，否则报告无可用模型。
    pub(crate) fn exhaustion_error(&self, prepared: &PreparedSelection) -> RoutingError {
        let all_rate_limited = !prepared.candidates.is_empty()
            && prepared.candidates.iter().all(|m| {
                self.tracker
                    .is_rate_limited(&m.provider, &m.name, prepared.total_tokens)
            });

        if all_rate_limited {
            RoutingError::AllModelsRateLimited {
                checked: prepared.candidates.len(),
            }
        } else {
            RoutingError::NoAvailableModels {
                category: prepared.requested_category,
            }
        }
    }
}

impl std::fmt::Debug for ModelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSelector")
            .field("models", &self.catalog.len())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Pricing;
    use crate::rate_limit::PerformanceSample;

    fn catalog() -> Catalog {
        Catalog::new(vec![
            ModelEntry::new("groq", "llama-3.2-1b", 8192, Pricing::free(), ModelCategory::Small),
            ModelEntry::new(
                "groq",
                "llama-3.3-70b",
                131072,
                Pricing::new(0.59, 0.79),
                ModelCategory::Large,
            ),
            ModelEntry::new(
                "openai",
                "gpt-4o-mini",
                128000,
                Pricing::new(0.15, 0.6),
                ModelCategory::Small,
            ),
            ModelEntry::new(
                "openai",
                "o1-preview",
                128000,
                Pricing::new(15.0, 60.0),
                ModelCategory::Reasoning,
            ),
        ])
    }

    fn selector_for(catalog: Catalog) -> ModelSelector {
        ModelSelector::new(
            Arc::new(catalog),
            Arc::new(RateLimitTracker::new()),
            Arc::new(RoundRobinSelector::new()),
        )
    }

    fn cheap(prompt: &str) -> SelectionRequest {
        SelectionRequest::from_prompt(prompt).with_strategy(OptimizationStrategy::Cheap)
    }

    #[test]
    fn test_simple_cheap_selects_free_small() {
        let selector = selector_for(catalog());
        let result = selector.select_model(&cheap("Hello")).unwrap();

        assert_eq!(result.category, ModelCategory::Small);
        assert_eq!(result.model.name, "llama-3.2-1b");
        assert!(result.model.free);
        assert!(!result.is_fallback);
        assert_eq!(result.total_tokens, result.input_tokens + result.output_tokens);
        assert_eq!(result.candidate_count, 2);
        // 同等级剩余候选排在最前
        assert_eq!(result.fallbacks[0].name, "gpt-4o-mini");
        assert_eq!(result.fallbacks.len(), 3);
    }

    #[test]
    fn test_default_strategy_from_config() {
        let config = RouterConfig {
            default_strategy: OptimizationStrategy::Powerful,
            ..Default::default()
        };
        let selector = selector_for(catalog()).with_config(config);

        let result = selector
            .select_model(&SelectionRequest::from_prompt("Hello"))
            .unwrap();
        assert_eq!(result.strategy, OptimizationStrategy::Powerful);
        assert_eq!(result.model.name, "gpt-4o-mini");
    }

    #[test]
    fn test_cooldown_moves_cheap_to_paid() {
        let selector = selector_for(catalog());
        selector.tracker().update_from_429("groq", "llama-3.2-1b", 60.0);

        let result = selector.select_model(&cheap("Hello")).unwrap();
        assert_eq!(result.model.name, "gpt-4o-mini");
        assert!(!result.model.free);
        assert!(result.fallbacks.iter().all(|m| m.name != "llama-3.2-1b"));
    }

    #[test]
    fn test_empty_category_escalates() {
        let selector = selector_for(catalog());
        selector.tracker().update_from_429("groq", "llama-3.2-1b", 60.0);
        selector.tracker().update_from_429("openai", "gpt-4o-mini", 60.0);

        let result = selector.select_model(&cheap("Hello")).unwrap();
        assert_eq!(result.requested_category, ModelCategory::Small);
        assert_eq!(result.category, ModelCategory::Large);
        assert!(result.is_fallback);
        assert!(result.fallback_reason.is_some());
        assert!(!result.health_bypassed);
    }

    #[test]
    fn test_preferred_provider_breaks_ties() {
        let catalog = Catalog::new(vec![
            ModelEntry::new("groq", "llama-3.2-1b", 8192, Pricing::free(), ModelCategory::Small),
            ModelEntry::new(
                "cerebras",
                "llama-3.2-3b",
                8192,
                Pricing::free(),
                ModelCategory::Small,
            ),
        ]);
        let selector = selector_for(catalog);
        let request = SelectionRequest::from_prompt("Hello").with_preferences(
            Preferences::new(OptimizationStrategy::Cheap).with_preferred_provider("cerebras"),
        );

        for _ in 0..4 {
            let result = selector.select_model(&request).unwrap();
            assert_eq!(result.model.provider, "cerebras");
        }
    }

    #[test]
    fn test_excluded_models_are_skipped() {
        let selector = selector_for(catalog());
        let request = SelectionRequest::from_prompt("Hello").with_preferences(
            Preferences::new(OptimizationStrategy::Cheap).exclude_model("groq/llama-3.2-1b"),
        );

        let result = selector.select_model(&request).unwrap();
        assert_eq!(result.model.name, "gpt-4o-mini");
        assert!(result.fallbacks.iter().all(|m| m.name != "llama-3.2-1b"));
    }

    #[test]
    fn test_impossible_ceiling_falls_back_to_balanced() {
        let catalog = Catalog::new(vec![ModelEntry::new(
            "openai",
            "gpt-4o",
            128000,
            Pricing::new(2.5, 10.0),
            ModelCategory::Large,
        )]);
        let selector = selector_for(catalog);
        let request = SelectionRequest::from_prompt("Hello").with_preferences(
            Preferences::new(OptimizationStrategy::CostOptimized).with_max_cost(0.01),
        );

        let result = selector.select_model(&request).unwrap();
        assert_eq!(result.model.name, "gpt-4o");
        assert_eq!(result.strategy, OptimizationStrategy::Balanced);
    }

    #[test]
    fn test_invalid_preferences_recover() {
        let selector = selector_for(catalog());
        let request = SelectionRequest::from_prompt("Hello").with_preferences(
            Preferences::new(OptimizationStrategy::CostOptimized).with_max_cost(-5.0),
        );

        let result = selector.select_model(&request).unwrap();
        assert_eq!(result.strategy, OptimizationStrategy::Balanced);
    }

    #[test]
    fn test_explicit_max_tokens_drives_context_filter() {
        let selector = selector_for(catalog());
        let request = cheap("Hello").with_max_tokens(10_000);

        let result = selector.select_model(&request).unwrap();
        // llama-3.2-1b 的 8192 上下文放不下
        assert_eq!(result.model.name, "gpt-4o-mini");
        assert_eq!(result.output_tokens, 10_000);
    }

    #[test]
    fn test_context_window_exceeded() {
        let selector = selector_for(catalog());
        let request = cheap("Hello").with_max_tokens(500_000);

        let err = selector.select_with_fallback(&request).unwrap_err();
        assert!(matches!(
            err,
            RoutingError::ContextWindowExceeded {
                largest: 131072,
                ..
            }
        ));
        assert!(err.to_string().contains("context window"));
    }

    #[test]
    fn test_empty_catalog() {
        let selector = selector_for(Catalog::default());
        let err = selector.select_model(&cheap("Hello")).unwrap_err();
        assert!(matches!(err, RoutingError::NoAvailableModels { .. }));
    }

    #[test]
    fn test_fastest_uses_recorded_latency() {
        let selector = selector_for(catalog());
        selector.tracker().record_performance(
            "openai",
            "gpt-4o-mini",
            PerformanceSample::new(40, 800),
        );

        let request = SelectionRequest::from_prompt("Hello")
            .with_strategy(OptimizationStrategy::Fastest);
        let result = selector.select_model(&request).unwrap();
        assert_eq!(result.model.name, "gpt-4o-mini");
    }

    #[test]
    fn test_batch_select_is_independent() {
        let selector = selector_for(catalog());
        let requests = vec![
            cheap("Hello"),
            cheap("Hello").with_max_tokens(500_000),
            SelectionRequest::from_prompt("solve: x^2+5x+6=0, show your work")
                .with_strategy(OptimizationStrategy::Powerful),
        ];

        let results = selector.batch_select(&requests);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(
            results[2].as_ref().map(|r| r.category).ok(),
            Some(ModelCategory::Reasoning)
        );
    }

    #[test]
    fn test_selector_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ModelSelector>();
    }
}
