//! 选择策略 trait 和注册表
//!
//! 定义优化策略标签、调用方偏好、排序策略接口和策略注册表。

use super::strategies::BalancedStrategy;
use super::tier::ModelCategory;
use crate::analyzer::RequestAnalysis;
use crate::catalog::ModelEntry;
use crate::config::RouterConfig;
use crate::errors::{RoutingError, RoutingResult};
use crate::rate_limit::RateLimitTracker;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// 优化策略
///
/// 反序列化使用宽松解析，无法识别的值退回 `Balanced`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OptimizationStrategy {
    /// 优先免费，其次最便宜
    Cheap,
    /// 性价比
    #[default]
    Balanced,
    /// 能力优先
    Powerful,
    /// 首 token 延迟最低
    Fastest,
    /// 同 cheap，但强制价格上限
    CostOptimized,
}

impl OptimizationStrategy {
    /// 稳定 ID
    pub fn id(&self) -> &'static str {
        match self {
            OptimizationStrategy::Cheap => "cheap",
            OptimizationStrategy::Balanced => "balanced",
            OptimizationStrategy::Powerful => "powerful",
            OptimizationStrategy::Fastest => "fastest",
            OptimizationStrategy::CostOptimized => "cost_optimized",
        }
    }

    /// 获取策略的显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            OptimizationStrategy::Cheap => "最便宜",
            OptimizationStrategy::Balanced => "均衡",
            OptimizationStrategy::Powerful => "能力优先",
            OptimizationStrategy::Fastest => "速度优先",
            OptimizationStrategy::CostOptimized => "成本上限",
        }
    }

    /// 从字符串解析，未知值返回 `Balanced`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "cheap" | "cheapest" => OptimizationStrategy::Cheap,
            "balanced" => OptimizationStrategy::Balanced,
            "powerful" | "quality" | "best" => OptimizationStrategy::Powerful,
            "fastest" | "speed" | "speed_optimized" => OptimizationStrategy::Fastest,
            "cost_optimized" | "cost" => OptimizationStrategy::CostOptimized,
            other => {
                tracing::debug!("[ModelSelector] 未知策略 {:?}，使用 balanced", other);
                OptimizationStrategy::Balanced
            }
        }
    }

    /// 获取所有策略
    pub fn all() -> &'static [OptimizationStrategy] {
        &[
            OptimizationStrategy::Cheap,
            OptimizationStrategy::Balanced,
            OptimizationStrategy::Powerful,
            OptimizationStrategy::Fastest,
            OptimizationStrategy::CostOptimized,
        ]
    }
}

impl std::fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl From<String> for OptimizationStrategy {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for OptimizationStrategy {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<OptimizationStrategy> for String {
    fn from(value: OptimizationStrategy) -> Self {
        value.id().to_string()
    }
}

/// 调用方偏好
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// 优化策略
    pub strategy: OptimizationStrategy,
    /// 价格上限（每百万 tokens，输入+输出），仅 cost_optimized 生效
    pub max_cost_per_million: Option<f64>,
    /// 分数相同时优先的 provider
    pub preferred_provider: Option<String>,
    /// 排除的模型，`provider/model` 或裸模型名
    pub excluded_models: Vec<String>,
}

impl Preferences {
    /// 创建指定策略的偏好
    pub fn new(strategy: OptimizationStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// 设置策略
    pub fn with_strategy(mut self, strategy: OptimizationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// 设置价格上限
    pub fn with_max_cost(mut self, max_cost_per_million: f64) -> Self {
        self.max_cost_per_million = Some(max_cost_per_million);
        self
    }

    /// 设置偏好的 Provider
    pub fn with_preferred_provider(mut self, provider: &str) -> Self {
        self.preferred_provider = Some(provider.to_string());
        self
    }

    /// 添加排除的模型
    pub fn exclude_model(mut self, model_id: &str) -> Self {
        self.excluded_models.push(model_id.to_string());
        self
    }

    /// 模型是否被排除
    pub fn is_excluded(&self, model: &ModelEntry) -> bool {
        self.excluded_models.iter().any(|id| model.matches(id))
    }

    /// 校验偏好
    pub fn validate(&self) -> RoutingResult<()> {
        if let Some(ceiling) = self.max_cost_per_million {
            if !ceiling.is_finite() || ceiling < 0.0 {
                return Err(RoutingError::InvalidPreferences(format!(
                    "max_cost_per_million must be a non-negative number, got {ceiling}"
                )));
            }
        }
        Ok(())
    }
}

/// 排序时可用的上下文
#[derive(Debug, Clone, Copy)]
pub struct RankingContext<'a> {
    /// 请求分析结果
    pub analysis: &'a RequestAnalysis,
    /// 当前尝试的等级
    pub category: ModelCategory,
    /// 调用方偏好
    pub preferences: &'a Preferences,
    /// 限流跟踪器（fastest 读取延迟样本）
    pub tracker: &'a RateLimitTracker,
    /// 路由配置
    pub config: &'a RouterConfig,
}

/// 带分数的候选
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedModel {
    pub model: ModelEntry,
    /// 分数，越低越好
    pub score: f64,
}

/// 选择策略 trait
///
/// 策略只负责对已经过滤的候选打分排序，过滤和打平由选择器处理。
pub trait SelectionStrategy: Send + Sync {
    /// 对应的策略标签
    fn kind(&self) -> OptimizationStrategy;

    /// 策略 ID
    fn id(&self) -> &str {
        self.kind().id()
    }

    /// 策略显示名称
    fn display_name(&self) -> &str;

    /// 策略描述
    fn description(&self) -> &str {
        ""
    }

    /// 模型得分，越低越好
    fn score(&self, model: &ModelEntry, ctx: &RankingContext<'_>) -> f64;

    /// 是否允许该模型参与排序（用于硬性约束）
    fn admits(&self, _model: &ModelEntry, _ctx: &RankingContext<'_>) -> bool {
        true
    }

    /// 排序候选
    ///
    /// 稳定排序，分数相同的模型保持目录顺序；非有限分数排在最后。
    fn rank(&self, pool: &[ModelEntry], ctx: &RankingContext<'_>) -> Vec<RankedModel> {
        let mut ranked: Vec<RankedModel> = pool
            .iter()
            .filter(|m| self.admits(m, ctx))
            .map(|m| {
                let score = self.score(m, ctx);
                RankedModel {
                    model: m.clone(),
                    score: if score.is_nan() { f64::INFINITY } else { score },
                }
            })
            .collect();

        ranked.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal));
        ranked
    }
}

/// 策略注册表
///
/// 每个策略标签对应一个策略实现，调用方可以替换为自定义实现。
pub struct StrategyRegistry {
    /// 已注册的策略
    strategies: HashMap<OptimizationStrategy, Arc<dyn SelectionStrategy>>,
    /// 默认策略
    default_strategy: OptimizationStrategy,
}

impl StrategyRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
            default_strategy: OptimizationStrategy::Balanced,
        }
    }

    /// 注册策略，已存在时替换
    pub fn register(&mut self, strategy: Arc<dyn SelectionStrategy>) {
        let kind = strategy.kind();
        tracing::debug!(
            "[ModelSelector] 注册选择策略: {} ({})",
            strategy.id(),
            strategy.display_name()
        );
        self.strategies.insert(kind, strategy);
    }

    /// 是否注册了指定策略
    pub fn contains(&self, kind: OptimizationStrategy) -> bool {
        self.strategies.contains_key(&kind)
    }

    /// 获取策略
    ///
    /// 未注册时退回默认策略，默认策略也缺失时使用内置 balanced。
    pub fn get(&self, kind: OptimizationStrategy) -> Arc<dyn SelectionStrategy> {
        self.strategies
            .get(&kind)
            .or_else(|| self.strategies.get(&self.default_strategy))
            .cloned()
            .unwrap_or_else(|| Arc::new(BalancedStrategy::new()))
    }

    /// 默认策略
    pub fn default_strategy(&self) -> OptimizationStrategy {
        self.default_strategy
    }

    /// 设置默认策略
    pub fn set_default(&mut self, kind: OptimizationStrategy) {
        self.default_strategy = kind;
    }

    /// 获取所有策略信息，按策略标签顺序
    pub fn list_all(&self) -> Vec<StrategyInfo> {
        OptimizationStrategy::all()
            .iter()
            .filter_map(|kind| self.strategies.get(kind))
            .map(|s| StrategyInfo {
                id: s.id().to_string(),
                display_name: s.display_name().to_string(),
                description: s.description().to_string(),
                is_default: s.kind() == self.default_strategy,
            })
            .collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.strategies.keys().map(|k| k.id()).collect();
        ids.sort_unstable();
        f.debug_struct("StrategyRegistry")
            .field("strategies", &ids)
            .field("default_strategy", &self.default_strategy)
            .finish()
    }
}

/// 策略信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyInfo {
    /// 策略 ID
    pub id: String,
    /// 显示名称
    pub display_name: String,
    /// 描述
    pub description: String,
    /// 是否是默认策略
    pub is_default: bool,
}
