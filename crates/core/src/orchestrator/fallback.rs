//! 降级处理器
//!
//! 目标等级没有可用候选时，按最近等级优先的顺序逐个尝试其它等级；
//! 严格过滤全部失败后，按策略允许再绕过健康检查尝试一轮（冷却仍然生效）。

use super::selector::{AvailabilityFilter, ModelSelector, PreparedSelection, SelectionResult};
use super::tier::ModelCategory;
use crate::errors::RoutingResult;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 降级策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// 不降级，只尝试目标等级
    None,
    /// 降级到其它等级，健康检查始终生效
    NextCategory,
    /// 降级到其它等级，仍失败时绕过健康检查
    #[default]
    HealthBypass,
}

impl FallbackPolicy {
    /// 是否允许跨等级降级
    pub fn escalates(&self) -> bool {
        !matches!(self, FallbackPolicy::None)
    }

    /// 是否允许绕过健康检查
    pub fn bypasses_health(&self) -> bool {
        matches!(self, FallbackPolicy::HealthBypass)
    }
}

/// 获取降级等级（按距离排序，距离相同时优先更强的等级）
pub fn escalation_order(category: ModelCategory) -> [ModelCategory; 2] {
    match category {
        ModelCategory::Small => [ModelCategory::Large, ModelCategory::Reasoning],
        ModelCategory::Large => [ModelCategory::Reasoning, ModelCategory::Small],
        ModelCategory::Reasoning => [ModelCategory::Large, ModelCategory::Small],
    }
}

/// 降级处理器
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackRunner {
    policy: FallbackPolicy,
}

impl FallbackRunner {
    /// 创建新的降级处理器
    pub fn new(policy: FallbackPolicy) -> Self {
        Self { policy }
    }

    /// 获取降级策略
    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    /// 执行降级流程
    ///
    /// 价格上限内全部失败时，去掉上限改用 balanced 再走一遍。
    pub(crate) fn run(
        &self,
        selector: &ModelSelector,
        prepared: &PreparedSelection,
    ) -> RoutingResult<SelectionResult> {
        let err = match self.run_pass(selector, prepared) {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };

        let Some(relaxed) = selector.without_cost_ceiling(prepared) else {
            return Err(err);
        };
        warn!(
            "[FallbackRunner] 价格上限 {:?} 内没有可用模型，改用 balanced 重试",
            prepared.preferences.max_cost_per_million
        );
        let mut result = self.run_pass(selector, &relaxed)?;
        result.is_fallback = true;
        result
            .fallback_reason
            .get_or_insert_with(|| "价格上限内没有可用模型，改用 balanced".to_string());
        Ok(result)
    }

    fn run_pass(
        &self,
        selector: &ModelSelector,
        prepared: &PreparedSelection,
    ) -> RoutingResult<SelectionResult> {
        let requested = prepared.requested_category;

        if let Some(result) = selector.try_category(prepared, requested, AvailabilityFilter::Strict)
        {
            return Ok(result);
        }

        if self.policy.escalates() {
            for category in escalation_order(requested) {
                if let Some(mut result) =
                    selector.try_category(prepared, category, AvailabilityFilter::Strict)
                {
                    info!(
                        "[FallbackRunner] 等级 {} 没有可用模型，降级到 {}",
                        requested, category
                    );
                    result.is_fallback = true;
                    result.fallback_reason =
                        Some(format!("从 {requested} 降级到 {category}: 目标等级没有可用模型"));
                    return Ok(result);
                }
            }
        }

        if self.policy.bypasses_health() {
            let categories = std::iter::once(requested).chain(escalation_order(requested));
            for category in categories {
                if let Some(mut result) =
                    selector.try_category(prepared, category, AvailabilityFilter::BypassHealth)
                {
                    warn!(
                        "[FallbackRunner] 所有等级均无健康模型，绕过健康检查选择 {}",
                        result.model.key()
                    );
                    result.is_fallback = true;
                    result.health_bypassed = true;
                    result.fallback_reason = Some(format!(
                        "所有健康模型不可用，绕过健康检查选择 {category} 等级"
                    ));
                    return Ok(result);
                }
            }
        }

        let err = selector.exhaustion_error(prepared);
        warn!("[FallbackRunner] 选择失败 (policy={:?}): {}", self.policy, err);
        Err(err)
    }
}
