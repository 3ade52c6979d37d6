//! 限流与健康状态跟踪
//!
//! 按 (provider, model) 记录：
//! - 429 冷却截止时间（只会延长，不会缩短）
//! - 连续错误数（达到阈值即不健康，成功一次清零）
//! - 最近的性能样本（环形窗口，供 fastest 策略使用）
//! - 可选的每分钟 token 预算
//!
//! 状态按键懒创建，存放在 `DashMap` 中，每次读改写只锁对应分片。
//! 所有依赖时间的操作都有 `*_at` 版本，便于测试驱动时钟。

use crate::config::{RouterConfig, DEFAULT_PERFORMANCE_WINDOW, DEFAULT_UNHEALTHY_THRESHOLD};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// retry-after 无法解析时的默认冷却（秒）
pub const DEFAULT_RETRY_AFTER_SECS: f64 = 60.0;

/// token 预算窗口长度（秒）
const BUDGET_WINDOW_SECS: i64 = 60;

/// 单次请求的性能样本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// 首 token 延迟（毫秒）
    pub time_to_first_token_ms: u64,
    /// 总耗时（毫秒）
    pub total_duration_ms: u64,
}

impl PerformanceSample {
    pub fn new(time_to_first_token_ms: u64, total_duration_ms: u64) -> Self {
        Self {
            time_to_first_token_ms,
            total_duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ModelKey {
    provider: String,
    model: String,
}

impl ModelKey {
    fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct TokenBudget {
    tokens_per_minute: u32,
    window_start: DateTime<Utc>,
    used: u32,
}

impl TokenBudget {
    fn used_at(&self, now: DateTime<Utc>) -> u32 {
        if now - self.window_start >= Duration::seconds(BUDGET_WINDOW_SECS) {
            0
        } else {
            self.used
        }
    }

    /// 窗口内第一次请求总是放行，否则超出整个预算的请求永远无法通过
    fn allows(&self, tokens: u32, now: DateTime<Utc>) -> bool {
        let used = self.used_at(now);
        used == 0 || used.saturating_add(tokens) <= self.tokens_per_minute
    }

    fn consume(&mut self, tokens: u32, now: DateTime<Utc>) {
        if now - self.window_start >= Duration::seconds(BUDGET_WINDOW_SECS) {
            self.window_start = now;
            self.used = 0;
        }
        self.used = self.used.saturating_add(tokens);
    }
}

#[derive(Debug, Clone, Default)]
struct RateLimitState {
    cooldown_until: Option<DateTime<Utc>>,
    consecutive_errors: u32,
    samples: VecDeque<PerformanceSample>,
    budget: Option<TokenBudget>,
    last_error_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    fn average_ttft(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self
            .samples
            .iter()
            .map(|s| s.time_to_first_token_ms)
            .sum();
        Some(sum as f64 / self.samples.len() as f64)
    }
}

/// 单个模型的健康快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHealth {
    pub provider: String,
    pub model: String,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub sample_count: usize,
    pub average_ttft_ms: Option<f64>,
    pub healthy: bool,
    pub rate_limited: bool,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// 跟踪器汇总统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    /// 已跟踪的模型数
    pub tracked: usize,
    /// 冷却中的模型数
    pub cooling_down: usize,
    /// 不健康的模型数
    pub unhealthy: usize,
}

/// 限流跟踪器
///
/// 显式构造、可注入，不是进程级单例；一个实例可以被多个并发请求共享。
#[derive(Debug)]
pub struct RateLimitTracker {
    states: DashMap<ModelKey, RateLimitState>,
    unhealthy_threshold: u32,
    performance_window: usize,
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitTracker {
    /// 使用默认阈值创建
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_UNHEALTHY_THRESHOLD, DEFAULT_PERFORMANCE_WINDOW)
    }

    /// 指定不健康阈值和样本窗口
    pub fn with_limits(unhealthy_threshold: u32, performance_window: usize) -> Self {
        Self {
            states: DashMap::new(),
            unhealthy_threshold: unhealthy_threshold.max(1),
            performance_window: performance_window.max(1),
        }
    }

    /// 从路由配置创建，并安装配置中的 token 预算
    pub fn from_config(config: &RouterConfig) -> Self {
        let tracker = Self::with_limits(config.unhealthy_threshold, config.performance_window);
        for budget in &config.token_budgets {
            tracker.set_token_budget(&budget.provider, &budget.model, budget.tokens_per_minute);
        }
        tracker
    }

    /// 不健康阈值
    pub fn unhealthy_threshold(&self) -> u32 {
        self.unhealthy_threshold
    }

    /// 是否可用：不在冷却中、健康、预算充足
    pub fn is_available(&self, provider: &str, model: &str, estimated_tokens: u32) -> bool {
        self.is_available_at(provider, model, estimated_tokens, Utc::now())
    }

    pub fn is_available_at(
        &self,
        provider: &str,
        model: &str,
        estimated_tokens: u32,
        now: DateTime<Utc>,
    ) -> bool {
        self.is_healthy(provider, model)
            && !self.is_rate_limited_at(provider, model, estimated_tokens, now)
    }

    /// 是否处于限流状态（冷却中或预算不足），不考虑健康状态
    pub fn is_rate_limited(&self, provider: &str, model: &str, estimated_tokens: u32) -> bool {
        self.is_rate_limited_at(provider, model, estimated_tokens, Utc::now())
    }

    pub fn is_rate_limited_at(
        &self,
        provider: &str,
        model: &str,
        estimated_tokens: u32,
        now: DateTime<Utc>,
    ) -> bool {
        match self.states.get(&ModelKey::new(provider, model)) {
            Some(state) => {
                state.in_cooldown(now)
                    || state
                        .budget
                        .as_ref()
                        .is_some_and(|b| !b.allows(estimated_tokens, now))
            }
            None => false,
        }
    }

    /// 是否在冷却中
    pub fn in_cooldown_at(&self, provider: &str, model: &str, now: DateTime<Utc>) -> bool {
        self.states
            .get(&ModelKey::new(provider, model))
            .is_some_and(|state| state.in_cooldown(now))
    }

    /// 连续错误数是否低于阈值
    pub fn is_healthy(&self, provider: &str, model: &str) -> bool {
        self.consecutive_errors(provider, model) < self.unhealthy_threshold
    }

    /// 当前连续错误数
    pub fn consecutive_errors(&self, provider: &str, model: &str) -> u32 {
        self.states
            .get(&ModelKey::new(provider, model))
            .map(|state| state.consecutive_errors)
            .unwrap_or(0)
    }

    /// 收到 429 后设置冷却
    ///
    /// 冷却截止时间取旧值与 `now + retry_after` 的较大者。
    /// 负数或非有限值按默认冷却处理。
    pub fn update_from_429(&self, provider: &str, model: &str, retry_after_secs: f64) {
        self.update_from_429_at(provider, model, retry_after_secs, Utc::now());
    }

    pub fn update_from_429_at(
        &self,
        provider: &str,
        model: &str,
        retry_after_secs: f64,
        now: DateTime<Utc>,
    ) {
        let secs = if retry_after_secs.is_finite() && retry_after_secs >= 0.0 {
            retry_after_secs
        } else {
            DEFAULT_RETRY_AFTER_SECS
        };
        let millis = (secs * 1000.0).ceil().min(i64::MAX as f64 / 2.0) as i64;
        let candidate = now
            .checked_add_signed(Duration::milliseconds(millis))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut state = self
            .states
            .entry(ModelKey::new(provider, model))
            .or_default();
        let until = match state.cooldown_until {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        };
        state.cooldown_until = Some(until);

        tracing::info!(
            "[RateLimitTracker] {}/{} 触发限流，冷却至 {}",
            provider,
            model,
            until.to_rfc3339()
        );
    }

    /// 记录一次失败
    pub fn record_error(&self, provider: &str, model: &str) {
        self.record_error_at(provider, model, Utc::now());
    }

    pub fn record_error_at(&self, provider: &str, model: &str, now: DateTime<Utc>) {
        let mut state = self
            .states
            .entry(ModelKey::new(provider, model))
            .or_default();
        state.consecutive_errors = state.consecutive_errors.saturating_add(1);
        state.last_error_at = Some(now);

        if state.consecutive_errors == self.unhealthy_threshold {
            tracing::warn!(
                "[RateLimitTracker] {}/{} 连续失败 {} 次，标记为不健康",
                provider,
                model,
                state.consecutive_errors
            );
        } else {
            tracing::debug!(
                "[RateLimitTracker] {}/{} 失败 (consecutive_errors={})",
                provider,
                model,
                state.consecutive_errors
            );
        }
    }

    /// 记录一次成功，清零连续错误数
    pub fn record_success(&self, provider: &str, model: &str) {
        self.record_success_at(provider, model, Utc::now());
    }

    pub fn record_success_at(&self, provider: &str, model: &str, now: DateTime<Utc>) {
        let mut state = self
            .states
            .entry(ModelKey::new(provider, model))
            .or_default();
        if state.consecutive_errors >= self.unhealthy_threshold {
            tracing::info!("[RateLimitTracker] {}/{} 恢复健康", provider, model);
        }
        state.consecutive_errors = 0;
        state.last_success_at = Some(now);
    }

    /// 记录性能样本
    ///
    /// 只更新延迟窗口，不影响连续错误数；请求成功仍需调用 `record_success`。
    pub fn record_performance(&self, provider: &str, model: &str, sample: PerformanceSample) {
        let mut state = self
            .states
            .entry(ModelKey::new(provider, model))
            .or_default();
        state.samples.push_back(sample);
        while state.samples.len() > self.performance_window {
            state.samples.pop_front();
        }
    }

    /// 平均首 token 延迟（毫秒），无样本时为 None
    pub fn average_ttft(&self, provider: &str, model: &str) -> Option<f64> {
        self.states
            .get(&ModelKey::new(provider, model))
            .and_then(|state| state.average_ttft())
    }

    /// 设置每分钟 token 预算
    pub fn set_token_budget(&self, provider: &str, model: &str, tokens_per_minute: u32) {
        self.set_token_budget_at(provider, model, tokens_per_minute, Utc::now());
    }

    pub fn set_token_budget_at(
        &self,
        provider: &str,
        model: &str,
        tokens_per_minute: u32,
        now: DateTime<Utc>,
    ) {
        let mut state = self
            .states
            .entry(ModelKey::new(provider, model))
            .or_default();
        state.budget = Some(TokenBudget {
            tokens_per_minute: tokens_per_minute.max(1),
            window_start: now,
            used: 0,
        });
    }

    /// 记录实际消耗的 tokens（仅对设置了预算的模型生效）
    pub fn record_usage(&self, provider: &str, model: &str, tokens: u32) {
        self.record_usage_at(provider, model, tokens, Utc::now());
    }

    pub fn record_usage_at(&self, provider: &str, model: &str, tokens: u32, now: DateTime<Utc>) {
        if let Some(mut state) = self.states.get_mut(&ModelKey::new(provider, model)) {
            if let Some(budget) = state.budget.as_mut() {
                budget.consume(tokens, now);
            }
        }
    }

    /// 清除某个模型的全部状态
    pub fn clear(&self, provider: &str, model: &str) {
        self.states.remove(&ModelKey::new(provider, model));
    }

    /// 获取健康快照
    pub fn snapshot(&self, provider: &str, model: &str) -> Option<ModelHealth> {
        self.snapshot_at(provider, model, Utc::now())
    }

    pub fn snapshot_at(
        &self,
        provider: &str,
        model: &str,
        now: DateTime<Utc>,
    ) -> Option<ModelHealth> {
        self.states
            .get(&ModelKey::new(provider, model))
            .map(|state| ModelHealth {
                provider: provider.to_string(),
                model: model.to_string(),
                cooldown_until: state.cooldown_until,
                consecutive_errors: state.consecutive_errors,
                sample_count: state.samples.len(),
                average_ttft_ms: state.average_ttft(),
                healthy: state.consecutive_errors < self.unhealthy_threshold,
                rate_limited: state.in_cooldown(now),
                last_error_at: state.last_error_at,
                last_success_at: state.last_success_at,
            })
    }

    /// 汇总统计
    pub fn stats(&self) -> TrackerStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> TrackerStats {
        self.states
            .iter()
            .fold(TrackerStats::default(), |mut stats, entry| {
                stats.tracked += 1;
                if entry.value().in_cooldown(now) {
                    stats.cooling_down += 1;
                }
                if entry.value().consecutive_errors >= self.unhealthy_threshold {
                    stats.unhealthy += 1;
                }
                stats
            })
    }
}

/// 解析 retry-after 值（秒）
///
/// 支持纯数字（秒）以及 `500ms`、`1.5s`、`2m`、`1h` 形式。
pub fn parse_retry_after(value: &str) -> Option<f64> {
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        return None;
    }

    let (number, scale) = if let Some(n) = value.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = value.strip_suffix('h') {
        (n, 3600.0)
    } else {
        (value.as_str(), 1.0)
    };

    number
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n * scale)
}
