//! 路由配置
//!
//! 所有字段都有默认值，配置文件只需写出要覆盖的部分。
//! 支持 YAML 和 JSON 两种格式，文件不存在时返回默认配置。

use crate::analyzer::{AnalyzerConfig, RequestType};
use crate::errors::{RoutingError, RoutingResult};
use crate::orchestrator::{FallbackPolicy, OptimizationStrategy};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 连续错误达到该值后模型被视为不健康
pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 5;
/// 性能样本窗口大小
pub const DEFAULT_PERFORMANCE_WINDOW: usize = 20;
/// 未知 provider 的首 token 延迟基线（毫秒）
pub const DEFAULT_LATENCY_MS: u64 = 1000;

/// 输出 token 预留配置
///
/// 预留值 = 请求类型基数 × 策略倍率；调用方显式给出 max_tokens 时直接使用。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputTokenConfig {
    pub simple: u32,
    pub complex: u32,
    pub creative: u32,
    pub tool_heavy: u32,
    pub reasoning: u32,
    pub cheap_multiplier: f64,
    pub cost_optimized_multiplier: f64,
    pub fastest_multiplier: f64,
    pub balanced_multiplier: f64,
    pub powerful_multiplier: f64,
}

impl Default for OutputTokenConfig {
    fn default() -> Self {
        Self {
            simple: 1024,
            complex: 4096,
            creative: 4096,
            tool_heavy: 4096,
            reasoning: 8192,
            cheap_multiplier: 0.5,
            cost_optimized_multiplier: 0.5,
            fastest_multiplier: 0.75,
            balanced_multiplier: 1.0,
            powerful_multiplier: 2.0,
        }
    }
}

impl OutputTokenConfig {
    /// 请求类型对应的基数
    pub fn base(&self, request_type: RequestType) -> u32 {
        match request_type {
            RequestType::Simple => self.simple,
            RequestType::Complex => self.complex,
            RequestType::Creative => self.creative,
            RequestType::ToolHeavy => self.tool_heavy,
            RequestType::Reasoning => self.reasoning,
        }
    }

    /// 策略对应的倍率
    pub fn multiplier(&self, strategy: OptimizationStrategy) -> f64 {
        let value = match strategy {
            OptimizationStrategy::Cheap => self.cheap_multiplier,
            OptimizationStrategy::CostOptimized => self.cost_optimized_multiplier,
            OptimizationStrategy::Fastest => self.fastest_multiplier,
            OptimizationStrategy::Balanced => self.balanced_multiplier,
            OptimizationStrategy::Powerful => self.powerful_multiplier,
        };
        if value.is_finite() && value > 0.0 {
            value
        } else {
            1.0
        }
    }

    /// 计算预留输出 tokens，至少为 1
    pub fn allocate(
        &self,
        request_type: RequestType,
        strategy: OptimizationStrategy,
        max_tokens: Option<u32>,
    ) -> u32 {
        if let Some(requested) = max_tokens.filter(|t| *t > 0) {
            return requested;
        }
        let scaled = (self.base(request_type) as f64 * self.multiplier(strategy)).round();
        (scaled.min(u32::MAX as f64) as u32).max(1)
    }
}

/// 单个模型的每分钟 token 预算
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudgetConfig {
    pub provider: String,
    pub model: String,
    pub tokens_per_minute: u32,
}

/// 路由配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// 不健康阈值（连续错误数）
    pub unhealthy_threshold: u32,
    /// 性能样本窗口大小
    pub performance_window: usize,
    /// 每 token 字符数
    pub chars_per_token: u32,
    /// 每条消息的 token 开销
    pub message_overhead_tokens: u32,
    /// token 估算下限
    pub min_token_estimate: u32,
    /// 输出 token 预留
    pub output_tokens: OutputTokenConfig,
    /// provider 首 token 延迟基线（毫秒），无性能样本时 fastest 策略使用
    pub provider_latency_ms: IndexMap<String, u64>,
    /// 未知 provider 的延迟基线
    pub default_latency_ms: u64,
    /// 每分钟 token 预算
    pub token_budgets: Vec<TokenBudgetConfig>,
    /// 严格过滤失败后是否允许绕过健康检查
    pub allow_health_bypass: bool,
    /// 默认策略
    pub default_strategy: OptimizationStrategy,
}

fn default_provider_latency() -> IndexMap<String, u64> {
    [
        ("groq", 150),
        ("cerebras", 150),
        ("sambanova", 250),
        ("fireworks", 300),
        ("together", 350),
        ("mistral", 450),
        ("openai", 500),
        ("deepseek", 600),
        ("google", 600),
        ("gemini", 600),
        ("anthropic", 700),
        ("openrouter", 800),
    ]
    .into_iter()
    .map(|(provider, ms)| (provider.to_string(), ms))
    .collect()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: DEFAULT_UNHEALTHY_THRESHOLD,
            performance_window: DEFAULT_PERFORMANCE_WINDOW,
            chars_per_token: 4,
            message_overhead_tokens: 4,
            min_token_estimate: 1,
            output_tokens: OutputTokenConfig::default(),
            provider_latency_ms: default_provider_latency(),
            default_latency_ms: DEFAULT_LATENCY_MS,
            token_budgets: Vec::new(),
            allow_health_bypass: true,
            default_strategy: OptimizationStrategy::Balanced,
        }
    }
}

impl RouterConfig {
    /// 解析 YAML 配置
    pub fn from_yaml_str(content: &str) -> RoutingResult<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| RoutingError::ConfigParse(format!("解析 YAML 配置失败: {e}")))?;
        Ok(config.normalized())
    }

    /// 解析 JSON 配置
    pub fn from_json_str(content: &str) -> RoutingResult<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| RoutingError::ConfigParse(format!("解析 JSON 配置失败: {e}")))?;
        Ok(config.normalized())
    }

    /// 从文件加载，扩展名为 .json 时按 JSON 解析，其余按 YAML
    pub fn load(path: &Path) -> RoutingResult<Self> {
        if !path.exists() {
            tracing::info!("[RouterConfig] 配置文件不存在，使用默认配置: {:?}", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| RoutingError::ConfigParse(format!("读取配置文件失败: {e}")))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// 把退化值钳制到安全下限
    pub fn normalized(mut self) -> Self {
        self.unhealthy_threshold = self.unhealthy_threshold.max(1);
        self.performance_window = self.performance_window.max(1);
        self.chars_per_token = self.chars_per_token.max(1);
        self.min_token_estimate = self.min_token_estimate.max(1);
        if self.default_latency_ms == 0 {
            self.default_latency_ms = DEFAULT_LATENCY_MS;
        }
        self
    }

    /// 分析器参数
    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            chars_per_token: self.chars_per_token,
            message_overhead_tokens: self.message_overhead_tokens,
            min_token_estimate: self.min_token_estimate,
            ..AnalyzerConfig::default()
        }
    }

    /// provider 的延迟基线
    pub fn latency_baseline_ms(&self, provider: &str) -> u64 {
        self.provider_latency_ms
            .get(&provider.to_lowercase())
            .copied()
            .unwrap_or(self.default_latency_ms)
    }

    /// `select_with_fallback` 使用的降级策略
    pub fn fallback_policy(&self) -> FallbackPolicy {
        if self.allow_health_bypass {
            FallbackPolicy::HealthBypass
        } else {
            FallbackPolicy::NextCategory
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.unhealthy_threshold, 5);
        assert_eq!(config.default_strategy, OptimizationStrategy::Balanced);
        assert_eq!(config.latency_baseline_ms("groq"), 150);
        assert_eq!(config.latency_baseline_ms("unknown"), DEFAULT_LATENCY_MS);
        assert_eq!(config.fallback_policy(), FallbackPolicy::HealthBypass);
    }

    #[test]
    fn test_partial_yaml_override() {
        let yaml = r#"
unhealthy_threshold: 3
default_strategy: speed
token_budgets:
  - provider: groq
    model: llama-3.2-1b
    tokens_per_minute: 6000
"#;
        let config = RouterConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.unhealthy_threshold, 3);
        assert_eq!(config.default_strategy, OptimizationStrategy::Fastest);
        assert_eq!(config.token_budgets.len(), 1);
        // 未覆盖的字段保持默认值
        assert_eq!(config.performance_window, DEFAULT_PERFORMANCE_WINDOW);
    }

    #[test]
    fn test_degenerate_values_normalized() {
        let config =
            RouterConfig::from_json_str(r#"{"unhealthy_threshold": 0, "chars_per_token": 0}"#)
                .unwrap();
        assert_eq!(config.unhealthy_threshold, 1);
        assert_eq!(config.chars_per_token, 1);
    }

    #[test]
    fn test_invalid_config() {
        let err = RouterConfig::from_json_str(r#"{"unhealthy_threshold": "many"}"#).unwrap_err();
        assert!(matches!(err, RoutingError::ConfigParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "allow_health_bypass: false").unwrap();
        let config = RouterConfig::load(file.path()).unwrap();
        assert!(!config.allow_health_bypass);
        assert_eq!(config.fallback_policy(), FallbackPolicy::NextCategory);

        let missing = RouterConfig::load(Path::new("/nonexistent/routecast.yaml")).unwrap();
        assert_eq!(missing, RouterConfig::default());
    }

    #[test]
    fn test_output_allocation_monotonic() {
        let tokens = OutputTokenConfig::default();
        let cheap = tokens.allocate(RequestType::Simple, OptimizationStrategy::Cheap, None);
        let balanced = tokens.allocate(RequestType::Simple, OptimizationStrategy::Balanced, None);
        let powerful = tokens.allocate(RequestType::Simple, OptimizationStrategy::Powerful, None);
        assert!(cheap < balanced && balanced < powerful);

        let simple = tokens.allocate(RequestType::Simple, OptimizationStrategy::Balanced, None);
        let complex = tokens.allocate(RequestType::Complex, OptimizationStrategy::Balanced, None);
        let reasoning =
            tokens.allocate(RequestType::Reasoning, OptimizationStrategy::Balanced, None);
        assert!(simple < complex && complex < reasoning);

        // 显式 max_tokens 优先，0 视为未设置
        assert_eq!(
            tokens.allocate(RequestType::Simple, OptimizationStrategy::Cheap, Some(300)),
            300
        );
        assert_eq!(
            tokens.allocate(RequestType::Simple, OptimizationStrategy::Cheap, Some(0)),
            cheap
        );
    }
}
