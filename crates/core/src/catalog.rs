//! 模型目录
//!
//! 目录由外部配置文档提供，进程内只读。本模块只负责解析和归一化：
//! 缺失的 `context_window`、`pricing`、`category` 不会导致选择失败，
//! 而是替换为保守的默认值。
//!
//! 支持两种文档形态：
//!
//! ```yaml
//! providers:
//!   groq:
//!     models:
//!       llama-3.2-1b: { context_window: 8192, free: true, category: small }
//! ```
//!
//! 以及省略 `providers` / `models` 的简写形态：
//!
//! ```yaml
//! groq:
//!   llama-3.2-1b: { context_window: 8192, free: true, category: small }
//! ```

use crate::errors::{RoutingError, RoutingResult};
use crate::orchestrator::ModelCategory;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// 缺失 context_window 时的保守默认值
pub const DEFAULT_CONTEXT_WINDOW: u32 = 4096;

/// 价格（每百万 tokens）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pricing {
    /// 输入价格
    pub input: f64,
    /// 输出价格
    pub output: f64,
}

impl Pricing {
    /// 创建价格
    pub fn new(input: f64, output: f64) -> Self {
        Self { input, output }.sanitized()
    }

    /// 免费价格
    pub fn free() -> Self {
        Self::default()
    }

    /// 输入输出价格之和
    pub fn blended(&self) -> f64 {
        self.input + self.output
    }

    /// 是否零价格
    pub fn is_zero(&self) -> bool {
        self.input == 0.0 && self.output == 0.0
    }

    /// 负数和 NaN 价格归零
    fn sanitized(self) -> Self {
        let clean = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        Self {
            input: clean(self.input),
            output: clean(self.output),
        }
    }
}

/// 目录中的单个模型
///
/// 归一化后的只读条目，引擎从不修改它。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Provider 标识
    pub provider: String,
    /// 模型名称
    pub name: String,
    /// 上下文窗口（tokens）
    pub context_window: u32,
    /// 价格，None 表示目录未提供
    pub pricing: Option<Pricing>,
    /// 等级
    pub category: ModelCategory,
    /// 是否免费
    pub free: bool,
}

impl ModelEntry {
    /// 创建模型条目，零价格视为免费
    pub fn new(
        provider: &str,
        name: &str,
        context_window: u32,
        pricing: Pricing,
        category: ModelCategory,
    ) -> Self {
        let pricing = pricing.sanitized();
        Self {
            provider: provider.to_string(),
            name: name.to_string(),
            context_window: context_window.max(1),
            free: pricing.is_zero(),
            pricing: Some(pricing),
            category,
        }
    }

    /// 设置免费标记（免费额度模型可能带有名义价格）
    pub fn with_free(mut self, free: bool) -> Self {
        self.free = free;
        self
    }

    /// `provider/name` 形式的唯一键
    pub fn key(&self) -> String {
        format!("{}/{}", self.provider, self.name)
    }

    /// 是否匹配 `provider/name` 或裸模型名
    pub fn matches(&self, id: &str) -> bool {
        match id.split_once('/') {
            Some((provider, name)) => self.provider == provider && self.name == name,
            None => self.name == id,
        }
    }

    /// 用于排序的综合价格
    ///
    /// 目录没有价格时按模型家族估算，与免费模型区分开。
    pub fn blended_price(&self) -> f64 {
        match self.pricing {
            Some(pricing) => pricing.blended(),
            None => estimate_price_from_name(&self.name, self.category),
        }
    }

    /// 名称是否表明推理专长
    pub fn is_reasoning_specialized(&self) -> bool {
        ModelCategory::infer_from_name(&self.name) == ModelCategory::Reasoning
    }
}

/// 无价格信息时按家族估算（每百万 tokens，输入+输出）
fn estimate_price_from_name(name: &str, category: ModelCategory) -> f64 {
    let lower = name.to_lowercase();

    if lower.contains("haiku") || lower.contains("flash") || lower.contains("-mini") {
        1.0
    } else if lower.contains("sonnet") || lower.contains("pro") {
        18.0
    } else if lower.contains("opus") || lower.contains("ultra") || lower.contains("o1") {
        90.0
    } else {
        match category {
            ModelCategory::Small => 1.0,
            ModelCategory::Large => 10.0,
            ModelCategory::Reasoning => 60.0,
        }
    }
}

/// 目录文档中的价格字段（宽松解析）
#[derive(Debug, Clone, Default, Deserialize)]
struct PricingSpec {
    #[serde(default, deserialize_with = "lenient_f64")]
    input: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    output: Option<f64>,
}

/// 目录文档中的模型字段，全部可选
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelSpec {
    #[serde(default, alias = "contextWindow", deserialize_with = "lenient_f64")]
    context_window: Option<f64>,
    #[serde(default, deserialize_with = "lenient_pricing")]
    pricing: Option<PricingSpec>,
    #[serde(default, deserialize_with = "lenient_string")]
    category: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    free: Option<bool>,
}

impl ModelSpec {
    /// 归一化为 ModelEntry
    pub fn into_entry(self, provider: &str, name: &str) -> ModelEntry {
        let context_window = self
            .context_window
            .filter(|v| v.is_finite() && *v >= 1.0)
            .map(|v| v.min(u32::MAX as f64) as u32)
            .unwrap_or(DEFAULT_CONTEXT_WINDOW);

        let pricing = self.pricing.and_then(|p| match (p.input, p.output) {
            (None, None) => None,
            (input, output) => Some(Pricing::new(input.unwrap_or(0.0), output.unwrap_or(0.0))),
        });

        let category = self
            .category
            .as_deref()
            .and_then(ModelCategory::parse)
            .unwrap_or_else(|| ModelCategory::infer_from_name(name));

        let free = self
            .free
            .unwrap_or_else(|| pricing.map(|p| p.is_zero()).unwrap_or(false));

        ModelEntry {
            provider: provider.to_string(),
            name: name.to_string(),
            context_window,
            pricing,
            category,
            free,
        }
    }
}

/// 数字或数字字符串，其它类型视为缺失
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }))
}

/// 类型不对的字段按缺失处理，不让单个字段毁掉整个目录
fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Bool(b) => Some(b),
        serde_json::Value::String(s) => s.trim().to_lowercase().parse::<bool>().ok(),
        _ => None,
    }))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    }))
}

fn lenient_pricing<'de, D>(deserializer: D) -> Result<Option<PricingSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .filter(serde_json::Value::is_object)
        .and_then(|v| serde_json::from_value(v).ok()))
}

#[derive(Debug, Deserialize)]
struct ProviderSpec {
    #[serde(default)]
    models: IndexMap<String, ModelSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Nested {
        providers: IndexMap<String, ProviderSpec>,
    },
    Flat(IndexMap<String, IndexMap<String, ModelSpec>>),
}

impl CatalogDocument {
    fn into_providers(self) -> IndexMap<String, IndexMap<String, ModelSpec>> {
        match self {
            CatalogDocument::Nested { providers } => providers
                .into_iter()
                .map(|(name, spec)| (name, spec.models))
                .collect(),
            CatalogDocument::Flat(providers) => providers,
        }
    }
}

/// 模型目录
///
/// 按文档顺序保存所有模型，保证排序打平时结果确定。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Catalog {
    models: Vec<ModelEntry>,
}

impl Catalog {
    /// 从已归一化的条目创建目录
    pub fn new(models: Vec<ModelEntry>) -> Self {
        Self { models }
    }

    /// 从 provider -> model -> spec 映射创建目录
    pub fn from_providers(providers: IndexMap<String, IndexMap<String, ModelSpec>>) -> Self {
        let models = providers
            .into_iter()
            .flat_map(|(provider, models)| {
                models
                    .into_iter()
                    .map(move |(name, spec)| spec.into_entry(&provider, &name))
            })
            .collect::<Vec<_>>();

        tracing::debug!("[ModelCatalog] 已加载 {} 个模型", models.len());
        Self { models }
    }

    /// 解析 JSON 目录文档
    pub fn from_json_str(content: &str) -> RoutingResult<Self> {
        let doc: CatalogDocument = serde_json::from_str(content)
            .map_err(|e| RoutingError::CatalogParse(format!("解析 JSON 目录失败: {e}")))?;
        Ok(Self::from_providers(doc.into_providers()))
    }

    /// 解析 YAML 目录文档
    pub fn from_yaml_str(content: &str) -> RoutingResult<Self> {
        let doc: CatalogDocument = serde_yaml::from_str(content)
            .map_err(|e| RoutingError::CatalogParse(format!("解析 YAML 目录失败: {e}")))?;
        Ok(Self::from_providers(doc.into_providers()))
    }

    /// 所有模型
    pub fn models(&self) -> &[ModelEntry] {
        &self.models
    }

    /// 模型数量
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// 查找模型
    pub fn find(&self, provider: &str, name: &str) -> Option<&ModelEntry> {
        self.models
            .iter()
            .find(|m| m.provider == provider && m.name == name)
    }

    /// 所有 provider（按首次出现顺序去重）
    pub fn providers(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for model in &self.models {
            if !seen.contains(&model.provider.as_str()) {
                seen.push(&model.provider);
            }
        }
        seen
    }

    /// 最大上下文窗口，空目录为 0
    pub fn largest_context_window(&self) -> u32 {
        self.models
            .iter()
            .map(|m| m.context_window)
            .max()
            .unwrap_or(0)
    }
}

impl FromIterator<ModelEntry> for Catalog {
    fn from_iter<T: IntoIterator<Item = ModelEntry>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
