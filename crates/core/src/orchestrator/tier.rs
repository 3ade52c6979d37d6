//! 模型分类等级
//!
//! 定义 Small/Large/Reasoning 三个粗粒度等级，以及请求分析结果到等级的映射。

use crate::analyzer::{RequestAnalysis, RequestType};
use crate::catalog::{Catalog, ModelEntry};
use serde::{Deserialize, Serialize};

/// 模型等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[derive(Default)]
pub enum ModelCategory {
    /// Small - 小模型，适合简单请求
    Small,
    /// Large - 通用大模型，适合复杂、创作和工具类请求
    #[default]
    Large,
    /// Reasoning - 推理模型，适合数学和多步推导
    Reasoning,
}

impl ModelCategory {
    /// 获取等级的显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelCategory::Small => "SMALL",
            ModelCategory::Large => "LARGE",
            ModelCategory::Reasoning => "REASONING",
        }
    }

    /// 获取等级的描述
    pub fn description(&self) -> &'static str {
        match self {
            ModelCategory::Small => "快速廉价，适合简单问答",
            ModelCategory::Large => "均衡能力，适合大多数任务",
            ModelCategory::Reasoning => "推理专长，适合多步推导",
        }
    }

    /// 获取等级的数值（用于排序和距离计算）
    pub fn level(&self) -> u8 {
        match self {
            ModelCategory::Small => 1,
            ModelCategory::Large => 2,
            ModelCategory::Reasoning => 3,
        }
    }

    /// 能力权重，用于 balanced / powerful 评分
    pub fn capability(&self) -> f64 {
        match self {
            ModelCategory::Small => 1.0,
            ModelCategory::Large => 3.0,
            ModelCategory::Reasoning => 4.0,
        }
    }

    /// 从字符串解析，无法识别时返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "small" | "mini" | "fast" => Some(ModelCategory::Small),
            "large" | "pro" | "general" => Some(ModelCategory::Large),
            "reasoning" | "max" | "thinking" => Some(ModelCategory::Reasoning),
            _ => None,
        }
    }

    /// 根据模型名称推断等级（目录缺失 category 时使用）
    pub fn infer_from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        const REASONING_MARKERS: [&str; 7] = ["o1", "o3", "o4", "r1", "reason", "think", "qwq"];
        const SMALL_MARKERS: [&str; 9] = [
            "mini", "nano", "1b", "3b", "8b", "haiku", "flash", "small", "tiny",
        ];

        if REASONING_MARKERS.iter().any(|m| name_has_marker(&lower, m)) {
            ModelCategory::Reasoning
        } else if SMALL_MARKERS.iter().any(|m| name_has_marker(&lower, m)) {
            ModelCategory::Small
        } else {
            ModelCategory::Large
        }
    }

    /// 获取所有等级
    pub fn all() -> &'static [ModelCategory] {
        &[
            ModelCategory::Small,
            ModelCategory::Large,
            ModelCategory::Reasoning,
        ]
    }
}

impl std::fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// 短标记必须作为独立片段出现，避免 "pro1" 误判为 "o1"、"gemini" 误判为 "mini"
fn name_has_marker(name: &str, marker: &str) -> bool {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|segment| segment == marker || (marker.len() >= 5 && segment.contains(marker)))
}

/// 模型分类器
///
/// 纯映射，无状态。
pub struct ModelCategorizer;

impl ModelCategorizer {
    /// 请求分析结果 -> 目标等级
    ///
    /// 推理需求优先级最高，覆盖其它任何等级。
    pub fn category_for(analysis: &RequestAnalysis) -> ModelCategory {
        if analysis.requires_reasoning {
            return ModelCategory::Reasoning;
        }
        match analysis.request_type {
            RequestType::Simple => ModelCategory::Small,
            RequestType::Complex | RequestType::Creative | RequestType::ToolHeavy => {
                ModelCategory::Large
            }
            RequestType::Reasoning => ModelCategory::Reasoning,
        }
    }

    /// 获取目录中指定等级的模型
    pub fn models_in_category(catalog: &Catalog, category: ModelCategory) -> Vec<ModelEntry> {
        catalog
            .models()
            .iter()
            .filter(|m| m.category == category)
            .cloned()
            .collect()
    }
}

/// 按等级分组的候选池
#[derive(Debug, Clone, Default)]
pub struct CategoryPool {
    /// Small 等级候选
    pub small: Vec<ModelEntry>,
    /// Large 等级候选
    pub large: Vec<ModelEntry>,
    /// Reasoning 等级候选
    pub reasoning: Vec<ModelEntry>,
}

impl CategoryPool {
    /// 创建新的候选池
    pub fn new() -> Self {
        Self::default()
    }

    /// 从模型列表构建候选池
    pub fn from_models<'a>(models: impl IntoIterator<Item = &'a ModelEntry>) -> Self {
        let mut pool = Self::new();
        for model in models {
            pool.add(model.clone());
        }
        pool
    }

    /// 获取指定等级的候选列表
    pub fn get(&self, category: ModelCategory) -> &[ModelEntry] {
        match category {
            ModelCategory::Small => &self.small,
            ModelCategory::Large => &self.large,
            ModelCategory::Reasoning => &self.reasoning,
        }
    }

    fn get_mut(&mut self, category: ModelCategory) -> &mut Vec<ModelEntry> {
        match category {
            ModelCategory::Small => &mut self.small,
            ModelCategory::Large => &mut self.large,
            ModelCategory::Reasoning => &mut self.reasoning,
        }
    }

    /// 按模型自身等级加入候选池
    pub fn add(&mut self, model: ModelEntry) {
        self.get_mut(model.category).push(model);
    }

    /// 候选总数
    pub fn total_count(&self) -> usize {
        self.small.len() + self.large.len() + self.reasoning.len()
    }

    /// 检查是否为空
    pub fn is_empty(&self) -> bool {
        self.small.is_empty() && self.large.is_empty() && self.reasoning.is_empty()
    }
}
