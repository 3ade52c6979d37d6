//! 路由错误模型
//!
//! 选择引擎只把少数几种错误交给调用方：上下文窗口不足、全部模型限流、
//! 过滤后无可用模型，以及目录/配置解析失败。
//! 其它异常（缺失字段、未知策略、非数字 token 数）在内部归一化为安全默认值。

use crate::orchestrator::ModelCategory;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 稳定的错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingErrorCode {
    ContextWindowExceeded,
    AllModelsRateLimited,
    NoAvailableModels,
    InvalidPreferences,
    InvalidCatalog,
    InvalidConfig,
}

impl RoutingErrorCode {
    /// 默认错误文案
    pub fn default_message(self) -> &'static str {
        match self {
            Self::ContextWindowExceeded => "请求超出所有模型的上下文窗口",
            Self::AllModelsRateLimited => "所有模型均处于限流冷却中",
            Self::NoAvailableModels => "过滤后没有可用模型",
            Self::InvalidPreferences => "选择偏好无效",
            Self::InvalidCatalog => "模型目录格式无效",
            Self::InvalidConfig => "路由配置格式无效",
        }
    }

    /// 是否值得稍后重试
    pub fn retryable(self) -> bool {
        matches!(self, Self::AllModelsRateLimited | Self::NoAvailableModels)
    }
}

/// 路由错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    #[error("no model has sufficient context window: need {required} tokens, largest is {largest}")]
    ContextWindowExceeded { required: u32, largest: u32 },

    #[error("all models rate limited ({checked} candidates in cooldown)")]
    AllModelsRateLimited { checked: usize },

    #[error("no available models for category {category} after filtering")]
    NoAvailableModels { category: ModelCategory },

    #[error("invalid preferences: {0}")]
    InvalidPreferences(String),

    #[error("invalid catalog: {0}")]
    CatalogParse(String),

    #[error("invalid config: {0}")]
    ConfigParse(String),
}

pub type RoutingResult<T> = Result<T, RoutingError>;

impl RoutingError {
    /// 获取错误码
    pub fn code(&self) -> RoutingErrorCode {
        match self {
            Self::ContextWindowExceeded { .. } => RoutingErrorCode::ContextWindowExceeded,
            Self::AllModelsRateLimited { .. } => RoutingErrorCode::AllModelsRateLimited,
            Self::NoAvailableModels { .. } => RoutingErrorCode::NoAvailableModels,
            Self::InvalidPreferences(_) => RoutingErrorCode::InvalidPreferences,
            Self::CatalogParse(_) => RoutingErrorCode::InvalidCatalog,
            Self::ConfigParse(_) => RoutingErrorCode::InvalidConfig,
        }
    }

    /// 致命错误不会因为换一个模型而恢复
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ContextWindowExceeded { .. } | Self::AllModelsRateLimited { .. }
        )
    }

    /// 是否应以 4xx 形式返回给客户端
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ContextWindowExceeded { .. } | Self::InvalidPreferences(_)
        )
    }
}
