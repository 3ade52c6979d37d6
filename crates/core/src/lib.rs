//! 模型选择与限流感知路由引擎
//!
//! 包含请求分析、模型目录、限流跟踪和模型编排。
//! 不做任何网络 I/O：调用方在真实请求结束后把结果回报给 `RateLimitTracker`。

pub mod analyzer;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod rate_limit;

pub use analyzer::{
    ChatMessage, MessageRole, RequestAnalysis, RequestAnalyzer, RequestType, ToolDeclaration,
};
pub use catalog::{Catalog, ModelEntry, Pricing};
pub use config::RouterConfig;
pub use errors::{RoutingError, RoutingErrorCode, RoutingResult};
pub use orchestrator::{
    ModelCategory, ModelSelector, OptimizationStrategy, Preferences, RoundRobinSelector,
    SelectionRequest, SelectionResult,
};
pub use rate_limit::{PerformanceSample, RateLimitTracker};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
