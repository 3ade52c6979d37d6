//! 错误类型模块
//!
//! 定义路由引擎向调用方暴露的错误类型。
//!
//! ## 模块结构
//! - `routing_error`: 选择/降级过程中的错误（RoutingError, RoutingErrorCode）

pub mod routing_error;

pub use routing_error::{RoutingError, RoutingErrorCode, RoutingResult};
