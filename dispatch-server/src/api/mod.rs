//! API 路由模块
//!
//! # 结构
//!
//! - [`health`] - 健康检查
//! - [`interventions`] - 工单管理接口 (创建、查询、取消、状态推进)
//! - [`dispatch`] - 派单接口 (接受/拒绝 offer、超时扫描)
//! - [`payments`] - 支付授权接口 (授权、释放)

pub mod dispatch;
pub mod health;
pub mod interventions;
pub mod payments;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::ServerState;

// Re-export common types for handlers
pub use crate::utils::{AppResponse, AppResult};

/// Compose the full application router
pub fn router(state: ServerState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(interventions::router())
        .merge(dispatch::router())
        .merge(payments::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
