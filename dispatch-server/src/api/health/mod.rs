//! 健康检查路由
//!
//! # 路由列表
//!
//! | 路径 | 方法 | 说明 | 认证 |
//! |------|------|------|------|
//! | /health | GET | 健康检查 | 无 |
//!
//! # 响应示例
//!
//! ```json
//! {
//!   "status": "healthy",
//!   "version": "0.1.0",
//!   "uptime_seconds": 42,
//!   "environment": "development",
//!   "failed_background_tasks": 0
//! }
//! ```

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use std::time::SystemTime;

use crate::core::ServerState;

/// 健康检查路由 - 公共路由 (无需认证)
pub fn router() -> Router<ServerState> {
    Router::new().route("/health", get(health))
}

/// 健康检查响应
#[derive(Serialize)]
pub struct HealthResponse {
    /// 状态 (healthy | degraded)
    status: &'static str,
    /// 版本号
    version: &'static str,
    /// 运行时间 (秒)
    uptime_seconds: u64,
    /// 运行环境
    environment: String,
    /// 异常终止的后台任务数
    failed_background_tasks: usize,
}

// 服务器启动时间 (懒加载静态变量)
static START_TIME: std::sync::OnceLock<SystemTime> = std::sync::OnceLock::new();

fn get_uptime_seconds() -> u64 {
    let start = START_TIME.get_or_init(SystemTime::now);
    SystemTime::now()
        .duration_since(*start)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 基础健康检查
pub async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    // 数据库句柄存在即视为健康；redb 没有连接可断。
    // 后台任务死亡时报告 degraded，进程仍能服务请求。
    let failed_background_tasks = state.tasks.check_health();
    Json(HealthResponse {
        status: if failed_background_tasks == 0 {
            "healthy"
        } else {
            "degraded"
        },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: get_uptime_seconds(),
        environment: state.config.environment.clone(),
        failed_background_tasks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BackgroundTasks, Config, TaskKind};
    use crate::dispatch::selector::StaticRoster;
    use crate::dispatch::storage::DispatchStorage;
    use crate::payments::SandboxProvider;
    use std::sync::Arc;

    fn test_state() -> ServerState {
        let config = Config {
            work_dir: "/tmp/unused".into(),
            http_port: 0,
            environment: "development".into(),
            offer_window_secs: 120,
            scan_interval_secs: 3600,
            technician_roster: vec![],
            shutdown_timeout_ms: 1000,
        };
        ServerState::new(
            config,
            DispatchStorage::open_in_memory().unwrap(),
            Arc::new(StaticRoster::new(vec![])),
            Arc::new(SandboxProvider::new()),
        )
    }

    #[tokio::test]
    async fn health_is_healthy_with_no_dead_tasks() {
        let response = health(State(test_state())).await;
        assert_eq!(response.0.status, "healthy");
        assert_eq!(response.0.failed_background_tasks, 0);
    }

    #[tokio::test]
    async fn health_reports_degraded_when_a_background_task_died() {
        let state = test_state();
        let mut tasks = BackgroundTasks::with_registry(state.tasks.clone());
        tasks.spawn("short_lived", TaskKind::Worker, async {});
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let response = health(State(state)).await;
        assert_eq!(response.0.status, "degraded");
        assert_eq!(response.0.failed_background_tasks, 1);
        tasks.shutdown().await;
    }
}
