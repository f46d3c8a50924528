//! Server Implementation
//!
//! HTTP 服务器启动和管理

use crate::core::tasks::BackgroundTasks;
use crate::core::{Config, Result, ServerState};

/// HTTP Server
pub struct Server {
    config: Config,
    state: Option<ServerState>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Create server with existing state (for tests and embedded use)
    pub fn with_state(config: Config, state: ServerState) -> Self {
        Self {
            config,
            state: Some(state),
        }
    }

    pub async fn run(&self) -> Result<()> {
        // Create application state if not provided
        let state = match &self.state {
            Some(s) => s.clone(),
            None => ServerState::initialize(&self.config).await,
        };

        // Start background tasks; the registry stays visible to /health
        let mut tasks = BackgroundTasks::with_registry(state.tasks.clone());
        state.start_background_tasks(&mut tasks);
        tasks.log_summary();

        let app = crate::api::router(state.clone());

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(
            environment = %self.config.environment,
            offer_window_secs = self.config.offer_window_secs,
            scan_interval_secs = self.config.scan_interval_secs,
            "Dispatch server listening on {}",
            addr
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutting down...");
            })
            .await?;

        // HTTP loop exited, stop the scanner and friends
        let shutdown_timeout =
            std::time::Duration::from_millis(self.config.shutdown_timeout_ms);
        if tokio::time::timeout(shutdown_timeout, tasks.shutdown())
            .await
            .is_err()
        {
            tracing::warn!("Background tasks did not stop within the shutdown timeout");
        }

        Ok(())
    }
}
