use std::sync::Arc;
use std::time::Duration;

use crate::core::Config;
use crate::core::tasks::{BackgroundTasks, TaskKind, TaskRegistry};
use crate::dispatch::orchestrator::DispatchOrchestrator;
use crate::dispatch::scanner::TimeoutScanner;
use crate::dispatch::selector::{CandidateSelector, StaticRoster};
use crate::dispatch::storage::DispatchStorage;
use crate::feed::FeedEmitter;
use crate::payments::{PaymentManager, PaymentProvider, SandboxProvider};

/// 服务器状态 - 持有所有服务的单例引用
///
/// ServerState 是调度节点的核心数据结构，持有所有服务的共享引用。
/// 使用 Arc 实现浅拷贝，所有权成本极低。
///
/// # 服务组件
///
/// | 字段 | 类型 | 说明 |
/// |------|------|------|
/// | config | Config | 配置项 (不可变) |
/// | storage | DispatchStorage | 嵌入式数据库 (redb) |
/// | orchestrator | Arc<DispatchOrchestrator> | 派单编排器 |
/// | payments | Arc<PaymentManager> | 支付授权管理器 |
/// | feed | FeedEmitter | 变更事件广播 |
/// | tasks | TaskRegistry | 后台任务健康视图 (/health) |
///
/// # 使用示例
///
/// ```ignore
/// let state = ServerState::initialize(&config).await;
/// let mut tasks = BackgroundTasks::new();
/// state.start_background_tasks(&mut tasks);
/// ```
#[derive(Clone)]
pub struct ServerState {
    /// 服务器配置
    pub config: Config,
    /// 嵌入式数据库 (redb)
    pub storage: DispatchStorage,
    /// 派单编排器
    pub orchestrator: Arc<DispatchOrchestrator>,
    /// 支付授权管理器
    pub payments: Arc<PaymentManager>,
    /// 变更事件广播
    pub feed: FeedEmitter,
    /// 后台任务健康视图
    pub tasks: TaskRegistry,
}

impl ServerState {
    /// 创建服务器状态 (手动构造)
    ///
    /// 通常使用 [`ServerState::initialize()`] 方法代替；测试用它注入
    /// 内存数据库和自定义 provider/selector。
    pub fn new(
        config: Config,
        storage: DispatchStorage,
        selector: Arc<dyn CandidateSelector>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        let feed = FeedEmitter::new();
        let orchestrator = Arc::new(DispatchOrchestrator::new(
            storage.clone(),
            selector,
            feed.clone(),
            config.offer_window_ms(),
        ));
        let payments = Arc::new(PaymentManager::new(
            storage.clone(),
            provider,
            feed.clone(),
        ));
        Self {
            config,
            storage,
            orchestrator,
            payments,
            feed,
            tasks: TaskRegistry::default(),
        }
    }

    /// 初始化服务器状态
    ///
    /// 按顺序初始化：
    /// 1. 工作目录结构 (确保目录存在)
    /// 2. 数据库 (work_dir/database/dispatch.db)
    /// 3. 技师选择器 (静态名单，来自配置)
    /// 4. 支付 provider (沙箱实现)
    ///
    /// # Panics
    ///
    /// 工作目录或数据库初始化失败时 panic
    pub async fn initialize(config: &Config) -> Self {
        config
            .ensure_work_dir_structure()
            .expect("Failed to create work directory structure");

        let db_path = config.database_dir().join("dispatch.db");
        let storage =
            DispatchStorage::open(&db_path).expect("Failed to initialize dispatch database");
        tracing::info!(path = %db_path.display(), "Dispatch database opened");

        if config.technician_roster.is_empty() {
            tracing::warn!(
                "TECHNICIAN_ROSTER is empty; every new intervention will be flagged for manual dispatch"
            );
        }
        let selector = Arc::new(StaticRoster::new(config.technician_roster.clone()));
        let provider = Arc::new(SandboxProvider::new());

        Self::new(config.clone(), storage, selector, provider)
    }

    /// 启动后台任务
    ///
    /// 必须在 `Server::run()` 之前调用
    ///
    /// 启动的任务：
    /// - 超时扫描器 (TimeoutScanner, Periodic)
    pub fn start_background_tasks(&self, tasks: &mut BackgroundTasks) {
        let scanner = TimeoutScanner::new(
            self.orchestrator.clone(),
            tasks.shutdown_token(),
            Duration::from_secs(self.config.scan_interval_secs),
        );
        tasks.spawn("timeout_scanner", TaskKind::Periodic, scanner.run());
    }

    /// 获取派单编排器
    pub fn orchestrator(&self) -> &Arc<DispatchOrchestrator> {
        &self.orchestrator
    }

    /// 获取支付管理器
    pub fn payments(&self) -> &Arc<PaymentManager> {
        &self.payments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_wires_scanner_as_periodic_task() {
        let config = Config {
            work_dir: "/tmp/unused".into(),
            http_port: 0,
            environment: "development".into(),
            offer_window_secs: 120,
            scan_interval_secs: 3600,
            technician_roster: vec!["t-1".into()],
            shutdown_timeout_ms: 1000,
        };
        let storage = DispatchStorage::open_in_memory().unwrap();
        let state = ServerState::new(
            config,
            storage,
            Arc::new(StaticRoster::new(vec!["t-1".into()])),
            Arc::new(SandboxProvider::new()),
        );

        let mut tasks = BackgroundTasks::with_registry(state.tasks.clone());
        state.start_background_tasks(&mut tasks);
        assert_eq!(tasks.len(), 1);
        // The state-held registry sees the same task
        assert_eq!(state.tasks.len(), 1);
        assert_eq!(state.tasks.check_health(), 0);
        tasks.shutdown().await;
    }
}
