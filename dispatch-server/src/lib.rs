//! FieldOps Dispatch Server - 现场服务派单节点
//!
//! # 架构概述
//!
//! 本模块是 Dispatch Server 的主入口，提供以下核心功能：
//!
//! - **派单** (`dispatch`): offer 链、超时重派、条件状态转移存储 (redb)
//! - **支付** (`payments`): 手动捕获的资金授权生命周期
//! - **变更事件** (`feed`): broadcast 通道上的状态变更广播
//! - **HTTP API** (`api`): RESTful API 接口
//!
//! # 模块结构
//!
//! ```text
//! dispatch-server/src/
//! ├── core/          # 配置、状态、服务器、后台任务
//! ├── dispatch/      # 存储、编排器、选择器、超时扫描
//! ├── payments/      # provider 抽象与授权管理
//! ├── feed/          # 变更事件广播
//! ├── api/           # HTTP 路由和处理器
//! └── utils/         # 错误、日志
//! ```

pub mod api;
pub mod core;
pub mod dispatch;
pub mod feed;
pub mod payments;
pub mod utils;

// Re-export 公共类型
pub use crate::core::{Config, Server, ServerState};
pub use dispatch::{DispatchOrchestrator, DispatchStorage, TimeoutScanner};
pub use payments::PaymentManager;
pub use utils::{AppError, AppResponse, AppResult};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};

/// 设置运行环境 (dotenv + 日志)
///
/// 必须在加载配置和启动服务器之前调用
pub fn setup_environment() -> Result<(), Box<dyn std::error::Error>> {
    // .env 缺失不是错误，生产环境直接用真实环境变量
    let _ = dotenv::dotenv();

    let log_level = std::env::var("LOG_LEVEL").ok();
    let log_dir = std::env::var("LOG_DIR").ok();
    init_logger_with_file(log_level.as_deref(), log_dir.as_deref());

    Ok(())
}

pub fn print_banner() {
    println!(
        r#"
    ______ _      __    __ ____
   / ____/(_)___ / /___/ // __ \ ____  _____
  / /_   / // _ \/ // _  // / / // __ \/ ___/
 / __/  / //  __/ // /_/ // /_/ // /_/ (__  )
/_/    /_/ \___/_/ \__,_/ \____// .___/____/
                               /_/
    "#
    );
}
