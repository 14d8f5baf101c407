//! 积分对账服务
//!
//! 后台轮询积分计算服务，为已完成计算的订单入账。

use std::sync::Arc;

use anyhow::Result;
use ledger_shared::{
    config::{AppConfig, StoreBackend},
    database::Database,
    observability,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use accrual_reconciler::{
    HttpAccrualClient, LedgerStore, MemoryLedgerStore, PgLedgerStore, ReconciliationCycle,
};

const SERVICE_NAME: &str = "accrual-reconciler";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置：config/*.toml + LEDGER_ 环境变量
    let config = AppConfig::load(SERVICE_NAME)?;

    // 2. 初始化日志与指标
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    observability::init(&obs_config)?;

    info!("Starting {}...", SERVICE_NAME);
    info!(
        environment = %config.environment,
        accrual_url = %config.accrual.base_url,
        backend = ?config.store.backend,
        "Configuration loaded"
    );

    config.accrual.validate()?;

    // 3. 初始化账本存储
    let (store, db): (Arc<dyn LedgerStore>, Option<Database>) = match config.store.backend {
        StoreBackend::Postgres => {
            let db = Database::connect(&config.database).await?;
            db.health_check().await?;
            db.run_migrations().await?;
            info!("Database connection established");
            (Arc::new(PgLedgerStore::new(db.pool().clone())), Some(db))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory ledger store, data is lost on exit");
            (Arc::new(MemoryLedgerStore::new()), None)
        }
    };

    // 4. 积分服务客户端与对账循环
    let client = Arc::new(HttpAccrualClient::from_config(&config.accrual)?);
    let cycle = ReconciliationCycle::from_config(store, client, &config.accrual);

    // 5. 关闭信号
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    cycle.run(shutdown_rx).await;

    if let Some(db) = db {
        db.close().await;
    }

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C，Unix 下另外监听 SIGTERM、SIGHUP、SIGQUIT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let unix_signals = async {
        use tokio::signal::unix::{SignalKind, signal};

        let kinds = [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
            (SignalKind::quit(), "SIGQUIT"),
        ];

        let mut streams = Vec::with_capacity(kinds.len());
        for (kind, name) in kinds {
            match signal(kind) {
                Ok(stream) => streams.push((stream, name)),
                Err(e) => error!(error = %e, signal = name, "Failed to install signal handler"),
            }
        }

        if streams.is_empty() {
            return std::future::pending::<&'static str>().await;
        }

        let waits = streams.iter_mut().map(|(stream, name)| {
            Box::pin(async move {
                stream.recv().await;
                *name
            })
        });
        futures::future::select_all(waits).await.0
    };

    #[cfg(not(unix))]
    let unix_signals = std::future::pending::<&'static str>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        name = unix_signals => {
            info!("Received {}, starting graceful shutdown...", name);
        }
    }
}
