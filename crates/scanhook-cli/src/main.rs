mod config;
mod http;
mod observability;
mod processor;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use scanhook_core::app::{QueueRuntime, duration_ms};
use scanhook_core::queue::{SqliteQueue, SqliteStore};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::processor::ScanReportProcessor;
use crate::processor::alm::AlmClient;
use crate::processor::fcli::FcliClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // (A) 設定とログ
    let config = AppConfig::from_env().context("invalid configuration")?;
    observability::init(&config.log_level);

    // (B) ストアとキュー
    let store = SqliteStore::open(&config.sqlite_path)
        .await
        .with_context(|| format!("failed to open store {}", config.sqlite_path.display()))?;
    let queue = Arc::new(SqliteQueue::new(&store));

    // (C) processor（scan CLI → ALM）
    let source = Arc::new(FcliClient::new(config.fcli.clone(), config.job_timeout));
    let sink = Arc::new(
        AlmClient::new(&config.alm, config.job_timeout).context("invalid ALM configuration")?,
    );
    let processor = Arc::new(ScanReportProcessor::new(source, sink, config.defect.clone()));

    // (D) worker + watchdog
    let runtime = QueueRuntime::spawn(queue.clone(), processor, &config.queue);

    // (E) HTTP
    let state = http::AppState::new(queue, runtime.status(), config.queue);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        sqlite_path = %config.sqlite_path.display(),
        poll_ms = duration_ms(config.queue.poll_interval),
        max_attempts = config.queue.max_attempts,
        "scanhook listening"
    );

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    // (F) 実行中のジョブは書き戻しまで待つ
    info!("shutting down queue");
    runtime.shutdown_and_join().await;
    store.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
}
