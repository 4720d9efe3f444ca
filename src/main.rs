use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use mailora_outreach::config::Config;
use mailora_outreach::routes::{self, AppState};
use mailora_outreach::services::account_service::AccountPool;
use mailora_outreach::services::correlation_service::CorrelationIndex;
use mailora_outreach::services::idle_watcher_service::{WatcherManager, WatcherSettings};
use mailora_outreach::services::message_store::MessageStore;
use mailora_outreach::services::scheduler::{Scheduler, SchedulerSettings};
use mailora_outreach::smtp::{Mailer, SmtpMailer};
use mailora_outreach::{db, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cfg = Config::from_env();
    let pool = db::connect(&cfg.database_url)
        .await
        .with_context(|| format!("opening database {}", cfg.database_url))?;

    let store = MessageStore::new(pool.clone());
    let accounts = AccountPool::new(pool.clone());
    let released = store.release_stale_claims().await.context("releasing stale claims")?;
    if released > 0 {
        tracing::warn!(released, "released claims left by a previous run");
    }
    let unconfirmed = store.unconfirmed_deliveries().await.context("listing unconfirmed deliveries")?;
    if !unconfirmed.is_empty() {
        tracing::warn!(
            count = unconfirmed.len(),
            uids = ?unconfirmed,
            "claims kept: delivery may have happened, check before releasing by hand"
        );
    }

    let cancel = CancellationToken::new();
    let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::new(cfg.smtp_timeout));

    let scheduler = Scheduler::new(
        store.clone(),
        accounts.clone(),
        mailer.clone(),
        SchedulerSettings::from(&cfg),
    )
    .start(cancel.child_token());

    let watchers = Arc::new(WatcherManager::new(
        CorrelationIndex::new(store.clone()),
        WatcherSettings::from(&cfg),
        cancel.child_token(),
    ));
    for account in accounts.list_accounts().await.context("loading accounts")? {
        watchers.start_account(&account).await;
    }
    tracing::info!(watchers = watchers.active_count().await, "inbound watchers started");

    let app = routes::router(AppState::new(pool, mailer, watchers.clone(), &cfg));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!("listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let stop = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested");
            stop.cancel();
        })
        .await?;

    tracing::info!("waiting for background workers");
    watchers.shutdown().await;
    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "scheduler task panicked");
    }
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let term = async {
        if let Ok(mut s) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            s.recv().await;
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();
    tokio::select! { _ = ctrl_c => {}, _ = term => {} }
}
