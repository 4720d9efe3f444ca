use std::sync::Arc;

use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::Error;
use crate::services::account_service::AccountPool;
use crate::services::correlation_service::CorrelationIndex;
use crate::services::idle_watcher_service::WatcherManager;
use crate::services::ingest_service::{EnqueueOptions, IngestService};
use crate::services::message_store::MessageStore;
use crate::services::reply_service::ReplyService;
use crate::smtp::Mailer;

pub mod accounts;
pub mod campaigns;
pub mod dashboard;
pub mod idle;
pub mod reply;
pub mod tracking;

#[derive(Clone)]
pub struct AppState {
    pub store: MessageStore,
    pub accounts: AccountPool,
    pub correlation: CorrelationIndex,
    pub replies: ReplyService,
    pub ingest: IngestService,
    pub enqueue: EnqueueOptions,
    pub watchers: Arc<WatcherManager>,
}

impl AppState {
    pub fn new(pool: SqlitePool, mailer: Arc<dyn Mailer>, watchers: Arc<WatcherManager>, cfg: &Config) -> Self {
        let store = MessageStore::new(pool.clone());
        let accounts = AccountPool::new(pool);
        let correlation = CorrelationIndex::new(store.clone());
        Self {
            replies: ReplyService::new(store.clone(), accounts.clone(), correlation.clone(), mailer),
            ingest: IngestService::new(store.clone(), accounts.clone()),
            enqueue: EnqueueOptions::from(cfg),
            store,
            accounts,
            correlation,
            watchers,
        }
    }
}

impl FromRef<AppState> for MessageStore {
    fn from_ref(state: &AppState) -> Self {
        state.store.clone()
    }
}

impl FromRef<AppState> for AccountPool {
    fn from_ref(state: &AppState) -> Self {
        state.accounts.clone()
    }
}

impl FromRef<AppState> for CorrelationIndex {
    fn from_ref(state: &AppState) -> Self {
        state.correlation.clone()
    }
}

impl FromRef<AppState> for ReplyService {
    fn from_ref(state: &AppState) -> Self {
        state.replies.clone()
    }
}

impl FromRef<AppState> for Arc<WatcherManager> {
    fn from_ref(state: &AppState) -> Self {
        state.watchers.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/pixel.gif", get(tracking::pixel))
        .route("/reply", post(reply::send_reply))
        .route("/dashboard", get(dashboard::dashboard))
        .route("/campaigns", post(campaigns::create_campaign))
        .route("/accounts", get(accounts::list_accounts).post(accounts::upsert_account))
        .route("/inbox", get(idle::inbox))
        .route("/watchers/status", get(idle::watcher_status))
        .route("/watchers/events", get(idle::watcher_events))
        .route("/watchers/:account/stop", post(idle::stop_watcher))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Status for a failed core operation.
pub(crate) fn error_status(e: &Error) -> StatusCode {
    match e {
        Error::Data(_) | Error::Address(_) | Error::MessageBuild(_) => StatusCode::BAD_REQUEST,
        Error::Database(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Network(_) | Error::Protocol(_) | Error::Smtp(_) | Error::Rejected(_) | Error::Imap(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

pub(crate) fn reject(e: Error) -> (StatusCode, String) {
    let status = error_status(&e);
    if status.is_server_error() {
        tracing::error!(error = %e, "request failed");
    }
    (status, e.to_string())
}
