use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use super::{reject, AppState};
use crate::models::account::{Account, NewAccount};
use crate::services::account_service::AccountPool;

/// GET /accounts
pub async fn list_accounts(State(accounts): State<AccountPool>) -> Result<Json<Vec<Account>>, (StatusCode, String)> {
    let list = accounts.list_accounts().await.map_err(reject)?;
    Ok(Json(list))
}

/// POST /accounts - insert or update by address, then (re)attach its watcher
pub async fn upsert_account(
    State(state): State<AppState>,
    Json(new): Json<NewAccount>,
) -> Result<Json<Account>, (StatusCode, String)> {
    let account = state.ingest.upsert_account(&new).await.map_err(reject)?;

    // Credentials may have changed.
    state.watchers.stop(&account.email).await;
    state.watchers.start_account(&account).await;
    tracing::info!(account = %account.email, "watcher attached");

    Ok(Json(account))
}
