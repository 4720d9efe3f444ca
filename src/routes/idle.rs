/// Inbound watcher endpoints: merged inbox, status and live events
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::services::idle_watcher_service::{InboxItem, WatcherManager, WatcherStatus};

#[derive(Debug, Serialize)]
pub struct WatcherStatusResponse {
    pub active_watchers: usize,
    pub watchers: Vec<WatcherStatus>,
}

/// GET /inbox - every watcher's cached envelopes
pub async fn inbox(State(watchers): State<Arc<WatcherManager>>) -> Json<Vec<InboxItem>> {
    Json(watchers.inbox().await)
}

/// GET /watchers/status
pub async fn watcher_status(State(watchers): State<Arc<WatcherManager>>) -> Json<WatcherStatusResponse> {
    Json(WatcherStatusResponse {
        active_watchers: watchers.active_count().await,
        watchers: watchers.status().await,
    })
}

/// POST /watchers/:account/stop
pub async fn stop_watcher(
    State(watchers): State<Arc<WatcherManager>>,
    Path(account): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if watchers.stop(&account).await {
        tracing::info!(account = %account, "watcher stopped on request");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("no watcher for {account}")))
    }
}

/// GET /watchers/events - SSE stream of watcher lifecycle events
pub async fn watcher_events(
    State(watchers): State<Arc<WatcherManager>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = watchers.subscribe();
    let closing = watchers.shutdown_token();

    let stream = async_stream::stream! {
        loop {
            let received = tokio::select! {
                _ = closing.cancelled() => break,
                r = rx.recv() => r,
            };
            match received {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok(Event::default().event("watcher").data(json));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event stream subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
