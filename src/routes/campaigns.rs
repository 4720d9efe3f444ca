use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use super::{reject, AppState};
use crate::services::ingest_service::{EnqueueReport, LeadRow};

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub rows: Vec<LeadRow>,
    #[serde(default)]
    pub track_opens: Option<bool>,
}

/// POST /campaigns - create a campaign and queue its rows
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<EnqueueReport>), (StatusCode, String)> {
    let now = Utc::now();
    let campaign = state
        .ingest
        .create_campaign(req.name.as_deref(), now)
        .await
        .map_err(reject)?;

    let mut opts = state.enqueue.clone();
    if let Some(track) = req.track_opens {
        opts.track_opens = track;
    }
    let report = state
        .ingest
        .enqueue_batch(campaign.id, &req.rows, &opts, now)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(report)))
}
