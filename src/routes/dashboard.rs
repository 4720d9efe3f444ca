use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::reject;
use crate::models::campaign::{CampaignStats, OverallStats};
use crate::services::message_store::MessageStore;

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub campaigns: Vec<CampaignStats>,
    pub overall: OverallStats,
}

/// GET /dashboard - per-campaign counters, newest first, plus totals
pub async fn dashboard(State(store): State<MessageStore>) -> Result<Json<DashboardResponse>, (StatusCode, String)> {
    let campaigns = store.campaign_stats().await.map_err(reject)?;
    let overall = store.overall_stats().await.map_err(reject)?;
    Ok(Json(DashboardResponse { campaigns, overall }))
}
