/// Reply submission from the inbox view
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Form, Json};
use chrono::Utc;

use super::reject;
use crate::services::reply_service::{ReplyRequest, ReplySent, ReplyService};

/// POST /reply - 503 when no account has quota left
pub async fn send_reply(
    State(replies): State<ReplyService>,
    Form(req): Form<ReplyRequest>,
) -> Result<Json<ReplySent>, (StatusCode, String)> {
    match replies.send_reply(&req, Utc::now()).await.map_err(reject)? {
        Some(sent) => Ok(Json(sent)),
        None => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "no sending account has quota left today".to_string(),
        )),
    }
}
