/// Open-tracking pixel
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Deserialize;

use crate::services::correlation_service::CorrelationIndex;

/// Transparent 1x1 GIF.
pub const PIXEL_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

#[derive(Debug, Deserialize)]
pub struct PixelQuery {
    pub uid: Option<String>,
}

/// GET /pixel.gif?uid=... - always answers with the image, whatever happened to the lookup
pub async fn pixel(State(correlation): State<CorrelationIndex>, Query(q): Query<PixelQuery>) -> impl IntoResponse {
    if let Some(uid) = q.uid.as_deref() {
        if let Err(e) = correlation.record_open(uid, Utc::now().timestamp()).await {
            tracing::warn!(uid = %uid, error = %e, "open tracking failed");
        }
    }
    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
        ],
        PIXEL_GIF.to_vec(),
    )
}
