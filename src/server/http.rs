use super::AppState;
use crate::error::DownloadError;
use crate::utils::{attachment_disposition, content_type_for, source_host};
use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const INDEX_HTML: &str = include_str!("../../static/index.html");

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub url: Option<String>,
    pub session_id: Option<String>,
}

/// GET /
pub async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /health
pub async fn health_handler() -> &'static str {
    "ok"
}

/// GET /download?url=..&session_id=..
///
/// Blocks until the media is fetched, then streams it back as an attachment.
pub async fn download_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, DownloadError> {
    let session_id = query.session_id.as_deref().unwrap_or("-");
    let host = source_host(query.url.as_deref().unwrap_or_default());
    info!(session_id, host = %host, "GET /download");

    let download = match state
        .orchestrator
        .start_download(query.url.as_deref(), query.session_id.as_deref())
        .await
    {
        Ok(download) => download,
        Err(e) => {
            warn!(session_id, host = %host, status = %e.status(), "Download request failed: {}", e);
            return Err(e);
        }
    };

    let headers = [
        (
            header::CONTENT_TYPE,
            content_type_for(Path::new(&download.file_name)).to_string(),
        ),
        (
            header::CONTENT_DISPOSITION,
            attachment_disposition(&download.file_name),
        ),
        (header::CONTENT_LENGTH, download.len.to_string()),
    ];

    Ok((headers, Body::from_stream(download.into_body())).into_response())
}
