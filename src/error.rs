use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Why a download request did not produce a file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// A required query parameter was missing or blank.
    #[error("{0}")]
    InvalidRequest(String),

    /// Another download is already running for this session id.
    #[error("A download is already in progress for session {0}")]
    SessionBusy(String),

    /// The fetcher could not retrieve the media.
    #[error("Download failed: {0:#}")]
    FetchFailed(anyhow::Error),

    /// Staging storage could not be created or read.
    #[error("Storage error: {0}")]
    StorageError(#[from] std::io::Error),
}

impl DownloadError {
    pub fn status(&self) -> StatusCode {
        match self {
            DownloadError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DownloadError::SessionBusy(_) => StatusCode::CONFLICT,
            DownloadError::FetchFailed(_) | DownloadError::StorageError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for DownloadError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
