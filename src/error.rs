//! The single seam where internal failures become wire responses.
//!
//! The dispatcher and everything it calls return `Result<_, GatewayError>` and
//! never touch a status code directly; only [`IntoResponse`] below does.

use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The path could not be resolved to a published file.
    #[error("not found: {path}")]
    PathNotResolved { path: String, reason: Option<String> },

    /// A content guard rejected the request.
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    /// Missing trailing slash, or the canonical checkpoint redirect.
    #[error("moved permanently to {location}")]
    MovedPermanently { location: String },

    /// Redirect to a pre-signed object-storage URL.
    #[error("found at {location}")]
    Found {
        location: String,
        headers: Vec<(HeaderName, HeaderValue)>,
    },

    /// Invalid or out-of-bounds byte range.
    #[error("range not satisfiable")]
    RangeNotSatisfiable { size_header: String },

    /// Every mirror failed before any byte reached the client.
    #[error("no remote artifact could be fetched")]
    NotFound,

    /// The chosen mirror returned a non-2xx status, or the connection to it failed,
    /// before any byte reached the client; carries the upstream status when known.
    #[error("upstream error: {status}")]
    UpstreamError { status: StatusCode, message: String },

    /// A pass-through (or version-only) lookup matched more than one ContentArtifact row
    /// for the same relative path. Logged and surfaced as a 500 rather than silently
    /// resolved to the first match.
    #[error("ambiguous content match for {path}")]
    Ambiguous { path: String },

    /// Anything else: a store/blob/downloader failure with no recovery defined.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn path_not_resolved(path: impl Into<String>) -> Self {
        GatewayError::PathNotResolved {
            path: path.into(),
            reason: None,
        }
    }

    pub fn path_not_resolved_with_reason(path: impl Into<String>, reason: impl Into<String>) -> Self {
        GatewayError::PathNotResolved {
            path: path.into(),
            reason: Some(reason.into()),
        }
    }

    pub fn range_not_satisfiable(size: Option<i64>) -> Self {
        let size_header = match size {
            Some(size) => format!("bytes */{size}"),
            None => "bytes */*".to_string(),
        };
        GatewayError::RangeNotSatisfiable { size_header }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::PathNotResolved { path, reason } => {
                log::debug!("path not resolved: {path} ({reason:?})");
                (StatusCode::NOT_FOUND, reason.unwrap_or_default()).into_response()
            }
            GatewayError::Forbidden { reason } => {
                (StatusCode::FORBIDDEN, reason).into_response()
            }
            GatewayError::MovedPermanently { location } => {
                let mut headers = HeaderMap::new();
                if let Ok(value) = HeaderValue::from_str(&location) {
                    headers.insert(axum::http::header::LOCATION, value);
                }
                (StatusCode::MOVED_PERMANENTLY, headers).into_response()
            }
            GatewayError::Found { location, headers } => {
                let mut header_map = HeaderMap::new();
                if let Ok(value) = HeaderValue::from_str(&location) {
                    header_map.insert(axum::http::header::LOCATION, value);
                }
                for (name, value) in headers {
                    header_map.insert(name, value);
                }
                (StatusCode::FOUND, header_map).into_response()
            }
            GatewayError::RangeNotSatisfiable { size_header } => {
                let mut headers = HeaderMap::new();
                if let Ok(value) = HeaderValue::from_str(&size_header) {
                    headers.insert(
                        HeaderName::from_static("content-range"),
                        value,
                    );
                }
                (StatusCode::RANGE_NOT_SATISFIABLE, headers).into_response()
            }
            GatewayError::NotFound => StatusCode::NOT_FOUND.into_response(),
            GatewayError::UpstreamError { status, message } => {
                log::warn!("upstream error: {status} {message}");
                (status, message).into_response()
            }
            GatewayError::Ambiguous { path } => {
                log::error!("multiple (pass-through) matches for {path}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            GatewayError::Internal(err) => {
                log::error!("internal error: {err:#}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
