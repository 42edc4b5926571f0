//! The dispatcher's result type. Every component that can produce a terminal HTTP
//! response returns one of these instead of touching axum directly, rather than
//! signaling through exceptions the way a framework view method might; only
//! `server.rs` converts a `DispatchOutcome` into a wire response.

use axum::http::{HeaderName, HeaderValue, StatusCode};

/// Whether the client gets a body or just headers (HEAD vs GET).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPolicy {
    Full,
    HeadersOnly,
}

pub enum DispatchOutcome {
    /// A rendered directory listing or checkpoint index.
    Html { body: String, body_policy: BodyPolicy },

    /// A local file is streamed straight off disk.
    File {
        absolute_path: String,
        filename: String,
        content_type: Option<String>,
        total_size: u64,
        range: Option<(u64, u64)>,
        body_policy: BodyPolicy,
        extra_headers: Vec<(HeaderName, HeaderValue)>,
    },

    /// A pre-signed object-storage redirect or a path-resolution
    /// redirect.
    Redirect {
        location: String,
        status: StatusCode,
        extra_headers: Vec<(HeaderName, HeaderValue)>,
    },

    /// A fully-built streaming response, produced by the On-Demand Streamer once
    /// it already knows upstream's headers; built eagerly because the streamer owns the
    /// channel feeding the body and there is nothing left for `server.rs` to add.
    Streamed(axum::response::Response),
}
