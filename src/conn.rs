//! Per-connection abort handle.
//!
//! Axum's normal serving path (`axum::serve`) never hands a handler the raw socket, so a
//! digest-validation failure mid-stream has no way to force-close the underlying TCP
//! connection through the extractor surface alone. The server (`server.rs`) instead runs
//! its own accept loop, duplicates each accepted socket, and threads a [`ConnectionAbort`]
//! into the request extensions so a handler can reach for it.
//!
//! Built directly from `socket2`'s documented `SO_LINGER` behavior: setting linger to zero
//! and then closing the socket sends an RST instead of a clean FIN, which is what "abort
//! the connection" requires here.

use std::net::TcpStream as StdTcpStream;
use std::sync::Arc;
use std::time::Duration;

use socket2::SockRef;

#[derive(Clone)]
pub struct ConnectionAbort {
    inner: Arc<StdTcpStream>,
}

impl ConnectionAbort {
    pub fn new(raw: StdTcpStream) -> Self {
        Self { inner: Arc::new(raw) }
    }

    /// Force-closes the connection: `SO_LINGER=(on=1, time=0)` then shutdown, so the
    /// client observes a reset rather than a graceful close.
    pub fn abort(&self) {
        let sock = SockRef::from(self.inner.as_ref());
        if let Err(err) = sock.set_linger(Some(Duration::ZERO)) {
            log::warn!("failed to set SO_LINGER before aborting connection: {err}");
        }
        let _ = self.inner.shutdown(std::net::Shutdown::Both);
    }
}
