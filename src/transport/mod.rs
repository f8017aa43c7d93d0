//! Outbound channels the publisher can forward event frames to.

pub mod line;
pub mod websocket;

pub use line::LineTransport;
pub use websocket::WebSocketTransport;

use std::future::Future;
use std::time::Duration;

/// Result of servicing a transport once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A write issued now is expected to be accepted.
    Writable,
    /// Not connected yet, reconnecting, or applying backpressure.
    Pending,
    /// The peer closed the channel; nothing will ever be writable again.
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported URL scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),
    #[error("token cannot be sent as an HTTP header")]
    InvalidToken,
    #[error("subprotocol '{0}' cannot be sent as an HTTP header")]
    InvalidSubprotocol(String),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection attempt timed out")]
    ConnectTimeout,
}

/// A publish-only, best-effort message channel.
///
/// Implementations own their connection state; callers only ever see [`Readiness`].
pub trait Transport {
    /// Drive pending I/O once, waiting at most `timeout` for the channel to become
    /// writable.
    fn service(&mut self, timeout: Duration) -> impl Future<Output = Readiness>;

    /// Attempt to send one frame. `false` means the frame was not delivered.
    fn write(&mut self, frame: &str) -> impl Future<Output = bool>;

    fn close(&mut self) -> impl Future<Output = ()>;
}
