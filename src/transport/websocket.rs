use super::{Readiness, Transport, TransportError};
use crate::config::BridgeConfig;
use futures_util::{FutureExt, SinkExt, StreamExt};
use std::future::poll_fn;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Link {
    Disconnected { retry_at: Instant },
    Connecting(JoinHandle<Result<WsStream, TransportError>>),
    Connected(WsStream),
    Closed,
}

enum Poll {
    Writable,
    Pending,
    PeerClosed,
    Failed(TransportError),
}

/// WebSocket client that publishes text frames.
///
/// Connecting and reconnecting happen inside [`Transport::service`], on whatever
/// tokio runtime drives the publisher. Must be serviced from within that runtime.
pub struct WebSocketTransport {
    url: Url,
    authorization: Option<HeaderValue>,
    subprotocol: Option<HeaderValue>,
    link: Link,
    connect_timeout: Duration,
    write_timeout: Duration,
    reconnect_delay: Duration,
}

impl WebSocketTransport {
    pub fn new(url: &str, token: Option<&str>, config: &BridgeConfig) -> Result<Self, TransportError> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::UnsupportedScheme(url.scheme().to_string()));
        }

        let authorization = token
            .map(|token| HeaderValue::from_str(&format!("Bearer {token}")))
            .transpose()
            .map_err(|_| TransportError::InvalidToken)?;

        let subprotocol = config
            .subprotocol
            .as_deref()
            .map(|name| match HeaderValue::from_str(name) {
                Ok(value) if !name.trim().is_empty() => Ok(value),
                _ => Err(TransportError::InvalidSubprotocol(name.to_string())),
            })
            .transpose()?;

        let transport = Self {
            url,
            authorization,
            subprotocol,
            link: Link::Disconnected {
                retry_at: Instant::now(),
            },
            connect_timeout: config.connect_timeout(),
            write_timeout: config.write_timeout(),
            reconnect_delay: config.reconnect_delay(),
        };
        // Surface request-building problems at start-up rather than on first connect.
        transport.request()?;
        Ok(transport)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Connected(_))
    }

    fn request(&self) -> Result<Request, TransportError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(authorization) = &self.authorization {
            request
                .headers_mut()
                .insert(AUTHORIZATION, authorization.clone());
        }
        if let Some(subprotocol) = &self.subprotocol {
            request
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, subprotocol.clone());
        }
        Ok(request)
    }

    fn begin_connect(&mut self) {
        let request = match self.request() {
            Ok(request) => request,
            Err(e) => {
                warn!("❌ Cannot build WebSocket request: {}", e);
                self.schedule_reconnect();
                return;
            }
        };
        let connect_timeout = self.connect_timeout;
        info!("🔗 Connecting to {}", self.url);

        self.link = Link::Connecting(tokio::spawn(async move {
            match time::timeout(connect_timeout, connect_async(request)).await {
                Ok(Ok((stream, _response))) => Ok(stream),
                Ok(Err(e)) => Err(TransportError::WebSocket(e)),
                Err(_) => Err(TransportError::ConnectTimeout),
            }
        }));
    }

    fn schedule_reconnect(&mut self) {
        self.link = Link::Disconnected {
            retry_at: Instant::now() + self.reconnect_delay,
        };
    }
}

impl Transport for WebSocketTransport {
    async fn service(&mut self, timeout: Duration) -> Readiness {
        let deadline = Instant::now() + timeout;

        loop {
            match &mut self.link {
                Link::Closed => return Readiness::Closed,

                Link::Disconnected { retry_at } => {
                    let retry_at = *retry_at;
                    if retry_at > deadline {
                        time::sleep_until(deadline).await;
                        return Readiness::Pending;
                    }
                    time::sleep_until(retry_at).await;
                    self.begin_connect();
                }

                Link::Connecting(handle) => match time::timeout_at(deadline, handle).await {
                    Err(_) => return Readiness::Pending,
                    Ok(Ok(Ok(stream))) => {
                        info!("✅ Connected to {}", self.url);
                        self.link = Link::Connected(stream);
                    }
                    Ok(Ok(Err(e))) => {
                        warn!("🔌 Connection to {} failed: {}", self.url, e);
                        self.schedule_reconnect();
                    }
                    Ok(Err(e)) => {
                        warn!("🔌 Connect task for {} aborted: {}", self.url, e);
                        self.schedule_reconnect();
                    }
                },

                Link::Connected(stream) => {
                    return match poll_connected(stream, deadline).await {
                        Poll::Writable => Readiness::Writable,
                        Poll::Pending => Readiness::Pending,
                        Poll::PeerClosed => {
                            info!("🔌 {} closed the connection", self.url);
                            self.link = Link::Closed;
                            Readiness::Closed
                        }
                        Poll::Failed(e) => {
                            warn!("🔌 Connection to {} lost: {}", self.url, e);
                            self.schedule_reconnect();
                            Readiness::Pending
                        }
                    };
                }
            }
        }
    }

    async fn write(&mut self, frame: &str) -> bool {
        let Link::Connected(stream) = &mut self.link else {
            return false;
        };

        let result = time::timeout(self.write_timeout, stream.send(Message::Text(frame.to_owned()))).await;
        match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("📤 Send to {} failed: {}", self.url, e);
                self.schedule_reconnect();
                false
            }
            Err(_) => {
                // A timed-out frame may still be buffered; dropping the link discards it.
                warn!("📤 Send to {} timed out", self.url);
                self.schedule_reconnect();
                false
            }
        }
    }

    async fn close(&mut self) {
        match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Connected(mut stream) => {
                if let Err(e) = time::timeout(self.write_timeout, stream.close(None)).await {
                    debug!("Close handshake with {} timed out: {}", self.url, e);
                }
            }
            Link::Connecting(handle) => handle.abort(),
            Link::Disconnected { .. } | Link::Closed => {}
        }
    }
}

async fn poll_connected(stream: &mut WsStream, deadline: Instant) -> Poll {
    // Inbound traffic is not part of the protocol; consume whatever is already
    // buffered so pings are answered and close frames are noticed.
    while let Some(inbound) = stream.next().now_or_never() {
        match inbound {
            None | Some(Ok(Message::Close(_))) => return Poll::PeerClosed,
            Some(Ok(message)) => debug!("📨 Ignoring inbound message ({} bytes)", message.len()),
            Some(Err(e)) => return Poll::Failed(e.into()),
        }
    }

    match time::timeout_at(deadline, poll_fn(|cx| stream.poll_ready_unpin(cx))).await {
        Ok(Ok(())) => Poll::Writable,
        Ok(Err(e)) => Poll::Failed(e.into()),
        Err(_) => Poll::Pending,
    }
}
