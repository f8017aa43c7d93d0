use futures_util::StreamExt;
use simboard::transport::TransportError;
use simboard::{Avr, Bridge, BridgeConfig, Readiness, SimStatus, Transport, WebSocketTransport};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::{accept_async, accept_hdr_async};
use tokio_tungstenite::tungstenite::Message;

fn fast_config() -> BridgeConfig {
    BridgeConfig {
        tick_ms: 10,
        drain_ms: 2000,
        reconnect_ms: 50,
        ..BridgeConfig::default()
    }
}

fn header(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn blink_avr() -> Avr {
    let mut avr = Avr::by_name("atmega328p", 16_000_000).unwrap();
    avr.load_program(&[
        0xE401, 0x9300, 0x00C6, // 'A' -> UDR0
        0xE200, 0xB905, // PORTB = 0x20
        0x9588, // sleep
    ])
    .unwrap();
    avr
}

#[test]
fn test_rejects_non_websocket_urls() {
    let config = BridgeConfig::default();
    assert!(matches!(
        WebSocketTransport::new("http://localhost:8765", None, &config),
        Err(TransportError::UnsupportedScheme(scheme)) if scheme == "http"
    ));
    assert!(matches!(
        WebSocketTransport::new("not a url", None, &config),
        Err(TransportError::InvalidUrl(_))
    ));
    assert!(matches!(
        WebSocketTransport::new("ws://localhost:8765", Some("bad\ntoken"), &config),
        Err(TransportError::InvalidToken)
    ));

    let config = BridgeConfig {
        subprotocol: Some("bad\nname".to_string()),
        ..BridgeConfig::default()
    };
    assert!(matches!(
        WebSocketTransport::new("ws://localhost:8765", None, &config),
        Err(TransportError::InvalidSubprotocol(name)) if name == "bad\nname"
    ));
}

#[test]
fn test_accepts_ws_and_wss() {
    let config = BridgeConfig::default();
    let transport = WebSocketTransport::new("ws://127.0.0.1:9/events", Some("t0k3n"), &config).unwrap();
    assert_eq!(transport.url().path(), "/events");
    assert!(!transport.is_connected());
    assert!(WebSocketTransport::new("wss://example.com/", None, &config).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bridge_streams_frames_with_bearer_token() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/board", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut authorization = None;
        let mut subprotocol = None;
        let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
            authorization = header(request, "authorization");
            subprotocol = header(request, "sec-websocket-protocol");
            if let Some(offered) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) {
                response
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, offered.clone());
            }
            Ok(response)
        };
        let mut ws = accept_hdr_async(stream, callback).await.unwrap();

        let mut frames = Vec::new();
        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(text) => frames.push(text),
                Message::Close(_) => break,
                _ => {}
            }
        }
        (authorization, subprotocol, frames)
    });

    let transport = WebSocketTransport::new(&url, Some("s3cret"), &fast_config()).unwrap();
    let report = tokio::task::spawn_blocking(move || Bridge::new(blink_avr(), transport, fast_config()).run())
        .await
        .unwrap()
        .unwrap();

    let (authorization, subprotocol, frames) = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(authorization.as_deref(), Some("Bearer s3cret"));
    assert_eq!(subprotocol.as_deref(), Some("simboard"));
    assert_eq!(
        frames,
        vec![
            r#"{"event": "UART", "value": 65}"#,
            r#"{"event": "PORTB", "value": 32}"#,
            r#"{"event": "SIM", "value": "DONE"}"#,
        ]
    );
    assert_eq!(report.driver.status, SimStatus::Done);
    assert_eq!(report.publisher.sent, 3);
    assert_eq!(report.undelivered, 0);
}

#[test]
fn test_unreachable_server_leaves_events_undelivered() {
    // Bind and drop to get a port nothing is listening on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let url = format!("ws://127.0.0.1:{port}");
    let config = BridgeConfig {
        drain_ms: 300,
        ..fast_config()
    };

    let transport = WebSocketTransport::new(&url, None, &config).unwrap();
    let report = Bridge::new(blink_avr(), transport, config).run().unwrap();

    assert_eq!(report.driver.status, SimStatus::Done);
    assert_eq!(report.publisher.sent, 0);
    assert_eq!(report.undelivered, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_subprotocol_connects_to_plain_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let mut frames = 0;
        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(_) => frames += 1,
                Message::Close(_) => break,
                _ => {}
            }
        }
        frames
    });

    let config = BridgeConfig {
        subprotocol: None,
        ..fast_config()
    };
    let transport = WebSocketTransport::new(&url, None, &config).unwrap();
    let report = tokio::task::spawn_blocking(move || Bridge::new(blink_avr(), transport, config).run())
        .await
        .unwrap()
        .unwrap();

    let frames = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frames, 3);
    assert_eq!(report.publisher.sent, 3);
}

#[tokio::test]
async fn test_write_timeout_drops_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    // Completes the handshake, then never reads so the socket buffers fill up.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ws = accept_async(stream).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let config = BridgeConfig {
        write_timeout_ms: 50,
        subprotocol: None,
        ..fast_config()
    };
    let mut transport = WebSocketTransport::new(&url, None, &config).unwrap();

    let mut readiness = Readiness::Pending;
    for _ in 0..100 {
        readiness = transport.service(Duration::from_millis(50)).await;
        if readiness == Readiness::Writable {
            break;
        }
    }
    assert_eq!(readiness, Readiness::Writable);

    let frame = "x".repeat(1 << 20);
    let mut failed = false;
    for _ in 0..512 {
        if !transport.write(&frame).await {
            failed = true;
            break;
        }
    }

    assert!(failed);
    assert!(!transport.is_connected());
    assert_eq!(transport.service(Duration::from_millis(10)).await, Readiness::Pending);
    server.abort();
}
