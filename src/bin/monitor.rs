use clap::{App, Arg};
use colored::*;
use futures_util::StreamExt;
use simboard::{Event, SimStatus};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8765";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("simboard-monitor")
        .version("0.1.0")
        .author("simboard developers")
        .about("📺 Listen for simboard event frames and print them as they arrive")
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Address to listen on")
                .takes_value(true)
                .default_value(DEFAULT_HOST),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Port to listen on")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("once")
                .long("once")
                .help("Exit after the first simulation finishes"),
        )
        .get_matches();

    tracing_subscriber::fmt::init();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let once = matches.is_present("once");

    let listener = TcpListener::bind((host, port)).await?;
    println!("{} ws://{}:{}", "📺 Listening on".bright_blue().bold(), host, port);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("🔗 Board connected from {}", addr);

        match watch_board(stream).await {
            Ok(Some(_)) if once => return Ok(()),
            Ok(_) => {}
            Err(e) => warn!("Connection {} error: {}", addr, e),
        }
        info!("🔌 {} disconnected", addr);
    }
}

/// Print every frame from one board until it disconnects. Returns the final
/// status if a `SIM` event was seen.
async fn watch_board(stream: TcpStream) -> Result<Option<SimStatus>, Box<dyn std::error::Error>> {
    let mut ws = accept_hdr_async(stream, echo_subprotocol).await?;
    let mut line = String::new();
    let mut finished = None;

    while let Some(message) = ws.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        match Event::from_frame(&text) {
            Ok(Event::Uart(value)) => match value as u8 {
                b'\n' => flush_line(&mut line),
                b'\r' => {}
                byte => line.push(char::from(byte)),
            },
            Ok(Event::PortB(value)) => {
                println!("{} {:08b}", "PORTB".bright_yellow().bold(), value);
            }
            Ok(Event::Sim(status)) => {
                flush_line(&mut line);
                let label = match status {
                    SimStatus::Done => status.as_str().bright_green().bold(),
                    SimStatus::Crash => status.as_str().bright_red().bold(),
                };
                println!("{} {}", "SIM".bright_blue().bold(), label);
                finished = Some(status);
            }
            Err(e) => warn!("Unreadable frame {:?}: {}", text, e),
        }
    }

    flush_line(&mut line);
    Ok(finished)
}

/// Echo back the first subprotocol the board offers.
fn echo_subprotocol(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    let offered = request
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').map(str::trim).find(|name| !name.is_empty()))
        .and_then(|name| name.parse().ok());

    if let Some(protocol) = offered {
        response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol);
    }
    Ok(response)
}

fn flush_line(line: &mut String) {
    if !line.is_empty() {
        println!("{} {}", "UART".bright_cyan().bold(), line);
        line.clear();
    }
}
