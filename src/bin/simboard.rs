use clap::{App, Arg, ArgMatches};
use colored::*;
use simboard::config::{
    self, BridgeConfig, DEFAULT_DRAIN_MS, DEFAULT_RECONNECT_MS, DEFAULT_SUBPROTOCOL,
    DEFAULT_TICK_MS,
};
use simboard::{
    Avr, Bridge, BridgeError, BridgeReport, FirmwareImage, LineTransport, SimStatus, Transport,
    WebSocketTransport,
};
use std::process;
use tracing::{info, Level};

fn main() {
    let matches = App::new("simboard")
        .version("0.1.0")
        .author("simboard developers")
        .about("🔌 Run AVR firmware in a simulator and stream its UART and PORTB activity")
        .arg(
            Arg::with_name("mcu")
                .value_name("MCU")
                .help("Target microcontroller (atmega328p, atmega168, atmega88)")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("freq")
                .value_name("FREQ")
                .help("Clock frequency in Hz")
                .required(true)
                .index(2),
        )
        .arg(
            Arg::with_name("file")
                .value_name("FILE")
                .help("Firmware image (.hex for Intel HEX, anything else is raw binary)")
                .required(true)
                .index(3),
        )
        .arg(
            Arg::with_name("url")
                .value_name("URL")
                .help("WebSocket endpoint (ws:// or wss://); events go to stdout when omitted")
                .requires("token")
                .index(4),
        )
        .arg(
            Arg::with_name("token")
                .value_name("TOKEN")
                .help("File containing the bearer token for URL")
                .requires("url")
                .index(5),
        )
        .arg(millis_arg("tick-ms", "Upper bound on one publisher tick [default: 50]"))
        .arg(millis_arg(
            "drain-ms",
            "How long to keep publishing after the simulation ends [default: 2000]",
        ))
        .arg(millis_arg(
            "reconnect-ms",
            "Delay before reconnecting a dropped WebSocket [default: 1000]",
        ))
        .arg(
            Arg::with_name("protocol")
                .long("protocol")
                .value_name("NAME")
                .help("WebSocket subprotocol to request [default: simboard]")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("no-protocol")
                .long("no-protocol")
                .help("Do not request a WebSocket subprotocol")
                .conflicts_with("protocol"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log every event sent"),
        )
        .get_matches();

    // stdout carries event lines when no URL is given, so logs go to stderr.
    let level = if matches.is_present("verbose") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    match run(&matches) {
        Ok(report) => print_summary(&report),
        Err(e) => {
            eprintln!("{} {}", "❌ error:".bright_red().bold(), e);
            process::exit(1);
        }
    }
}

fn millis_arg<'a>(name: &'a str, help: &'a str) -> Arg<'a, 'a> {
    Arg::with_name(name)
        .long(name)
        .value_name("MS")
        .help(help)
        .takes_value(true)
        .validator(|value| {
            value
                .parse::<u64>()
                .map(|_| ())
                .map_err(|_| format!("'{}' is not a number of milliseconds", value))
        })
}

fn millis(matches: &ArgMatches, name: &str, default: u64) -> u64 {
    matches
        .value_of(name)
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn subprotocol(matches: &ArgMatches) -> Option<String> {
    if matches.is_present("no-protocol") {
        return None;
    }
    Some(matches.value_of("protocol").unwrap_or(DEFAULT_SUBPROTOCOL).to_string())
}

fn run(matches: &ArgMatches) -> Result<BridgeReport, BridgeError> {
    let bridge_config = BridgeConfig {
        tick_ms: millis(matches, "tick-ms", DEFAULT_TICK_MS),
        drain_ms: millis(matches, "drain-ms", DEFAULT_DRAIN_MS),
        reconnect_ms: millis(matches, "reconnect-ms", DEFAULT_RECONNECT_MS),
        subprotocol: subprotocol(matches),
        ..BridgeConfig::default()
    };
    bridge_config.validate()?;

    let mcu = matches.value_of("mcu").unwrap_or_default();
    let frequency = config::parse_frequency(matches.value_of("freq").unwrap_or_default())?;
    let image = FirmwareImage::load(matches.value_of("file").unwrap_or_default())?;

    let mut avr = Avr::by_name(mcu, frequency)?;
    avr.load_image(&image)?;
    info!(
        "🔧 Loaded {} bytes at 0x{:04x} into {} @ {} Hz",
        image.len(),
        image.base,
        avr.spec().name,
        frequency
    );

    match (matches.value_of("url"), matches.value_of("token")) {
        (Some(url), Some(token_file)) => {
            let token = config::read_token(token_file)?;
            let transport = WebSocketTransport::new(url, Some(&token), &bridge_config)?;
            info!("🌐 Publishing to {}", transport.url());
            run_bridge(avr, transport, bridge_config)
        }
        _ => {
            info!("📜 Publishing to stdout");
            run_bridge(avr, LineTransport::stdout(), bridge_config)
        }
    }
}

fn run_bridge<T>(avr: Avr, transport: T, config: BridgeConfig) -> Result<BridgeReport, BridgeError>
where
    T: Transport + Send + 'static,
{
    Bridge::new(avr, transport, config).run()
}

fn print_summary(report: &BridgeReport) {
    let status = match report.driver.status {
        SimStatus::Done => report.driver.status.as_str().bright_green().bold(),
        SimStatus::Crash => report.driver.status.as_str().bright_red().bold(),
    };

    eprintln!("{} {}", "🏁 Simulation finished:".bright_blue().bold(), status);
    eprintln!(
        "   {} {} steps, {} cycles, {} ms",
        "Driver:".bright_white(),
        report.driver.steps,
        report.driver.cycles,
        report.driver.elapsed_ms
    );
    eprintln!(
        "   {} {} emitted, {} sent, {} dropped, {} undelivered",
        "Events:".bright_white(),
        report.driver.events_emitted,
        report.publisher.sent,
        report.publisher.dropped,
        report.undelivered
    );
}
