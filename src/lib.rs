//! # Simboard
//!
//! Runs AVR firmware on an instruction-level simulator and streams what the board
//! does, UART bytes and PORTB changes, to a remote listener as JSON text frames.
//!
//! ## Features
//!
//! - **Simulated MCU**: atmega328p, atmega168 and atmega88 cores with USART0 and port B hooks
//! - **Firmware loading**: Intel HEX and raw binary images
//! - **Event bridge**: a bounded-latency queue between the simulation and network threads
//! - **Transports**: WebSocket with bearer authentication, or plain stdout lines
//! - **Best-effort delivery**: events that fail to send are counted and dropped
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use simboard::{Avr, Bridge, BridgeConfig, FirmwareImage, LineTransport};
//!
//! let image = FirmwareImage::load("blink.hex")?;
//! let mut avr = Avr::by_name("atmega328p", 16_000_000)?;
//! avr.load_image(&image)?;
//!
//! let report = Bridge::new(avr, LineTransport::stdout(), BridgeConfig::default()).run()?;
//! println!("{:?} after {} steps", report.driver.status, report.driver.steps);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - [`driver`] - steps a [`Machine`] on the `sim` thread and turns hooks into events
//! - [`queue`] - the shared FIFO between the two threads
//! - [`publisher`] - services a [`Transport`] on the `publisher` thread
//! - [`bridge`] - wires the threads together and joins them
//! - [`avr`] - the AVR core used by the command-line tool

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::too_many_lines)]

pub mod avr;
pub mod bridge;
pub mod config;
pub mod driver;
pub mod event;
pub mod image;
pub mod machine;
pub mod publisher;
pub mod queue;
pub mod transport;

// Re-export main public types for convenience
pub use avr::Avr;
pub use bridge::{Bridge, BridgeError, BridgeReport};
pub use config::BridgeConfig;
pub use driver::{DriverReport, SimulationDriver};
pub use event::{Event, EventKind, SimStatus};
pub use image::FirmwareImage;
pub use machine::{CpuState, Machine, Signal};
pub use publisher::{Publisher, PublisherStats};
pub use queue::EventQueue;
pub use transport::{LineTransport, Readiness, Transport, WebSocketTransport};
