//! Hardware events and their wire encoding.
//!
//! Every event leaves the bridge as a single JSON object:
//!
//! ```text
//! {"event": "UART", "value": 65}
//! {"event": "PORTB", "value": 3}
//! {"event": "SIM", "value": "DONE"}
//! ```
//!
//! `SIM` carries a string status while the other kinds carry an unsigned integer.
//! Subscribers depend on that asymmetry, so [`Event::to_frame`] reproduces it exactly.

use arrayvec::ArrayString;
use core::fmt::Write;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

pub const MAX_EVENT_FRAME_LEN: usize = 128;

pub type EventFrame = ArrayString<MAX_EVENT_FRAME_LEN>;

const LONGEST_FRAME: &str = r#"{"event": "PORTB", "value": 4294967295}"#;
const_assert!(LONGEST_FRAME.len() <= MAX_EVENT_FRAME_LEN);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "UART")]
    Uart,
    #[serde(rename = "PORTB")]
    PortB,
    #[serde(rename = "SIM")]
    Sim,
}

impl EventKind {
    pub const fn tag(self) -> &'static str {
        match self {
            EventKind::Uart => "UART",
            EventKind::PortB => "PORTB",
            EventKind::Sim => "SIM",
        }
    }
}

/// How a simulation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SimStatus {
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "CRASH")]
    Crash,
}

impl SimStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            SimStatus::Done => "DONE",
            SimStatus::Crash => "CRASH",
        }
    }
}

impl core::fmt::Display for SimStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observable change in the simulated hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent", into = "RawEvent")]
pub enum Event {
    /// A byte shifted out of USART0.
    Uart(u32),
    /// New value of the PORTB output register.
    PortB(u32),
    /// Terminal event, always the last one a run produces.
    Sim(SimStatus),
}

impl Event {
    pub const fn kind(&self) -> EventKind {
        match self {
            Event::Uart(_) => EventKind::Uart,
            Event::PortB(_) => EventKind::PortB,
            Event::Sim(_) => EventKind::Sim,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Event::Sim(_))
    }

    /// Formats the wire representation into a stack buffer.
    pub fn to_frame(&self) -> EventFrame {
        let mut frame = EventFrame::new();
        let result = match self {
            Event::Uart(value) | Event::PortB(value) => write!(
                frame,
                r#"{{"event": "{}", "value": {}}}"#,
                self.kind().tag(),
                value
            ),
            Event::Sim(status) => write!(
                frame,
                r#"{{"event": "{}", "value": "{}"}}"#,
                self.kind().tag(),
                status.as_str()
            ),
        };
        debug_assert!(result.is_ok(), "event frame exceeds {MAX_EVENT_FRAME_LEN} bytes");
        frame
    }

    /// Parses a frame produced by [`Event::to_frame`] (any JSON whitespace is accepted).
    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

impl core::fmt::Display for Event {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.to_frame())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawEvent {
    event: EventKind,
    value: RawValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Number(u32),
    Status(SimStatus),
}

impl From<Event> for RawEvent {
    fn from(event: Event) -> Self {
        let value = match event {
            Event::Uart(value) | Event::PortB(value) => RawValue::Number(value),
            Event::Sim(status) => RawValue::Status(status),
        };
        RawEvent {
            event: event.kind(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("{0:?} events carry an integer value")]
    ExpectedNumber(EventKind),
    #[error("SIM events carry a \"DONE\" or \"CRASH\" status")]
    ExpectedStatus,
}

impl TryFrom<RawEvent> for Event {
    type Error = EventError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        match (raw.event, raw.value) {
            (EventKind::Uart, RawValue::Number(value)) => Ok(Event::Uart(value)),
            (EventKind::PortB, RawValue::Number(value)) => Ok(Event::PortB(value)),
            (EventKind::Sim, RawValue::Status(status)) => Ok(Event::Sim(status)),
            (EventKind::Sim, RawValue::Number(_)) => Err(EventError::ExpectedStatus),
            (kind, RawValue::Status(_)) => Err(EventError::ExpectedNumber(kind)),
        }
    }
}
