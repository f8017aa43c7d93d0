use simboard::bridge::BridgeError;
use simboard::config::ConfigError;
use simboard::machine::{MachineError, SignalHook};
use simboard::{
    Avr, Bridge, BridgeConfig, CpuState, LineTransport, Machine, Readiness, Signal, SimStatus,
    Transport,
};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A `Write` sink the test can read back after the bridge has consumed the transport.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct NeverWritable;

impl Transport for NeverWritable {
    async fn service(&mut self, timeout: Duration) -> Readiness {
        tokio::time::sleep(timeout).await;
        Readiness::Pending
    }

    async fn write(&mut self, _frame: &str) -> bool {
        false
    }

    async fn close(&mut self) {}
}

fn fast_config() -> BridgeConfig {
    BridgeConfig {
        tick_ms: 10,
        drain_ms: 200,
        ..BridgeConfig::default()
    }
}

fn hello_avr() -> Avr {
    let mut avr = Avr::by_name("atmega328p", 16_000_000).unwrap();
    avr.load_program(&[
        0xE408, 0x9300, 0x00C6, // 'H' -> UDR0
        0xE609, 0x9300, 0x00C6, // 'i' -> UDR0
        0xE200, 0xB905, // PORTB = 0x20
        0x94F8, 0xCFFF, // cli; rjmp .-2
    ])
    .unwrap();
    avr
}

#[test]
fn test_bridge_publishes_every_event_in_order() {
    let buffer = SharedBuffer::default();
    let transport = LineTransport::new(buffer.clone());

    let report = Bridge::new(hello_avr(), transport, fast_config()).run().unwrap();

    assert_eq!(
        buffer.lines(),
        vec![
            r#"{"event": "UART", "value": 72}"#,
            r#"{"event": "UART", "value": 105}"#,
            r#"{"event": "PORTB", "value": 32}"#,
            r#"{"event": "SIM", "value": "DONE"}"#,
        ]
    );
    assert_eq!(report.driver.status, SimStatus::Done);
    assert_eq!(report.driver.events_emitted, 4);
    assert_eq!(report.publisher.sent, 4);
    assert_eq!(report.undelivered, 0);
}

#[test]
fn test_simulation_completes_when_nothing_is_writable() {
    let report = Bridge::new(hello_avr(), NeverWritable, fast_config()).run().unwrap();

    assert_eq!(report.driver.status, SimStatus::Done);
    assert_eq!(report.publisher.sent, 0);
    assert_eq!(report.undelivered, 4);
}

#[test]
fn test_crashing_firmware_still_reports_crash() {
    let mut avr = Avr::by_name("atmega328p", 16_000_000).unwrap();
    avr.load_program(&[0xE508, 0x9300, 0x00C6, 0x9404]).unwrap();
    let buffer = SharedBuffer::default();

    let report = Bridge::new(avr, LineTransport::new(buffer.clone()), fast_config())
        .run()
        .unwrap();

    assert_eq!(report.driver.status, SimStatus::Crash);
    assert_eq!(
        buffer.lines().last().map(String::as_str),
        Some(r#"{"event": "SIM", "value": "CRASH"}"#)
    );
}

#[test]
fn test_invalid_config_fails_before_starting() {
    let config = BridgeConfig {
        tick_ms: 0,
        ..BridgeConfig::default()
    };
    let result = Bridge::new(hello_avr(), NeverWritable, config).run();
    assert!(matches!(
        result,
        Err(BridgeError::Config(ConfigError::ZeroDuration("tick_ms")))
    ));
}

#[test]
fn test_hook_failure_fails_before_starting() {
    struct NoHooks;

    impl Machine for NoHooks {
        fn step(&mut self) -> CpuState {
            CpuState::Done
        }

        fn register_hook(&mut self, signal: Signal, _: SignalHook) -> Result<(), MachineError> {
            Err(MachineError::HookLimit(signal))
        }
    }

    let result = Bridge::new(NoHooks, NeverWritable, fast_config()).run();
    assert!(matches!(
        result,
        Err(BridgeError::Machine(MachineError::HookLimit(_)))
    ));
}
