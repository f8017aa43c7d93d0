use super::{Readiness, Transport};
use std::io::{self, Stdout, Write};
use std::time::Duration;

/// Writes each frame as one line to a byte sink. Always writable until closed.
#[derive(Debug)]
pub struct LineTransport<W: Write> {
    out: W,
    closed: bool,
}

impl LineTransport<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> LineTransport<W> {
    pub fn new(out: W) -> Self {
        Self { out, closed: false }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Transport for LineTransport<W> {
    async fn service(&mut self, _timeout: Duration) -> Readiness {
        if self.closed {
            Readiness::Closed
        } else {
            Readiness::Writable
        }
    }

    async fn write(&mut self, frame: &str) -> bool {
        if self.closed {
            return false;
        }
        writeln!(self.out, "{frame}").and_then(|()| self.out.flush()).is_ok()
    }

    async fn close(&mut self) {
        let _ = self.out.flush();
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_become_lines() {
        let mut transport = LineTransport::new(Vec::new());
        assert_eq!(transport.service(Duration::from_millis(1)).await, Readiness::Writable);
        assert!(transport.write(r#"{"event": "UART", "value": 72}"#).await);
        assert!(transport.write(r#"{"event": "SIM", "value": "DONE"}"#).await);

        transport.close().await;
        assert_eq!(transport.service(Duration::from_millis(1)).await, Readiness::Closed);
        assert!(!transport.write("late").await);

        let written = String::from_utf8(transport.into_inner()).unwrap();
        assert_eq!(
            written,
            "{\"event\": \"UART\", \"value\": 72}\n{\"event\": \"SIM\", \"value\": \"DONE\"}\n"
        );
    }
}
