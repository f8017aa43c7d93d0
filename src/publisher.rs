//! The network side of the bridge.
//!
//! Every tick services the transport once and forwards at most one event. Delivery
//! is at-most-once: an event that fails to write is counted and discarded, never
//! requeued. When the queue is empty the loop sleeps on the queue's wake-up signal
//! rather than spinning on a writable socket.

use crate::config::BridgeConfig;
use crate::event::Event;
use crate::queue::EventQueue;
use crate::transport::{Readiness, Transport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

pub const PUBLISHER_THREAD_NAME: &str = "publisher";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublisherStats {
    pub ticks: u64,
    pub sent: u64,
    pub dropped: u64,
    pub not_writable_ticks: u64,
}

/// What a single service tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Sent(Event),
    Dropped(Event),
    /// Writable, but nothing was queued.
    Idle,
    NotWritable,
    Closed,
}

pub struct Publisher<T: Transport> {
    transport: T,
    queue: Arc<EventQueue>,
    tick_timeout: Duration,
    drain_timeout: Duration,
    stats: PublisherStats,
}

impl<T: Transport> Publisher<T> {
    pub fn new(transport: T, queue: Arc<EventQueue>, config: &BridgeConfig) -> Self {
        Self {
            transport,
            queue,
            tick_timeout: config.tick(),
            drain_timeout: config.drain_timeout(),
            stats: PublisherStats::default(),
        }
    }

    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Service the transport once and, if it is writable, forward one event.
    pub async fn tick(&mut self) -> Tick {
        self.stats.ticks += 1;

        match self.transport.service(self.tick_timeout).await {
            Readiness::Closed => Tick::Closed,
            Readiness::Pending => {
                self.stats.not_writable_ticks += 1;
                Tick::NotWritable
            }
            Readiness::Writable => {
                let Some(event) = self.queue.pop() else {
                    return Tick::Idle;
                };

                let frame = event.to_frame();
                if self.transport.write(&frame).await {
                    self.stats.sent += 1;
                    debug!("📡 Sent {}", frame);
                    Tick::Sent(event)
                } else {
                    self.stats.dropped += 1;
                    debug!("🗑️  Dropped {}", frame);
                    Tick::Dropped(event)
                }
            }
        }
    }

    /// Run until the transport closes, or until `shutdown` flips to `true` and the
    /// queue has drained (or the drain window has passed). Closes the transport
    /// before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> PublisherStats {
        let mut drain_deadline: Option<Instant> = None;
        let mut shutdown_dropped = false;

        loop {
            if drain_deadline.is_none() && (shutdown_dropped || *shutdown.borrow()) {
                info!(
                    "⏳ Simulation ended, draining {} queued events",
                    self.queue.len()
                );
                drain_deadline = Some(Instant::now() + self.drain_timeout);
            }

            if let Some(deadline) = drain_deadline {
                if self.queue.is_empty() {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(
                        "⏰ Drain window closed with {} events still queued",
                        self.queue.len()
                    );
                    break;
                }
            }

            match self.tick().await {
                Tick::Closed => {
                    info!("🔌 Transport closed, publisher stopping");
                    break;
                }
                Tick::Idle if drain_deadline.is_none() => {
                    tokio::select! {
                        () = self.queue.notified() => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                shutdown_dropped = true;
                            }
                        }
                        () = time::sleep(self.tick_timeout) => {}
                    }
                }
                _ => {}
            }
        }

        self.transport.close().await;

        if self.stats.dropped > 0 {
            warn!(
                "📉 {} of {} events dropped by the transport",
                self.stats.dropped,
                self.stats.dropped + self.stats.sent
            );
        }
        info!(
            "📊 Publisher stopped: {} sent, {} dropped, {} ticks",
            self.stats.sent, self.stats.dropped, self.stats.ticks
        );
        self.stats
    }
}

impl<T: Transport + Send + 'static> Publisher<T> {
    /// Start the publisher on its own thread with a single-threaded tokio runtime.
    ///
    /// The runtime is built before the thread is spawned so that both failure modes
    /// surface here, before any simulation work starts.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> std::io::Result<JoinHandle<PublisherStats>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        thread::Builder::new()
            .name(PUBLISHER_THREAD_NAME.into())
            .spawn(move || runtime.block_on(self.run(shutdown)))
    }
}
