use crate::config::{BridgeConfig, ConfigError};
use crate::driver::{DriverReport, SimulationDriver, SIM_THREAD_NAME};
use crate::image::ImageError;
use crate::machine::{Machine, MachineError};
use crate::publisher::{Publisher, PublisherStats, PUBLISHER_THREAD_NAME};
use crate::queue::EventQueue;
use crate::transport::{Transport, TransportError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("firmware image error: {0}")]
    Image(#[from] ImageError),
    #[error("machine error: {0}")]
    Machine(#[from] MachineError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("failed to start {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeReport {
    pub driver: DriverReport,
    pub publisher: PublisherStats,
    /// Events still queued when the publisher gave up.
    pub undelivered: usize,
}

/// Owns one simulation run: the machine, the transport and the queue between them.
pub struct Bridge<M, T> {
    machine: M,
    transport: T,
    config: BridgeConfig,
}

impl<M, T> Bridge<M, T>
where
    M: Machine + 'static,
    T: Transport + Send + 'static,
{
    pub fn new(machine: M, transport: T, config: BridgeConfig) -> Self {
        Self {
            machine,
            transport,
            config,
        }
    }

    /// Run the simulation to completion while publishing its events.
    ///
    /// The publisher thread starts first so it can connect while the simulation
    /// spins up. Once the simulation thread has joined, the publisher is told to
    /// drain and is joined in turn.
    pub fn run(self) -> Result<BridgeReport, BridgeError> {
        self.config.validate()?;

        let queue = Arc::new(EventQueue::new());
        let driver = SimulationDriver::new(self.machine, Arc::clone(&queue))?;
        let publisher = Publisher::new(self.transport, Arc::clone(&queue), &self.config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!("🚀 Starting {} thread", PUBLISHER_THREAD_NAME);
        let publisher_thread = publisher
            .spawn(shutdown_rx)
            .map_err(|source| BridgeError::ThreadSpawn {
                name: PUBLISHER_THREAD_NAME,
                source,
            })?;

        info!("🚀 Starting {} thread", SIM_THREAD_NAME);
        let sim_thread = match driver.spawn() {
            Ok(handle) => handle,
            Err(source) => {
                shutdown_tx.send_replace(true);
                let _ = publisher_thread.join();
                return Err(BridgeError::ThreadSpawn {
                    name: SIM_THREAD_NAME,
                    source,
                });
            }
        };

        let sim_result = sim_thread.join();
        // The publisher may already have stopped on its own, so there may be no
        // receiver left; send_replace does not care.
        shutdown_tx.send_replace(true);
        let publisher_result = publisher_thread.join();

        let driver = sim_result.map_err(|_| BridgeError::ThreadPanicked(SIM_THREAD_NAME))?;
        let publisher = publisher_result.map_err(|_| BridgeError::ThreadPanicked(PUBLISHER_THREAD_NAME))?;

        Ok(BridgeReport {
            driver,
            publisher,
            undelivered: queue.len(),
        })
    }
}
