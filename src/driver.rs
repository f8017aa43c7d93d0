use crate::event::{Event, SimStatus};
use crate::machine::{CpuState, Machine, MachineError, Signal};
use crate::queue::EventQueue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::info;

pub const SIM_THREAD_NAME: &str = "sim";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverReport {
    pub status: SimStatus,
    pub steps: u64,
    pub cycles: u64,
    /// Events pushed by this driver, terminal event included.
    pub events_emitted: u64,
    pub elapsed_ms: u64,
}

/// Runs a [`Machine`] to completion, turning signal changes into queued events.
///
/// Hooks are wired in [`SimulationDriver::new`]; once constructed there is no way
/// to add or remove them, so the machine's hook set is fixed for the whole run.
pub struct SimulationDriver<M: Machine> {
    machine: M,
    queue: Arc<EventQueue>,
    emitted: Arc<AtomicU64>,
}

impl<M: Machine> SimulationDriver<M> {
    pub fn new(mut machine: M, queue: Arc<EventQueue>) -> Result<Self, MachineError> {
        let emitted = Arc::new(AtomicU64::new(0));
        install_hook(&mut machine, Signal::UartOutput, &queue, &emitted, Event::Uart)?;
        install_hook(&mut machine, Signal::PortB, &queue, &emitted, Event::PortB)?;

        Ok(Self {
            machine,
            queue,
            emitted,
        })
    }

    /// Step until the machine reaches a terminal state, then push exactly one
    /// `SIM` event carrying that state.
    pub fn run(mut self) -> DriverReport {
        let started = Instant::now();
        let mut steps: u64 = 0;

        let status = loop {
            steps += 1;
            match self.machine.step() {
                CpuState::Running => {}
                CpuState::Done => break SimStatus::Done,
                CpuState::Crashed => break SimStatus::Crash,
            }
        };

        self.queue.push(Event::Sim(status));
        let events_emitted = self.emitted.fetch_add(1, Ordering::Relaxed) + 1;

        let report = DriverReport {
            status,
            steps,
            cycles: self.machine.cycles(),
            events_emitted,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "🏁 Simulation finished: {} after {} steps ({} cycles, {} events)",
            report.status, report.steps, report.cycles, report.events_emitted
        );
        report
    }
}

impl<M: Machine + 'static> SimulationDriver<M> {
    /// Move the driver onto its own named thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<DriverReport>> {
        thread::Builder::new()
            .name(SIM_THREAD_NAME.into())
            .spawn(move || self.run())
    }
}

fn install_hook<M: Machine>(
    machine: &mut M,
    signal: Signal,
    queue: &Arc<EventQueue>,
    emitted: &Arc<AtomicU64>,
    to_event: fn(u32) -> Event,
) -> Result<(), MachineError> {
    let queue = Arc::clone(queue);
    let emitted = Arc::clone(emitted);
    machine.register_hook(
        signal,
        Box::new(move |value| {
            queue.push(to_event(value));
            emitted.fetch_add(1, Ordering::Relaxed);
        }),
    )
}
