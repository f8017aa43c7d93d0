//! The seam between the bridge and an instruction-level simulator.
//!
//! A [`Machine`] advances one scheduling step at a time and reports signal changes
//! through hooks registered before the run starts. Hooks run synchronously on the
//! thread calling [`Machine::step`] and must not block.

use heapless::Vec;
use serde::{Deserialize, Serialize};

pub const MAX_HOOKS_PER_SIGNAL: usize = 4;

pub type SignalHook = Box<dyn FnMut(u32) + Send>;

/// Hardware signals a hook can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    /// Byte written to the USART0 data register.
    UartOutput,
    /// PORTB output register changed.
    PortB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    Running,
    Done,
    Crashed,
}

impl CpuState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CpuState::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MachineError {
    #[error("unknown MCU '{0}'")]
    UnknownDevice(String),
    #[error("frequency must be greater than 0")]
    InvalidFrequency,
    #[error("image of {size} bytes at 0x{base:04x} does not fit in {flash_size} bytes of flash")]
    ImageTooLarge {
        base: u32,
        size: usize,
        flash_size: usize,
    },
    #[error("too many hooks registered for {0:?}")]
    HookLimit(Signal),
}

pub trait Machine: Send {
    /// Advance by one scheduling step, firing any hooks whose signal changed.
    fn step(&mut self) -> CpuState;

    fn register_hook(&mut self, signal: Signal, hook: SignalHook) -> Result<(), MachineError>;

    /// Clock cycles consumed so far.
    fn cycles(&self) -> u64 {
        0
    }
}

impl<M: Machine + ?Sized> Machine for Box<M> {
    fn step(&mut self) -> CpuState {
        (**self).step()
    }

    fn register_hook(&mut self, signal: Signal, hook: SignalHook) -> Result<(), MachineError> {
        (**self).register_hook(signal, hook)
    }

    fn cycles(&self) -> u64 {
        (**self).cycles()
    }
}

/// Fixed-capacity hook registry, one list per signal.
#[derive(Default)]
pub struct HookTable {
    uart_output: Vec<SignalHook, MAX_HOOKS_PER_SIGNAL>,
    port_b: Vec<SignalHook, MAX_HOOKS_PER_SIGNAL>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn hooks_mut(&mut self, signal: Signal) -> &mut Vec<SignalHook, MAX_HOOKS_PER_SIGNAL> {
        match signal {
            Signal::UartOutput => &mut self.uart_output,
            Signal::PortB => &mut self.port_b,
        }
    }

    pub fn register(&mut self, signal: Signal, hook: SignalHook) -> Result<(), MachineError> {
        self.hooks_mut(signal)
            .push(hook)
            .map_err(|_| MachineError::HookLimit(signal))
    }

    /// Invoke every hook registered for `signal`, in registration order.
    pub fn raise(&mut self, signal: Signal, value: u32) {
        for hook in self.hooks_mut(signal).iter_mut() {
            hook(value);
        }
    }

    pub fn count(&self, signal: Signal) -> usize {
        match signal {
            Signal::UartOutput => self.uart_output.len(),
            Signal::PortB => self.port_b.len(),
        }
    }
}

impl core::fmt::Debug for HookTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HookTable")
            .field("uart_output", &self.uart_output.len())
            .field("port_b", &self.port_b.len())
            .finish()
    }
}
