//! An ATmega48/88/168/328-family core: decoder, execution unit and device table.

pub mod cpu;
pub mod decode;
pub mod device;

pub use cpu::{Avr, Fault};
pub use device::{lookup, McuSpec, SUPPORTED_MCUS};
