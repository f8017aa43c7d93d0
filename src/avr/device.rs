use crate::machine::MachineError;

/// Memory geometry of a supported part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McuSpec {
    pub name: &'static str,
    pub flash_size: usize,
    pub sram_start: u16,
    pub ram_end: u16,
}

impl McuSpec {
    pub fn data_size(&self) -> usize {
        usize::from(self.ram_end) + 1
    }
}

pub const ATMEGA328P: McuSpec = McuSpec {
    name: "atmega328p",
    flash_size: 32 * 1024,
    sram_start: 0x0100,
    ram_end: 0x08FF,
};

pub const ATMEGA168: McuSpec = McuSpec {
    name: "atmega168",
    flash_size: 16 * 1024,
    sram_start: 0x0100,
    ram_end: 0x04FF,
};

pub const ATMEGA88: McuSpec = McuSpec {
    name: "atmega88",
    flash_size: 8 * 1024,
    sram_start: 0x0100,
    ram_end: 0x04FF,
};

pub const SUPPORTED_MCUS: &[McuSpec] = &[ATMEGA328P, ATMEGA168, ATMEGA88];

pub fn lookup(name: &str) -> Result<&'static McuSpec, MachineError> {
    SUPPORTED_MCUS
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| MachineError::UnknownDevice(name.to_string()))
}

// Data-space addresses shared by the whole ATmega48/88/168/328 family.
pub const IO_BASE: u16 = 0x20;
pub const PINB: u16 = 0x23;
pub const DDRB: u16 = 0x24;
pub const PORTB: u16 = 0x25;
pub const SPL: u16 = 0x5D;
pub const SPH: u16 = 0x5E;
pub const SREG: u16 = 0x5F;
pub const UCSR0A: u16 = 0xC0;
pub const UDR0: u16 = 0xC6;

pub const UCSR0A_TXC0: u8 = 1 << 6;
pub const UCSR0A_UDRE0: u8 = 1 << 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup("ATmega328P").unwrap().name, "atmega328p");
        assert_eq!(lookup("atmega88").unwrap().flash_size, 8192);
    }

    #[test]
    fn test_unknown_device() {
        assert_eq!(
            lookup("attiny85"),
            Err(MachineError::UnknownDevice("attiny85".into()))
        );
    }
}
