use super::decode::{decode, is_two_word, Adjust, Instruction, Pointer};
use super::device::{self, McuSpec};
use crate::image::FirmwareImage;
use crate::machine::{CpuState, HookTable, Machine, MachineError, Signal, SignalHook};
use std::time::Duration;
use tracing::warn;

// SREG bit positions
const C: u8 = 0;
const Z: u8 = 1;
const N: u8 = 2;
const V: u8 = 3;
const S: u8 = 4;
const H: u8 = 5;
const T: u8 = 6;
const I: u8 = 7;

/// Why the core stopped with [`CpuState::Crashed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("invalid opcode 0x{opcode:04x} at 0x{pc:04x}")]
    InvalidOpcode { pc: u32, opcode: u16 },
    /// `BREAK` with no debugger attached. simavr ignores it in that case; this
    /// core stops with `CRASH`.
    #[error("BREAK at 0x{pc:04x} with no debugger attached")]
    Break { pc: u32 },
    #[error("program counter 0x{0:04x} is outside code memory")]
    PcOutOfRange(u32),
    #[error("data access at 0x{0:04x} is outside data memory")]
    DataOutOfRange(u32),
    #[error("program memory read at 0x{0:04x} is outside flash")]
    FlashOutOfRange(u32),
}

/// An ATmega core with USART0 and port B wired to signal hooks.
///
/// Word addressing is used for the program counter, byte addressing for flash
/// contents and data memory. Registers r0..r31 live at data addresses 0x00..0x1F.
pub struct Avr {
    spec: &'static McuSpec,
    frequency: u32,
    flash: Vec<u8>,
    code_end: u32,
    data: Vec<u8>,
    pc: u32,
    sp: u16,
    sreg: u8,
    cycles: u64,
    state: CpuState,
    fault: Option<Fault>,
    hooks: HookTable,
}

impl Avr {
    pub fn new(spec: &'static McuSpec, frequency: u32) -> Result<Self, MachineError> {
        if frequency == 0 {
            return Err(MachineError::InvalidFrequency);
        }

        Ok(Self {
            spec,
            frequency,
            flash: vec![0xFF; spec.flash_size],
            code_end: spec.flash_size as u32,
            data: vec![0; spec.data_size()],
            pc: 0,
            sp: spec.ram_end,
            sreg: 0,
            cycles: 0,
            state: CpuState::Running,
            fault: None,
            hooks: HookTable::new(),
        })
    }

    pub fn by_name(name: &str, frequency: u32) -> Result<Self, MachineError> {
        Self::new(device::lookup(name)?, frequency)
    }

    /// Copy an image into flash and point the program counter at its first byte.
    pub fn load_image(&mut self, image: &FirmwareImage) -> Result<(), MachineError> {
        if image.end() > self.flash.len() as u64 {
            return Err(MachineError::ImageTooLarge {
                base: image.base,
                size: image.len(),
                flash_size: self.flash.len(),
            });
        }

        let base = image.base as usize;
        self.flash[base..base + image.len()].copy_from_slice(&image.bytes);
        self.pc = image.base / 2;
        self.code_end = self.flash.len() as u32;
        Ok(())
    }

    /// Load little-endian instruction words at address 0.
    pub fn load_program(&mut self, words: &[u16]) -> Result<(), MachineError> {
        let bytes = words.iter().flat_map(|word| word.to_le_bytes()).collect();
        self.load_image(&FirmwareImage { base: 0, bytes })
    }

    pub fn spec(&self) -> &'static McuSpec {
        self.spec
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Program counter, in words.
    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn sp(&self) -> u16 {
        self.sp
    }

    pub fn sreg(&self) -> u8 {
        self.sreg
    }

    pub fn register(&self, index: u8) -> u8 {
        self.data[usize::from(index & 0x1F)]
    }

    /// Raw data memory contents, bypassing peripheral side effects.
    pub fn data_at(&self, address: u16) -> Option<u8> {
        self.data.get(usize::from(address)).copied()
    }

    pub fn state(&self) -> CpuState {
        self.state
    }

    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    /// Simulated time elapsed at the configured clock frequency.
    pub fn sim_time(&self) -> Duration {
        let nanos = u128::from(self.cycles) * 1_000_000_000 / u128::from(self.frequency);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    fn flag(&self, bit: u8) -> bool {
        self.sreg & (1 << bit) != 0
    }

    fn set_flag(&mut self, bit: u8, value: bool) {
        if value {
            self.sreg |= 1 << bit;
        } else {
            self.sreg &= !(1 << bit);
        }
    }

    // N and Z from the result, S from N and the already-updated V.
    fn set_nz(&mut self, result: u8) {
        let negative = result & 0x80 != 0;
        self.set_flag(N, negative);
        self.set_flag(Z, result == 0);
        self.set_flag(S, negative ^ self.flag(V));
    }

    fn reg(&self, index: u8) -> u8 {
        self.data[usize::from(index)]
    }

    fn set_reg(&mut self, index: u8, value: u8) {
        self.data[usize::from(index)] = value;
    }

    fn reg_pair(&self, low: u8) -> u16 {
        u16::from_le_bytes([self.reg(low), self.reg(low + 1)])
    }

    fn set_reg_pair(&mut self, low: u8, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.set_reg(low, lo);
        self.set_reg(low + 1, hi);
    }

    fn data_index(&self, address: u32) -> Result<usize, Fault> {
        match u16::try_from(address) {
            Ok(address) if address <= self.spec.ram_end => Ok(usize::from(address)),
            _ => Err(Fault::DataOutOfRange(address)),
        }
    }

    fn read_data(&self, address: u32) -> Result<u8, Fault> {
        let index = self.data_index(address)?;
        Ok(match index as u16 {
            device::SREG => self.sreg,
            device::SPL => self.sp.to_le_bytes()[0],
            device::SPH => self.sp.to_le_bytes()[1],
            device::PINB => self.data[usize::from(device::PORTB)],
            device::UCSR0A => {
                self.data[index] | device::UCSR0A_UDRE0 | device::UCSR0A_TXC0
            }
            _ => self.data[index],
        })
    }

    fn write_data(&mut self, address: u32, value: u8) -> Result<(), Fault> {
        let index = self.data_index(address)?;
        match index as u16 {
            device::SREG => self.sreg = value,
            device::SPL => self.sp = (self.sp & 0xFF00) | u16::from(value),
            device::SPH => self.sp = (self.sp & 0x00FF) | (u16::from(value) << 8),
            device::UDR0 => {
                self.data[index] = value;
                self.hooks.raise(Signal::UartOutput, u32::from(value));
            }
            device::PORTB => self.set_port_b(value),
            // Writing ones to PINx toggles the matching PORTx bits.
            device::PINB => {
                let toggled = self.data[usize::from(device::PORTB)] ^ value;
                self.set_port_b(toggled);
            }
            _ => self.data[index] = value,
        }
        Ok(())
    }

    fn set_port_b(&mut self, value: u8) {
        let slot = &mut self.data[usize::from(device::PORTB)];
        let previous = std::mem::replace(slot, value);
        if previous != value {
            self.hooks.raise(Signal::PortB, u32::from(value));
        }
    }

    fn io_address(a: u8) -> u32 {
        u32::from(device::IO_BASE) + u32::from(a)
    }

    // SBI/CBI touch a single bit, so on PINB only that bit's toggle is written.
    fn write_io_bit(&mut self, a: u8, b: u8, set: bool) -> Result<(), Fault> {
        let address = Self::io_address(a);
        let mask = 1 << b;
        let value = if address == u32::from(device::PINB) {
            if set {
                mask
            } else {
                0
            }
        } else if set {
            self.read_data(address)? | mask
        } else {
            self.read_data(address)? & !mask
        };
        self.write_data(address, value)
    }

    fn push(&mut self, value: u8) -> Result<(), Fault> {
        self.write_data(u32::from(self.sp), value)?;
        self.sp = self.sp.wrapping_sub(1);
        Ok(())
    }

    fn pop(&mut self) -> Result<u8, Fault> {
        self.sp = self.sp.wrapping_add(1);
        self.read_data(u32::from(self.sp))
    }

    fn push_return(&mut self, address: u32) -> Result<(), Fault> {
        let [lo, hi, ..] = address.to_le_bytes();
        self.push(lo)?;
        self.push(hi)
    }

    fn pop_return(&mut self) -> Result<u32, Fault> {
        let hi = self.pop()?;
        let lo = self.pop()?;
        Ok(u32::from(u16::from_le_bytes([lo, hi])))
    }

    fn fetch(&self, pc: u32) -> Result<u16, Fault> {
        let byte = pc as usize * 2;
        if byte + 1 >= self.code_end as usize {
            return Err(Fault::PcOutOfRange(pc * 2));
        }
        Ok(u16::from_le_bytes([self.flash[byte], self.flash[byte + 1]]))
    }

    fn jump_relative(&mut self, k: i16) {
        let words = (self.flash.len() / 2) as i64;
        self.pc = (i64::from(self.pc) + i64::from(k)).rem_euclid(words) as u32;
    }

    // Skips the instruction at the current PC; returns the extra cycles spent.
    fn skip_next(&mut self) -> Result<u64, Fault> {
        let words = if is_two_word(self.fetch(self.pc)?) { 2 } else { 1 };
        self.pc += words;
        Ok(u64::from(words))
    }

    fn add(&mut self, a: u8, b: u8, carry: bool) -> u8 {
        let r = a.wrapping_add(b).wrapping_add(u8::from(carry));
        let (a7, b7, r7) = (a & 0x80 != 0, b & 0x80 != 0, r & 0x80 != 0);
        let (a3, b3, r3) = (a & 0x08 != 0, b & 0x08 != 0, r & 0x08 != 0);
        self.set_flag(H, (a3 && b3) || (b3 && !r3) || (!r3 && a3));
        self.set_flag(V, (a7 && b7 && !r7) || (!a7 && !b7 && r7));
        self.set_flag(C, (a7 && b7) || (b7 && !r7) || (!r7 && a7));
        self.set_nz(r);
        r
    }

    // `keep_zero` gives the SBC/SBCI/CPC behaviour where Z can only be cleared.
    fn sub(&mut self, a: u8, b: u8, carry: bool, keep_zero: bool) -> u8 {
        let r = a.wrapping_sub(b).wrapping_sub(u8::from(carry));
        let (a7, b7, r7) = (a & 0x80 != 0, b & 0x80 != 0, r & 0x80 != 0);
        let (a3, b3, r3) = (a & 0x08 != 0, b & 0x08 != 0, r & 0x08 != 0);
        let previous_zero = self.flag(Z);
        self.set_flag(H, (!a3 && b3) || (b3 && r3) || (r3 && !a3));
        self.set_flag(V, (a7 && !b7 && !r7) || (!a7 && b7 && r7));
        self.set_flag(C, (!a7 && b7) || (b7 && r7) || (r7 && !a7));
        self.set_nz(r);
        if keep_zero {
            self.set_flag(Z, r == 0 && previous_zero);
        }
        r
    }

    fn logic(&mut self, r: u8) -> u8 {
        self.set_flag(V, false);
        self.set_nz(r);
        r
    }

    fn shift_right(&mut self, r: u8, carry_out: bool) -> u8 {
        self.set_flag(C, carry_out);
        self.set_flag(V, (r & 0x80 != 0) ^ carry_out);
        self.set_nz(r);
        r
    }

    fn indirect_address(&mut self, ptr: Pointer, adjust: Adjust) -> u32 {
        let low = ptr.low_register();
        let base = self.reg_pair(low);
        match adjust {
            Adjust::None => u32::from(base),
            Adjust::PostIncrement => {
                self.set_reg_pair(low, base.wrapping_add(1));
                u32::from(base)
            }
            Adjust::PreDecrement => {
                let address = base.wrapping_sub(1);
                self.set_reg_pair(low, address);
                u32::from(address)
            }
        }
    }

    fn execute(&mut self) -> Result<CpuState, Fault> {
        use Instruction as Op;

        let pc = self.pc;
        let op = self.fetch(pc)?;
        let next = if is_two_word(op) { self.fetch(pc + 1)? } else { 0 };
        let instruction = decode(op, next);
        self.pc = pc + instruction.words();

        let mut cycles: u64 = 1;
        match instruction {
            Op::Nop | Op::Wdr => {}
            Op::Movw { d, r } => {
                let value = self.reg_pair(r);
                self.set_reg_pair(d, value);
            }
            Op::Mul { d, r } => {
                let product = u16::from(self.reg(d)) * u16::from(self.reg(r));
                self.set_reg_pair(0, product);
                self.set_flag(C, product & 0x8000 != 0);
                self.set_flag(Z, product == 0);
                cycles = 2;
            }
            Op::Add { d, r } => {
                let value = self.add(self.reg(d), self.reg(r), false);
                self.set_reg(d, value);
            }
            Op::Adc { d, r } => {
                let value = self.add(self.reg(d), self.reg(r), self.flag(C));
                self.set_reg(d, value);
            }
            Op::Sub { d, r } => {
                let value = self.sub(self.reg(d), self.reg(r), false, false);
                self.set_reg(d, value);
            }
            Op::Sbc { d, r } => {
                let value = self.sub(self.reg(d), self.reg(r), self.flag(C), true);
                self.set_reg(d, value);
            }
            Op::Cp { d, r } => {
                self.sub(self.reg(d), self.reg(r), false, false);
            }
            Op::Cpc { d, r } => {
                self.sub(self.reg(d), self.reg(r), self.flag(C), true);
            }
            Op::Cpse { d, r } => {
                if self.reg(d) == self.reg(r) {
                    cycles += self.skip_next()?;
                }
            }
            Op::And { d, r } => {
                let value = self.logic(self.reg(d) & self.reg(r));
                self.set_reg(d, value);
            }
            Op::Or { d, r } => {
                let value = self.logic(self.reg(d) | self.reg(r));
                self.set_reg(d, value);
            }
            Op::Eor { d, r } => {
                let value = self.logic(self.reg(d) ^ self.reg(r));
                self.set_reg(d, value);
            }
            Op::Mov { d, r } => self.set_reg(d, self.reg(r)),
            Op::Cpi { d, k } => {
                self.sub(self.reg(d), k, false, false);
            }
            Op::Subi { d, k } => {
                let value = self.sub(self.reg(d), k, false, false);
                self.set_reg(d, value);
            }
            Op::Sbci { d, k } => {
                let value = self.sub(self.reg(d), k, self.flag(C), true);
                self.set_reg(d, value);
            }
            Op::Andi { d, k } => {
                let value = self.logic(self.reg(d) & k);
                self.set_reg(d, value);
            }
            Op::Ori { d, k } => {
                let value = self.logic(self.reg(d) | k);
                self.set_reg(d, value);
            }
            Op::Ldi { d, k } => self.set_reg(d, k),
            Op::Ldd { d, ptr, q } => {
                let address = u32::from(self.reg_pair(ptr.low_register())) + u32::from(q);
                let value = self.read_data(address)?;
                self.set_reg(d, value);
                cycles = 2;
            }
            Op::Std { r, ptr, q } => {
                let address = u32::from(self.reg_pair(ptr.low_register())) + u32::from(q);
                self.write_data(address, self.reg(r))?;
                cycles = 2;
            }
            Op::Ld { d, ptr, adjust } => {
                let address = self.indirect_address(ptr, adjust);
                let value = self.read_data(address)?;
                self.set_reg(d, value);
                cycles = 2;
            }
            Op::St { r, ptr, adjust } => {
                let value = self.reg(r);
                let address = self.indirect_address(ptr, adjust);
                self.write_data(address, value)?;
                cycles = 2;
            }
            Op::Lds { d, address } => {
                let value = self.read_data(u32::from(address))?;
                self.set_reg(d, value);
                cycles = 2;
            }
            Op::Sts { r, address } => {
                self.write_data(u32::from(address), self.reg(r))?;
                cycles = 2;
            }
            Op::Lpm { d, post_increment } => {
                let z = self.reg_pair(30);
                let value = *self
                    .flash
                    .get(usize::from(z))
                    .ok_or(Fault::FlashOutOfRange(u32::from(z)))?;
                self.set_reg(d, value);
                if post_increment {
                    self.set_reg_pair(30, z.wrapping_add(1));
                }
                cycles = 3;
            }
            Op::Push { r } => {
                self.push(self.reg(r))?;
                cycles = 2;
            }
            Op::Pop { d } => {
                let value = self.pop()?;
                self.set_reg(d, value);
                cycles = 2;
            }
            Op::Com { d } => {
                let value = self.logic(!self.reg(d));
                self.set_flag(C, true);
                self.set_reg(d, value);
            }
            Op::Neg { d } => {
                let a = self.reg(d);
                let r = 0u8.wrapping_sub(a);
                self.set_flag(H, (r & 0x08 != 0) || (a & 0x08 != 0));
                self.set_flag(V, r == 0x80);
                self.set_flag(C, r != 0);
                self.set_nz(r);
                self.set_reg(d, r);
            }
            Op::Swap { d } => self.set_reg(d, self.reg(d).rotate_left(4)),
            Op::Inc { d } => {
                let r = self.reg(d).wrapping_add(1);
                self.set_flag(V, r == 0x80);
                self.set_nz(r);
                self.set_reg(d, r);
            }
            Op::Dec { d } => {
                let r = self.reg(d).wrapping_sub(1);
                self.set_flag(V, r == 0x7F);
                self.set_nz(r);
                self.set_reg(d, r);
            }
            Op::Asr { d } => {
                let a = self.reg(d);
                let value = self.shift_right((a >> 1) | (a & 0x80), a & 0x01 != 0);
                self.set_reg(d, value);
            }
            Op::Lsr { d } => {
                let a = self.reg(d);
                let value = self.shift_right(a >> 1, a & 0x01 != 0);
                self.set_reg(d, value);
            }
            Op::Ror { d } => {
                let a = self.reg(d);
                let carry_in = u8::from(self.flag(C)) << 7;
                let value = self.shift_right((a >> 1) | carry_in, a & 0x01 != 0);
                self.set_reg(d, value);
            }
            Op::Bset { s } => self.set_flag(s, true),
            Op::Bclr { s } => self.set_flag(s, false),
            Op::Bst { d, b } => self.set_flag(T, self.reg(d) & (1 << b) != 0),
            Op::Bld { d, b } => {
                let value = if self.flag(T) {
                    self.reg(d) | (1 << b)
                } else {
                    self.reg(d) & !(1 << b)
                };
                self.set_reg(d, value);
            }
            Op::Sbrc { r, b } => {
                if self.reg(r) & (1 << b) == 0 {
                    cycles += self.skip_next()?;
                }
            }
            Op::Sbrs { r, b } => {
                if self.reg(r) & (1 << b) != 0 {
                    cycles += self.skip_next()?;
                }
            }
            Op::Cbi { a, b } => {
                self.write_io_bit(a, b, false)?;
                cycles = 2;
            }
            Op::Sbi { a, b } => {
                self.write_io_bit(a, b, true)?;
                cycles = 2;
            }
            Op::Sbic { a, b } => {
                if self.read_data(Self::io_address(a))? & (1 << b) == 0 {
                    cycles += self.skip_next()?;
                }
            }
            Op::Sbis { a, b } => {
                if self.read_data(Self::io_address(a))? & (1 << b) != 0 {
                    cycles += self.skip_next()?;
                }
            }
            Op::Adiw { d, k } => {
                let value = self.reg_pair(d);
                let r = value.wrapping_add(u16::from(k));
                let (high7, r15) = (value & 0x8000 != 0, r & 0x8000 != 0);
                self.set_flag(V, !high7 && r15);
                self.set_flag(C, !r15 && high7);
                self.set_flag(N, r15);
                self.set_flag(Z, r == 0);
                self.set_flag(S, r15 ^ (!high7 && r15));
                self.set_reg_pair(d, r);
                cycles = 2;
            }
            Op::Sbiw { d, k } => {
                let value = self.reg_pair(d);
                let r = value.wrapping_sub(u16::from(k));
                let (high7, r15) = (value & 0x8000 != 0, r & 0x8000 != 0);
                self.set_flag(V, high7 && !r15);
                self.set_flag(C, r15 && !high7);
                self.set_flag(N, r15);
                self.set_flag(Z, r == 0);
                self.set_flag(S, r15 ^ (high7 && !r15));
                self.set_reg_pair(d, r);
                cycles = 2;
            }
            Op::In { d, a } => {
                let value = self.read_data(Self::io_address(a))?;
                self.set_reg(d, value);
            }
            Op::Out { a, r } => self.write_data(Self::io_address(a), self.reg(r))?,
            // `rjmp .-2` with interrupts off can never be left: avr-libc's exit loop.
            Op::Rjmp { k: -1 } if !self.flag(I) => {
                self.pc = pc;
                self.cycles += 2;
                return Ok(CpuState::Done);
            }
            Op::Rjmp { k } => {
                self.jump_relative(k);
                cycles = 2;
            }
            Op::Rcall { k } => {
                self.push_return(self.pc)?;
                self.jump_relative(k);
                cycles = 3;
            }
            Op::Jmp { k } => {
                self.pc = k;
                cycles = 3;
            }
            Op::Call { k } => {
                self.push_return(self.pc)?;
                self.pc = k;
                cycles = 4;
            }
            Op::Ijmp => {
                self.pc = u32::from(self.reg_pair(30));
                cycles = 2;
            }
            Op::Icall => {
                self.push_return(self.pc)?;
                self.pc = u32::from(self.reg_pair(30));
                cycles = 3;
            }
            Op::Ret => {
                self.pc = self.pop_return()?;
                cycles = 4;
            }
            Op::Reti => {
                self.pc = self.pop_return()?;
                self.set_flag(I, true);
                cycles = 4;
            }
            Op::Brbs { s, k } => {
                if self.flag(s) {
                    self.jump_relative(i16::from(k));
                    cycles = 2;
                }
            }
            Op::Brbc { s, k } => {
                if !self.flag(s) {
                    self.jump_relative(i16::from(k));
                    cycles = 2;
                }
            }
            // No interrupt sources are modelled, so a sleeping core never wakes.
            Op::Sleep => {
                self.cycles += cycles;
                return Ok(CpuState::Done);
            }
            Op::Break => return Err(Fault::Break { pc: pc * 2 }),
            Op::Unknown(opcode) => return Err(Fault::InvalidOpcode { pc: pc * 2, opcode }),
        }

        self.cycles += cycles;
        Ok(CpuState::Running)
    }
}

impl Machine for Avr {
    fn step(&mut self) -> CpuState {
        if self.state.is_terminal() {
            return self.state;
        }

        self.state = match self.execute() {
            Ok(state) => state,
            Err(fault) => {
                warn!("💥 {} crashed: {}", self.spec.name, fault);
                self.fault = Some(fault);
                CpuState::Crashed
            }
        };
        self.state
    }

    fn register_hook(&mut self, signal: Signal, hook: SignalHook) -> Result<(), MachineError> {
        self.hooks.register(signal, hook)
    }

    fn cycles(&self) -> u64 {
        self.cycles
    }
}

impl core::fmt::Debug for Avr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Avr")
            .field("mcu", &self.spec.name)
            .field("pc", &format_args!("0x{:04x}", self.pc * 2))
            .field("sp", &format_args!("0x{:04x}", self.sp))
            .field("sreg", &format_args!("0b{:08b}", self.sreg))
            .field("cycles", &self.cycles)
            .field("state", &self.state)
            .field("hooks", &self.hooks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_with(program: &[u16]) -> Avr {
        let mut avr = Avr::by_name("atmega328p", 16_000_000).unwrap();
        avr.load_program(program).unwrap();
        avr
    }

    fn run(avr: &mut Avr, max_steps: usize) -> CpuState {
        for _ in 0..max_steps {
            let state = avr.step();
            if state.is_terminal() {
                return state;
            }
        }
        avr.state()
    }

    #[test]
    fn test_add_sets_carry_and_zero() {
        // ldi r16, 0xFF; ldi r17, 0x01; add r16, r17; sleep
        let mut avr = core_with(&[0xEF0F, 0xE011, 0x0F01, 0x9588]);
        assert_eq!(run(&mut avr, 10), CpuState::Done);
        assert_eq!(avr.register(16), 0);
        assert!(avr.flag(C));
        assert!(avr.flag(Z));
        assert!(avr.flag(H));
    }

    #[test]
    fn test_sbc_keeps_zero_only_when_previously_set() {
        // ldi r16, 1; ldi r17, 1; cp r16, r17 (Z=1); sbc r16, r17 (0, Z stays); sleep
        let mut avr = core_with(&[0xE001, 0xE011, 0x1701, 0x0B01, 0x9588]);
        assert_eq!(run(&mut avr, 10), CpuState::Done);
        assert_eq!(avr.register(16), 0);
        assert!(avr.flag(Z));
        assert!(!avr.flag(C));
    }

    #[test]
    fn test_call_and_ret_round_trip() {
        // 0: rcall +2 -> 3 ; 1: sleep ; 2: nop ; 3: ldi r24, 7 ; 4: ret
        let mut avr = core_with(&[0xD002, 0x9588, 0x0000, 0xE087, 0x9508]);
        let sp = avr.sp();
        assert_eq!(run(&mut avr, 10), CpuState::Done);
        assert_eq!(avr.register(24), 7);
        assert_eq!(avr.sp(), sp);
        // sleep at word 1 leaves the pc just past it
        assert_eq!(avr.pc(), 2);
    }

    #[test]
    fn test_skip_over_two_word_instruction() {
        // ldi r16, 0; cpse r16, r16; sts 0x0100, r16 (skipped); sleep
        let mut avr = core_with(&[0xE000, 0x1300, 0x9300, 0x0100, 0x9588]);
        assert_eq!(run(&mut avr, 10), CpuState::Done);
        assert_eq!(avr.data_at(0x0100), Some(0));
        // ldi 1 + cpse 1 + two-word skip 2 + sleep 1
        assert_eq!(avr.cycles(), 5);
    }

    #[test]
    fn test_sbiw_borrows_across_the_pair() {
        // ldi r24, 0x00; ldi r25, 0x01; sbiw r24, 1; sleep
        let mut avr = core_with(&[0xE080, 0xE091, 0x9701, 0x9588]);
        assert_eq!(run(&mut avr, 10), CpuState::Done);
        assert_eq!(avr.reg_pair(24), 0x00FF);
        assert!(!avr.flag(C));
        assert!(!avr.flag(Z));
    }

    #[test]
    fn test_stack_pointer_is_memory_mapped() {
        // ldi r16, 0x34; out SPL, r16; ldi r16, 0x02; out SPH, r16; sleep
        let mut avr = core_with(&[0xE304, 0xBF0D, 0xE002, 0xBF0E, 0x9588]);
        assert_eq!(run(&mut avr, 10), CpuState::Done);
        assert_eq!(avr.sp(), 0x0234);
    }

    #[test]
    fn test_sim_time_tracks_cycles() {
        let mut avr = core_with(&[0x0000, 0x0000, 0x9588]);
        assert_eq!(run(&mut avr, 10), CpuState::Done);
        assert_eq!(avr.cycles(), 3);
        assert_eq!(avr.sim_time(), Duration::from_nanos(187));
    }
}
