//! AVR opcode decoding.
//!
//! Register operands are register numbers (0..=31); I/O operands are I/O space
//! addresses (data address minus 0x20); jump targets are in words.

/// Pointer register used by indirect loads and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointer {
    X,
    Y,
    Z,
}

impl Pointer {
    /// Low register of the pair.
    pub fn low_register(self) -> u8 {
        match self {
            Pointer::X => 26,
            Pointer::Y => 28,
            Pointer::Z => 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjust {
    None,
    PostIncrement,
    PreDecrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Movw { d: u8, r: u8 },
    Mul { d: u8, r: u8 },
    Cpc { d: u8, r: u8 },
    Sbc { d: u8, r: u8 },
    Add { d: u8, r: u8 },
    Cpse { d: u8, r: u8 },
    Cp { d: u8, r: u8 },
    Sub { d: u8, r: u8 },
    Adc { d: u8, r: u8 },
    And { d: u8, r: u8 },
    Eor { d: u8, r: u8 },
    Or { d: u8, r: u8 },
    Mov { d: u8, r: u8 },
    Cpi { d: u8, k: u8 },
    Sbci { d: u8, k: u8 },
    Subi { d: u8, k: u8 },
    Ori { d: u8, k: u8 },
    Andi { d: u8, k: u8 },
    Ldi { d: u8, k: u8 },
    Ldd { d: u8, ptr: Pointer, q: u8 },
    Std { r: u8, ptr: Pointer, q: u8 },
    Ld { d: u8, ptr: Pointer, adjust: Adjust },
    St { r: u8, ptr: Pointer, adjust: Adjust },
    Lds { d: u8, address: u16 },
    Sts { r: u8, address: u16 },
    Lpm { d: u8, post_increment: bool },
    Push { r: u8 },
    Pop { d: u8 },
    Com { d: u8 },
    Neg { d: u8 },
    Swap { d: u8 },
    Inc { d: u8 },
    Dec { d: u8 },
    Asr { d: u8 },
    Lsr { d: u8 },
    Ror { d: u8 },
    Bset { s: u8 },
    Bclr { s: u8 },
    Bst { d: u8, b: u8 },
    Bld { d: u8, b: u8 },
    Sbrc { r: u8, b: u8 },
    Sbrs { r: u8, b: u8 },
    Cbi { a: u8, b: u8 },
    Sbi { a: u8, b: u8 },
    Sbic { a: u8, b: u8 },
    Sbis { a: u8, b: u8 },
    Adiw { d: u8, k: u8 },
    Sbiw { d: u8, k: u8 },
    In { d: u8, a: u8 },
    Out { a: u8, r: u8 },
    Rjmp { k: i16 },
    Rcall { k: i16 },
    Jmp { k: u32 },
    Call { k: u32 },
    Ijmp,
    Icall,
    Ret,
    Reti,
    Brbs { s: u8, k: i8 },
    Brbc { s: u8, k: i8 },
    Sleep,
    Break,
    Wdr,
    Unknown(u16),
}

impl Instruction {
    /// Size in 16-bit words.
    pub fn words(&self) -> u32 {
        match self {
            Instruction::Lds { .. }
            | Instruction::Sts { .. }
            | Instruction::Jmp { .. }
            | Instruction::Call { .. } => 2,
            _ => 1,
        }
    }
}

/// Two-word instructions can be identified from their first word alone.
pub fn is_two_word(op: u16) -> bool {
    (op & 0xFC0F) == 0x9000 || (op & 0xFE0C) == 0x940C
}

fn rd(op: u16) -> u8 {
    ((op >> 4) & 0x1F) as u8
}

fn rr(op: u16) -> u8 {
    ((op & 0x0F) | ((op >> 5) & 0x10)) as u8
}

fn upper_rd(op: u16) -> u8 {
    16 + ((op >> 4) & 0x0F) as u8
}

fn imm8(op: u16) -> u8 {
    (((op >> 4) & 0xF0) | (op & 0x0F)) as u8
}

fn sign_extend(value: u16, bits: u32) -> i16 {
    let shift = 16 - bits;
    ((value << shift) as i16) >> shift
}

/// Decode `op`; `next` is the following flash word, used by 32-bit instructions.
pub fn decode(op: u16, next: u16) -> Instruction {
    use Instruction as I;

    match op {
        0x0000 => return I::Nop,
        0x9409 => return I::Ijmp,
        0x9509 => return I::Icall,
        0x9508 => return I::Ret,
        0x9518 => return I::Reti,
        0x9588 => return I::Sleep,
        0x9598 => return I::Break,
        0x95A8 => return I::Wdr,
        0x95C8 => {
            return I::Lpm {
                d: 0,
                post_increment: false,
            }
        }
        _ => {}
    }

    let (d, r) = (rd(op), rr(op));

    match op >> 12 {
        0x0 => match (op >> 10) & 0x3 {
            0 if (op >> 8) == 0x01 => I::Movw {
                d: (((op >> 4) & 0x0F) * 2) as u8,
                r: ((op & 0x0F) * 2) as u8,
            },
            1 => I::Cpc { d, r },
            2 => I::Sbc { d, r },
            3 => I::Add { d, r },
            _ => I::Unknown(op),
        },
        0x1 => match (op >> 10) & 0x3 {
            0 => I::Cpse { d, r },
            1 => I::Cp { d, r },
            2 => I::Sub { d, r },
            _ => I::Adc { d, r },
        },
        0x2 => match (op >> 10) & 0x3 {
            0 => I::And { d, r },
            1 => I::Eor { d, r },
            2 => I::Or { d, r },
            _ => I::Mov { d, r },
        },
        0x3 => I::Cpi {
            d: upper_rd(op),
            k: imm8(op),
        },
        0x4 => I::Sbci {
            d: upper_rd(op),
            k: imm8(op),
        },
        0x5 => I::Subi {
            d: upper_rd(op),
            k: imm8(op),
        },
        0x6 => I::Ori {
            d: upper_rd(op),
            k: imm8(op),
        },
        0x7 => I::Andi {
            d: upper_rd(op),
            k: imm8(op),
        },
        0x8 | 0xA => decode_displacement(op),
        0x9 => decode_group9(op, next),
        0xB => {
            let a = (((op >> 5) & 0x30) | (op & 0x0F)) as u8;
            if op & 0x0800 == 0 {
                I::In { d, a }
            } else {
                I::Out { a, r: d }
            }
        }
        0xC => I::Rjmp {
            k: sign_extend(op & 0x0FFF, 12),
        },
        0xD => I::Rcall {
            k: sign_extend(op & 0x0FFF, 12),
        },
        0xE => I::Ldi {
            d: upper_rd(op),
            k: imm8(op),
        },
        _ => decode_group15(op),
    }
}

// 10q0 qqsd dddd yqqq
fn decode_displacement(op: u16) -> Instruction {
    let q = (((op >> 8) & 0x20) | ((op >> 7) & 0x18) | (op & 0x07)) as u8;
    let ptr = if op & 0x0008 != 0 { Pointer::Y } else { Pointer::Z };
    let reg = rd(op);
    if op & 0x0200 != 0 {
        Instruction::Std { r: reg, ptr, q }
    } else {
        Instruction::Ldd { d: reg, ptr, q }
    }
}

fn decode_group9(op: u16, next: u16) -> Instruction {
    use Instruction as I;
    let d = rd(op);

    match (op >> 9) & 0x07 {
        // 1001 000d dddd xxxx: loads
        0 => match op & 0x0F {
            0x0 => I::Lds { d, address: next },
            0x1 => I::Ld { d, ptr: Pointer::Z, adjust: Adjust::PostIncrement },
            0x2 => I::Ld { d, ptr: Pointer::Z, adjust: Adjust::PreDecrement },
            0x4 => I::Lpm { d, post_increment: false },
            0x5 => I::Lpm { d, post_increment: true },
            0x9 => I::Ld { d, ptr: Pointer::Y, adjust: Adjust::PostIncrement },
            0xA => I::Ld { d, ptr: Pointer::Y, adjust: Adjust::PreDecrement },
            0xC => I::Ld { d, ptr: Pointer::X, adjust: Adjust::None },
            0xD => I::Ld { d, ptr: Pointer::X, adjust: Adjust::PostIncrement },
            0xE => I::Ld { d, ptr: Pointer::X, adjust: Adjust::PreDecrement },
            0xF => I::Pop { d },
            _ => I::Unknown(op),
        },
        // 1001 001r rrrr xxxx: stores
        1 => match op & 0x0F {
            0x0 => I::Sts { r: d, address: next },
            0x1 => I::St { r: d, ptr: Pointer::Z, adjust: Adjust::PostIncrement },
            0x2 => I::St { r: d, ptr: Pointer::Z, adjust: Adjust::PreDecrement },
            0x9 => I::St { r: d, ptr: Pointer::Y, adjust: Adjust::PostIncrement },
            0xA => I::St { r: d, ptr: Pointer::Y, adjust: Adjust::PreDecrement },
            0xC => I::St { r: d, ptr: Pointer::X, adjust: Adjust::None },
            0xD => I::St { r: d, ptr: Pointer::X, adjust: Adjust::PostIncrement },
            0xE => I::St { r: d, ptr: Pointer::X, adjust: Adjust::PreDecrement },
            0xF => I::Push { r: d },
            _ => I::Unknown(op),
        },
        // 1001 010x xxxx xxxx: one-operand, flag and long jump instructions
        2 => match op & 0x0F {
            0x0 => I::Com { d },
            0x1 => I::Neg { d },
            0x2 => I::Swap { d },
            0x3 => I::Inc { d },
            0x5 => I::Asr { d },
            0x6 => I::Lsr { d },
            0x7 => I::Ror { d },
            0x8 if op & 0xFF8F == 0x9408 => I::Bset {
                s: ((op >> 4) & 0x07) as u8,
            },
            0x8 if op & 0xFF8F == 0x9488 => I::Bclr {
                s: ((op >> 4) & 0x07) as u8,
            },
            0xA => I::Dec { d },
            0xC | 0xD => I::Jmp {
                k: long_target(op, next),
            },
            0xE | 0xF => I::Call {
                k: long_target(op, next),
            },
            _ => I::Unknown(op),
        },
        // 1001 011x KKdd KKKK
        3 => {
            let d = 24 + (((op >> 4) & 0x03) * 2) as u8;
            let k = (((op >> 2) & 0x30) | (op & 0x0F)) as u8;
            if op & 0x0100 == 0 {
                I::Adiw { d, k }
            } else {
                I::Sbiw { d, k }
            }
        }
        // 1001 10xx AAAA Abbb
        4 | 5 => {
            let a = ((op >> 3) & 0x1F) as u8;
            let b = (op & 0x07) as u8;
            match (op >> 8) & 0x03 {
                0 => I::Cbi { a, b },
                1 => I::Sbic { a, b },
                2 => I::Sbi { a, b },
                _ => I::Sbis { a, b },
            }
        }
        // 1001 11rd dddd rrrr
        _ => I::Mul { d, r: rr(op) },
    }
}

fn long_target(op: u16, next: u16) -> u32 {
    let high = (u32::from(op >> 3) & 0x3E) | u32::from(op & 0x01);
    (high << 16) | u32::from(next)
}

fn decode_group15(op: u16) -> Instruction {
    use Instruction as I;

    if op & 0x0800 == 0 {
        // 1111 0Xkk kkkk ksss
        let s = (op & 0x07) as u8;
        let k = sign_extend((op >> 3) & 0x7F, 7) as i8;
        return if op & 0x0400 == 0 {
            I::Brbs { s, k }
        } else {
            I::Brbc { s, k }
        };
    }

    if op & 0x0008 != 0 {
        return I::Unknown(op);
    }
    let d = rd(op);
    let b = (op & 0x07) as u8;
    match (op >> 9) & 0x03 {
        0 => I::Bld { d, b },
        1 => I::Bst { d, b },
        2 => I::Sbrc { r: d, b },
        _ => I::Sbrs { r: d, b },
    }
}
