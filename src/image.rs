//! Firmware images: Intel HEX as produced by `avr-objcopy -O ihex`, or raw binaries.

use std::fs;
use std::path::{Path, PathBuf};

/// Upper bound on the address span an image may cover. Larger than any supported
/// part's flash, small enough that a corrupt address record cannot exhaust memory.
pub const MAX_IMAGE_SPAN: u32 = 1 << 20;

const FILL_BYTE: u8 = 0xFF;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Intel HEX file is not valid UTF-8")]
    NotText,
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },
    #[error("line {line}: checksum mismatch")]
    Checksum { line: usize },
    #[error("line {line}: unsupported record type {kind:02x}")]
    UnsupportedRecord { line: usize, kind: u8 },
    #[error("missing end-of-file record")]
    MissingEof,
    #[error("image contains no data")]
    Empty,
    #[error("image spans {span} bytes")]
    SpanTooLarge { span: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    /// Byte address of `bytes[0]` in flash.
    pub base: u32,
    pub bytes: Vec<u8>,
}

impl FirmwareImage {
    /// Load `.hex`/`.ihex`/`.ihx` files as Intel HEX and anything else as a raw
    /// binary placed at address 0.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let contents = fs::read(path).map_err(|source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("hex" | "ihex" | "ihx") => {
                let text = String::from_utf8(contents).map_err(|_| ImageError::NotText)?;
                Self::from_ihex(&text)
            }
            _ => Self::from_binary(contents),
        }
    }

    pub fn from_binary(bytes: Vec<u8>) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        if bytes.len() as u64 > u64::from(MAX_IMAGE_SPAN) {
            return Err(ImageError::SpanTooLarge {
                span: bytes.len() as u64,
            });
        }
        Ok(Self { base: 0, bytes })
    }

    pub fn from_ihex(text: &str) -> Result<Self, ImageError> {
        let mut chunks: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut upper: u32 = 0;
        let mut saw_eof = false;

        for (index, raw_line) in text.lines().enumerate() {
            let line = index + 1;
            let record = raw_line.trim();
            if record.is_empty() {
                continue;
            }

            let record = parse_record(record, line)?;
            match record.kind {
                0x00 => {
                    if !record.data.is_empty() {
                        let address = upper.wrapping_add(u32::from(record.offset));
                        chunks.push((address, record.data));
                    }
                }
                0x01 => {
                    saw_eof = true;
                    break;
                }
                0x02 => upper = u32::from(record.word(line)?) << 4,
                0x04 => upper = u32::from(record.word(line)?) << 16,
                // Start addresses only matter to loaders that jump into the image.
                0x03 | 0x05 => {}
                kind => return Err(ImageError::UnsupportedRecord { line, kind }),
            }
        }

        if !saw_eof {
            return Err(ImageError::MissingEof);
        }

        assemble(&chunks)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// One past the last byte address covered by the image.
    pub fn end(&self) -> u64 {
        u64::from(self.base) + self.bytes.len() as u64
    }
}

struct Record {
    offset: u16,
    kind: u8,
    data: Vec<u8>,
}

impl Record {
    fn word(&self, line: usize) -> Result<u16, ImageError> {
        match self.data.as_slice() {
            [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(ImageError::Malformed {
                line,
                reason: "address record must carry two bytes",
            }),
        }
    }
}

fn parse_record(record: &str, line: usize) -> Result<Record, ImageError> {
    let hex = record.strip_prefix(':').ok_or(ImageError::Malformed {
        line,
        reason: "record does not start with ':'",
    })?;
    let bytes = decode_hex(hex).ok_or(ImageError::Malformed {
        line,
        reason: "invalid hex digits",
    })?;

    // count, offset (2), type, checksum
    if bytes.len() < 5 {
        return Err(ImageError::Malformed {
            line,
            reason: "record too short",
        });
    }
    let count = usize::from(bytes[0]);
    if bytes.len() != count + 5 {
        return Err(ImageError::Malformed {
            line,
            reason: "byte count does not match record length",
        });
    }
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != 0 {
        return Err(ImageError::Checksum { line });
    }

    Ok(Record {
        offset: u16::from_be_bytes([bytes[1], bytes[2]]),
        kind: bytes[3],
        data: bytes[4..4 + count].to_vec(),
    })
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let digits = core::str::from_utf8(pair).ok()?;
            u8::from_str_radix(digits, 16).ok()
        })
        .collect()
}

fn assemble(chunks: &[(u32, Vec<u8>)]) -> Result<FirmwareImage, ImageError> {
    let start = chunks.iter().map(|(address, _)| *address).min();
    let end = chunks
        .iter()
        .map(|(address, data)| u64::from(*address) + data.len() as u64)
        .max();
    let (Some(start), Some(end)) = (start, end) else {
        return Err(ImageError::Empty);
    };

    let span = end - u64::from(start);
    if span > u64::from(MAX_IMAGE_SPAN) {
        return Err(ImageError::SpanTooLarge { span });
    }

    let mut bytes = vec![FILL_BYTE; span as usize];
    for (address, data) in chunks {
        let offset = (address - start) as usize;
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    Ok(FirmwareImage { base: start, bytes })
}
