use simboard::image::ImageError;
use simboard::machine::MachineError;
use simboard::{Avr, FirmwareImage};
use std::fs;
use std::path::PathBuf;

const EOF_RECORD: &str = ":00000001FF";

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("simboard-{}-{}", std::process::id(), name))
}

#[test]
fn test_data_records_with_gap_are_filled() {
    let text = format!(":040000000C94340028\n:020008008895D9\n{EOF_RECORD}\n");
    let image = FirmwareImage::from_ihex(&text).unwrap();

    assert_eq!(image.base, 0);
    assert_eq!(
        image.bytes,
        vec![0x0C, 0x94, 0x34, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x88, 0x95]
    );
    assert_eq!(image.end(), 10);
}

#[test]
fn test_extended_linear_address_moves_base() {
    let text = format!(":020000040001F9\n:02001000AABB89\n{EOF_RECORD}\n");
    let image = FirmwareImage::from_ihex(&text).unwrap();

    assert_eq!(image.base, 0x0001_0010);
    assert_eq!(image.bytes, vec![0xAA, 0xBB]);
}

#[test]
fn test_start_address_record_is_ignored_and_case_is_irrelevant() {
    let text = format!(":0400000300000000F9\n:020008008895d9\r\n{EOF_RECORD}");
    let image = FirmwareImage::from_ihex(&text).unwrap();

    assert_eq!(image.base, 8);
    assert_eq!(image.bytes, vec![0x88, 0x95]);
}

#[test]
fn test_bad_checksum_reports_line() {
    let text = format!(":020008008895D9\n:040000000C94340029\n{EOF_RECORD}\n");
    assert!(matches!(
        FirmwareImage::from_ihex(&text),
        Err(ImageError::Checksum { line: 2 })
    ));
}

#[test]
fn test_missing_colon_is_malformed() {
    let text = format!("040000000C94340028\n{EOF_RECORD}\n");
    assert!(matches!(
        FirmwareImage::from_ihex(&text),
        Err(ImageError::Malformed { line: 1, .. })
    ));
}

#[test]
fn test_missing_eof_record() {
    assert!(matches!(
        FirmwareImage::from_ihex(":040000000C94340028\n"),
        Err(ImageError::MissingEof)
    ));
}

#[test]
fn test_unsupported_record_type() {
    let text = format!(":00000006FA\n{EOF_RECORD}\n");
    assert!(matches!(
        FirmwareImage::from_ihex(&text),
        Err(ImageError::UnsupportedRecord { line: 1, kind: 6 })
    ));
}

#[test]
fn test_image_without_data_is_empty() {
    assert!(matches!(FirmwareImage::from_ihex(EOF_RECORD), Err(ImageError::Empty)));
    assert!(matches!(FirmwareImage::from_binary(Vec::new()), Err(ImageError::Empty)));
}

#[test]
fn test_load_picks_format_from_extension() {
    let hex_path = temp_path("blink.hex");
    let bin_path = temp_path("blink.bin");
    fs::write(&hex_path, format!(":020008008895D9\n{EOF_RECORD}\n")).unwrap();
    fs::write(&bin_path, [0x88, 0x95]).unwrap();

    let from_hex = FirmwareImage::load(&hex_path).unwrap();
    let from_bin = FirmwareImage::load(&bin_path).unwrap();

    assert_eq!(from_hex.base, 8);
    assert_eq!(from_bin.base, 0);
    assert_eq!(from_hex.bytes, from_bin.bytes);

    fs::remove_file(hex_path).unwrap();
    fs::remove_file(bin_path).unwrap();
}

#[test]
fn test_load_missing_file_is_io_error() {
    let path = temp_path("does-not-exist.hex");
    match FirmwareImage::load(&path) {
        Err(ImageError::Io { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected I/O error, got {other:?}"),
    }
}

#[test]
fn test_image_larger_than_flash_is_rejected() {
    let image = FirmwareImage::from_binary(vec![0; 8 * 1024 + 2]).unwrap();
    let mut avr = Avr::by_name("atmega88", 8_000_000).unwrap();

    assert_eq!(
        avr.load_image(&image),
        Err(MachineError::ImageTooLarge {
            base: 0,
            size: 8 * 1024 + 2,
            flash_size: 8 * 1024,
        })
    );
}
