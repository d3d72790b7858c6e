use std::io::{Cursor, SeekFrom};

use dolreader::config::{DolOptions, SizePolicy};
use dolreader::header::{BSS_ADDRESS, ENTRY_POINT, HEADER_SIZE};
use dolreader::{DolError, DolFile, Segment, SegmentKind, TextEncoding};

/// (slot, offset, address, size) rows for a hand-built image.
const LAYOUT: &[(usize, u32, u32, u32)] = &[
    (0, 0x100, 0x8000_3100, 0x200),
    (1, 0x300, 0x8000_5000, 0x40),
    (7, 0x340, 0x8000_6000, 0x80),
    (8, 0x3C0, 0x8000_7000, 0x40),
];

fn put(image: &mut [u8], at: usize, value: u32) {
    image[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

/// Writes the header tables for `rows` and fills each payload with a
/// slot-specific pattern. Rows may describe a damaged layout.
fn image_from(rows: &[(usize, u32, u32, u32)], len: usize, bss: (u32, u32)) -> Vec<u8> {
    let mut image = vec![0u8; len];
    for &(slot, offset, address, size) in rows {
        put(&mut image, slot * 4, offset);
        put(&mut image, 0x48 + slot * 4, address);
        put(&mut image, 0x90 + slot * 4, size);
        for i in 0..size as usize {
            image[offset as usize + i] = (slot * 16 + i % 16) as u8;
        }
    }
    put(&mut image, BSS_ADDRESS, bss.0);
    put(&mut image, BSS_ADDRESS + 4, bss.1);
    put(&mut image, ENTRY_POINT, 0x8000_3100);
    image
}

fn build_image() -> Vec<u8> {
    image_from(LAYOUT, 0x400, (0x8000_8000, 0x1000))
}

fn strict() -> DolOptions {
    DolOptions {
        strict_bss: true,
        ..DolOptions::default()
    }
}

#[test]
fn load_reads_tables_and_positions_cursor() {
    let dol = DolFile::from_bytes(&build_image()).unwrap();
    assert_eq!(dol.code_segments().len(), 2);
    assert_eq!(dol.data_segments().len(), 2);
    assert_eq!(dol.bss_address, 0x8000_8000);
    assert_eq!(dol.bss_size, 0x1000);
    assert_eq!(dol.entry_point, 0x8000_3100);
    assert_eq!(dol.tell(), 0x8000_3100);
    assert_eq!(dol.segment_size(SegmentKind::Data, 0), Some(0x80));
}

#[test]
fn cursor_starts_at_first_segment_in_file() {
    // Swap the file order of the first code and data slots.
    let mut image = vec![0u8; 0x200];
    put(&mut image, 0, 0x180);
    put(&mut image, 0x48, 0x8000_3100);
    put(&mut image, 0x90, 0x20);
    put(&mut image, 7 * 4, 0x100);
    put(&mut image, 0x48 + 7 * 4, 0x8000_6000);
    put(&mut image, 0x90 + 7 * 4, 0x20);
    let dol = DolFile::from_bytes(&image).unwrap();
    assert_eq!(dol.tell(), 0x8000_6000);
}

#[test]
fn save_reproduces_loaded_image() {
    let image = build_image();
    let dol = DolFile::from_bytes(&image).unwrap();
    assert_eq!(dol.to_bytes().unwrap(), image);
}

#[test]
fn save_and_load_at_start_position() {
    let dol = DolFile::from_bytes(&build_image()).unwrap();
    let mut sink = Cursor::new(vec![0xAAu8; 0x10]);
    dol.save(&mut sink, 0x10).unwrap();

    let mut source = Cursor::new(sink.into_inner());
    let reloaded = DolFile::load(&mut source, 0x10, DolOptions::default()).unwrap();
    assert_eq!(reloaded.to_bytes().unwrap(), build_image());
}

#[test]
fn data_slots_start_after_all_code_slots() {
    let mut dol = DolFile::new();
    dol.append_segment(Segment::new(SegmentKind::Data, vec![7; 0x20]).with_address(0x8000_6000))
        .unwrap();
    let bytes = dol.to_bytes().unwrap();
    assert_eq!(&bytes[0..4], &[0; 4]);
    assert_eq!(&bytes[0x1C..0x20], &0x100u32.to_be_bytes());
    assert_eq!(&bytes[0x64..0x68], &0x8000_6000u32.to_be_bytes());
    assert_eq!(&bytes[0xAC..0xB0], &0x20u32.to_be_bytes());
    assert_eq!(&bytes[0xE0..0xE4], &0x8000_3000u32.to_be_bytes());
}

#[test]
fn truncated_payload_is_reported() {
    let image = build_image();
    let err = DolFile::from_bytes(&image[..0x380]).unwrap_err();
    assert!(matches!(err, DolError::Truncated { offset: 0x340, len: 0x80 }));
}

#[test]
fn resolve_is_total() {
    let dol = DolFile::from_bytes(&build_image()).unwrap();
    for &(slot, _, address, size) in LAYOUT {
        let expected = if slot < 7 { SegmentKind::Code } else { SegmentKind::Data };
        for addr in [address, address + size / 2, address + size - 1] {
            assert_eq!(dol.resolve(addr).unwrap().kind, expected);
        }
        assert!(matches!(
            dol.resolve(address + size),
            Err(DolError::UnmappedAddress(a)) if a == (address + size) as u64
        ));
    }
    assert!(!dol.is_mapped(0x8000_30FF));
    assert!(!dol.is_mapped(0x8000_8000));
}

#[test]
fn read_then_write_back_is_noop() {
    let image = build_image();
    let mut dol = DolFile::from_bytes(&image).unwrap();
    dol.seek(SeekFrom::Start(0x8000_3180)).unwrap();
    let bytes = dol.read(0x40).unwrap();
    dol.seek(SeekFrom::Current(-0x40)).unwrap();
    dol.write(&bytes).unwrap();
    assert_eq!(dol.tell(), 0x8000_31C0);
    assert_eq!(dol.to_bytes().unwrap(), image);
}

#[test]
fn appended_segments_never_overlap() {
    let mut dol = DolFile::from_bytes(&build_image()).unwrap();
    for size in [0x10, 0x200, 0x1, 0x1000, 0x33] {
        let r = dol
            .append_segment(Segment::new(SegmentKind::Data, vec![0; size]))
            .unwrap();
        let seg = dol.segment(r).unwrap();
        let address = seg.address().unwrap();
        assert_eq!(address % 32, 0);
        assert_eq!(seg.offset().unwrap() % 32, 0);
        assert!(address >= 0x8000_0000);
        assert!(address as u64 + size as u64 <= 0x8120_0000);
    }
    dol.validate().unwrap();
}

#[test]
fn allocation_skips_segments_of_other_table() {
    let mut dol = DolFile::from_bytes(&build_image()).unwrap();
    // The code table ends at 0x80005040; a large segment collides with the
    // data segments at 0x80006000 and 0x80007000.
    let r = dol
        .append_segment(Segment::new(SegmentKind::Code, vec![0; 0x1000]))
        .unwrap();
    assert_eq!(dol.segment(r).unwrap().address(), Some(0x8000_7040));
    assert_eq!(dol.segment(r).unwrap().offset(), Some(0x400));
}

#[test]
fn full_table_fails_before_mutation() {
    let mut dol = DolFile::from_bytes(&build_image()).unwrap();
    for _ in 0..5 {
        dol.append_segment(Segment::new(SegmentKind::Code, vec![0; 0x20]))
            .unwrap();
    }
    let before = dol.to_bytes().unwrap();
    let err = dol
        .append_segment(Segment::new(SegmentKind::Code, vec![0; 0x20]))
        .unwrap_err();
    assert!(matches!(
        err,
        DolError::SectionCountFull {
            kind: SegmentKind::Code,
            capacity: 7
        }
    ));
    assert_eq!(dol.to_bytes().unwrap(), before);
}

#[test]
fn explicit_address_outside_window() {
    let mut dol = DolFile::new();
    for address in [0x7FFF_FFE0, 0x8120_0000, 0x811F_FFF0] {
        let err = dol
            .append_segment(Segment::new(SegmentKind::Code, vec![0; 0x20]).with_address(address))
            .unwrap_err();
        assert!(matches!(err, DolError::AddressOutOfRange { .. }));
    }
    // Nothing to map, but the start itself is past the window.
    let err = dol
        .append_segment(Segment::new(SegmentKind::Code, vec![]).with_address(0x8120_0000))
        .unwrap_err();
    assert!(matches!(
        err,
        DolError::AddressOutOfRange {
            address: 0x8120_0000,
            size: 0,
            ..
        }
    ));
    assert!(dol.code_segments().is_empty());
    dol.append_segment(Segment::new(SegmentKind::Code, vec![0; 0x20]).with_address(0x811F_FFE0))
        .unwrap();
}

#[test]
fn validate_reports_virtual_overlap() {
    let image = image_from(
        &[(0, 0x100, 0x8000_3100, 0x20), (7, 0x120, 0x8000_3110, 0x20)],
        0x140,
        (0, 0),
    );
    let dol = DolFile::from_bytes(&image).unwrap();
    // Loading keeps damaged tables; the first match still wins on reads.
    assert_eq!(dol.resolve(0x8000_3118).unwrap().kind, SegmentKind::Code);
    assert!(matches!(
        dol.validate(),
        Err(DolError::AddressOverlap {
            address: 0x8000_3100,
            other_kind: SegmentKind::Data,
            other_index: 0,
            ..
        })
    ));
}

#[test]
fn validate_reports_file_overlap() {
    let image = image_from(
        &[(0, 0x100, 0x8000_3100, 0x40), (7, 0x120, 0x8000_6000, 0x20)],
        0x140,
        (0, 0),
    );
    let mut dol = DolFile::from_bytes(&image).unwrap();
    assert_eq!(dol.read_u8(0x8000_6000).unwrap(), image[0x120]);
    match dol.validate() {
        Err(DolError::FileOverlap { offset, size, what }) => {
            assert_eq!((offset, size), (0x100, 0x40));
            assert_eq!(what, "data segment 0");
        }
        other => panic!("expected a file overlap, got {other:?}"),
    }
}

#[test]
fn validate_reports_segment_inside_bss_when_strict() {
    let image = image_from(
        &[(0, 0x100, 0x8000_3100, 0x20), (7, 0x120, 0x8000_8100, 0x20)],
        0x140,
        (0x8000_8000, 0x1000),
    );
    DolFile::from_bytes(&image).unwrap().validate().unwrap();

    let dol = DolFile::from_bytes_at(&image, 0, strict()).unwrap();
    assert!(matches!(
        dol.validate(),
        Err(DolError::BssOverlap {
            address: 0x8000_8100,
            size: 0x20,
            bss_address: 0x8000_8000,
            bss_size: 0x1000
        })
    ));
}

#[test]
fn segment_touching_bss_is_not_inside_it() {
    let image = image_from(
        &[(0, 0x100, 0x8000_7FE0, 0x20), (7, 0x120, 0x8000_9000, 0x20)],
        0x140,
        (0x8000_8000, 0x1000),
    );
    DolFile::from_bytes_at(&image, 0, strict())
        .unwrap()
        .validate()
        .unwrap();
}

#[test]
fn allocation_leaves_gap_before_next_segment() {
    // A 0x20 segment would fit exactly between 0x80003120 and 0x80003140,
    // but a segment starting at the end of the request still collides.
    let image = image_from(
        &[(0, 0x100, 0x8000_3100, 0x20), (7, 0x120, 0x8000_3140, 0x20)],
        0x140,
        (0, 0),
    );
    let mut dol = DolFile::from_bytes(&image).unwrap();
    let r = dol
        .append_segment(Segment::new(SegmentKind::Code, vec![0; 0x20]))
        .unwrap();
    assert_eq!(dol.segment(r).unwrap().address(), Some(0x8000_3160));
    dol.validate().unwrap();
}

#[test]
fn branch_round_trip() {
    let mut dol = DolFile::from_bytes(&build_image()).unwrap();
    dol.insert_branch(0x8000_1004 + 0x2100, 0x8000_1000 + 0x2100, false)
        .unwrap();
    assert_eq!(dol.read_u32(0x8000_3100).unwrap(), 0x4800_0004);

    dol.insert_branch(0x8000_3100, 0x8000_5010, true).unwrap();
    let branch = dol.extract_branch_addr(0x8000_5010).unwrap();
    assert!(!branch.conditional);
    // LK survives the historical displacement mask.
    assert_eq!(branch.destination, 0x8000_3101);
}

#[test]
fn c_string_round_trip() {
    let mut dol = DolFile::from_bytes(&build_image()).unwrap();
    dol.write_c_string(0x8000_6010, "mario", TextEncoding::Ascii)
        .unwrap();
    let s = dol.read_c_string(0x8000_6010, 0, TextEncoding::Ascii).unwrap();
    assert_eq!(s.text, "mario");
    assert!(s.is_complete());

    let s = dol.read_c_string(0x8000_6010, 3, TextEncoding::Ascii).unwrap();
    assert_eq!(s.text, "mar");
}

#[test]
fn c_string_at_segment_end() {
    let mut dol = DolFile::from_bytes(&build_image()).unwrap();
    let last = 0x8000_6000 + 0x80 - 1;
    dol.write_c_string(last, "", TextEncoding::Ascii).unwrap();
    let err = dol.write_c_string(last, "x", TextEncoding::Ascii).unwrap_err();
    assert!(matches!(err, DolError::SegmentBoundaryExceeded { .. }));
    assert_eq!(dol.read_u8(last).unwrap(), 0);
}

#[test]
fn c_string_without_terminator_hits_boundary() {
    let mut dol = DolFile::from_bytes(&build_image()).unwrap();
    let err = dol
        .read_c_string(0x8000_7031, 0, TextEncoding::Ascii)
        .unwrap_err();
    assert!(matches!(err, DolError::SegmentBoundaryExceeded { .. }));
}

#[test]
fn decode_failure_keeps_prefix() {
    let mut dol = DolFile::from_bytes(&build_image()).unwrap();
    dol.seek(SeekFrom::Start(0x8000_6020)).unwrap();
    dol.write(b"Luigi\xFFs\0").unwrap();
    let s = dol.read_c_string(0x8000_6020, 0, TextEncoding::Ascii).unwrap();
    assert_eq!(s.text, "Luigi");
    let failure = s.failure.unwrap();
    assert_eq!(failure.position, 5);
    assert_eq!(failure.address, 0x8000_6025);
    assert!(matches!(
        s.into_result(),
        Err(DolError::Decode { position: 5, .. })
    ));
}

#[test]
fn shift_jis_strings() {
    let mut dol = DolFile::from_bytes(&build_image()).unwrap();
    dol.write_c_string(0x8000_6040, "マリオ", TextEncoding::ShiftJis)
        .unwrap();
    let s = dol.read_string(0x8000_6040, 6, TextEncoding::ShiftJis).unwrap();
    assert_eq!(s.text, "マリオ");
}

#[test]
fn exact_size_policy_keeps_unpadded_length() {
    let image = build_image();
    let options = DolOptions {
        size_policy: SizePolicy::Exact,
        strict_bss: false,
    };
    let mut dol = DolFile::from_bytes_at(&image, 0, options).unwrap();
    assert_eq!(dol.size(), 0x400);
    dol.append_segment(Segment::new(SegmentKind::Data, vec![1; 0x10]))
        .unwrap();
    assert_eq!(dol.size(), 0x410);
    dol.set_options(DolOptions::default());
    assert_eq!(dol.size(), 0x500);
    assert!(HEADER_SIZE <= dol.size());
}
