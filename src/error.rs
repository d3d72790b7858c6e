//! Error taxonomy for DOL operations.

use thiserror::Error;

use crate::layout::SegmentKind;

/// Errors produced while reading, writing or mutating a DOL image.
///
/// Every failure is local and synchronous; none of them are worth retrying.
#[derive(Error, Debug)]
pub enum DolError {
    /// No segment covers the address.
    #[error("unmapped address: 0x{0:08X}")]
    UnmappedAddress(u64),

    /// A read or write would run past the end of the segment it started in.
    #[error("access of {len:#x} bytes at 0x{address:08X} crosses the end of its segment (0x{segment_end:08X})")]
    SegmentBoundaryExceeded {
        address: u32,
        len: usize,
        segment_end: u64,
    },

    /// The code or data table has no free slot left.
    #[error("exceeded max {kind} segment limit of {capacity}")]
    SectionCountFull { kind: SegmentKind, capacity: usize },

    /// A segment would be placed outside the loadable window.
    #[error("{kind} segment at 0x{address:08X} (size {size:#x}) is beyond scope (0x80000000 <-> 0x81200000)")]
    AddressOutOfRange {
        kind: SegmentKind,
        address: u64,
        size: usize,
    },

    /// A segment has no address or file offset assigned.
    #[error("{kind} segment {index} has no {missing} assigned")]
    IncompleteSection {
        kind: SegmentKind,
        index: usize,
        missing: &'static str,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Strict conversion of a partially decoded string.
    #[error("byte {position} (address 0x{address:08X}) is not a valid {encoding} character")]
    Decode {
        position: usize,
        address: u32,
        encoding: &'static str,
    },

    #[error("character {position} of the string cannot be encoded as {encoding}")]
    Unencodable {
        position: usize,
        encoding: &'static str,
    },

    /// The virtual range overlaps an existing segment.
    #[error("range 0x{address:08X}+{size:#x} overlaps {other_kind} segment {other_index}")]
    AddressOverlap {
        address: u64,
        size: usize,
        other_kind: SegmentKind,
        other_index: usize,
    },

    /// The file range overlaps the header or another segment's payload.
    #[error("file range {offset:#x}+{size:#x} overlaps {what}")]
    FileOverlap {
        offset: u64,
        size: usize,
        what: String,
    },

    #[error("range 0x{address:08X}+{size:#x} overlaps bss 0x{bss_address:08X}+{bss_size:#x}")]
    BssOverlap {
        address: u64,
        size: usize,
        bss_address: u32,
        bss_size: u32,
    },

    /// The source ends before a table entry says it should.
    #[error("source truncated: need {len:#x} bytes at {offset:#x}")]
    Truncated { offset: u64, len: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DolError>;
