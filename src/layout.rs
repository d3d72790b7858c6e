//! Segment model.
//!
//! A DOL image is made of up to 7 code ("text") and 11 data segments. Each
//! one is an owned byte buffer that lives at a file offset in the container
//! and at a virtual address once loaded.

use std::fmt;

/// Lowest virtual address a segment may occupy.
pub const ADDRESS_MIN: u32 = 0x8000_0000;
/// Exclusive upper bound of the loadable window.
pub const ADDRESS_MAX: u32 = 0x8120_0000;

/// Which header table a segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Code,
    Data,
}

impl SegmentKind {
    /// Number of header slots reserved for this kind.
    pub const fn capacity(self) -> usize {
        match self {
            SegmentKind::Code => crate::header::CODE_SLOTS,
            SegmentKind::Data => crate::header::DATA_SLOTS,
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentKind::Code => f.write_str("text"),
            SegmentKind::Data => f.write_str("data"),
        }
    }
}

/// One contiguous region of the image.
///
/// `address` and `offset` stay `None` until the segment is placed, either by
/// the caller through the builder methods or by
/// [`DolFile::append_segment`](crate::dol::DolFile::append_segment).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Table the segment is stored in.
    kind: SegmentKind,
    /// Virtual load address.
    address: Option<u32>,
    /// Position of the payload in the container, relative to the header.
    offset: Option<u32>,
    /// Payload. Its length is the segment size.
    data: Vec<u8>,
}

impl Segment {
    /// Creates an unplaced segment owning `data`.
    pub fn new(kind: SegmentKind, data: Vec<u8>) -> Self {
        Self {
            kind,
            address: None,
            offset: None,
            data,
        }
    }

    /// Fixes the virtual address instead of letting the allocator pick one.
    pub fn with_address(mut self, address: u32) -> Self {
        self.address = Some(address);
        self
    }

    /// Fixes the file offset. It is still rounded up to 32 bytes on append.
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn address(&self) -> Option<u32> {
        self.address
    }

    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Exclusive end of the virtual range.
    pub fn end(&self) -> Option<u64> {
        self.address.map(|a| a as u64 + self.data.len() as u64)
    }

    /// Exclusive end of the file range.
    pub fn file_end(&self) -> Option<u64> {
        self.offset.map(|o| o as u64 + self.data.len() as u64)
    }

    /// Whether `addr` falls in `[address, address + size)`.
    pub fn contains(&self, addr: u64) -> bool {
        match self.address {
            Some(start) => start as u64 <= addr && addr < start as u64 + self.data.len() as u64,
            None => false,
        }
    }

    /// Whether the virtual range intersects `[addr, addr + len)`.
    pub fn intersects(&self, addr: u64, len: u64) -> bool {
        match self.address {
            Some(start) if !self.data.is_empty() => {
                let start = start as u64;
                start < addr + len && start + self.data.len() as u64 > addr
            }
            _ => false,
        }
    }

    /// Whether the file range intersects `[offset, offset + len)`.
    pub fn file_intersects(&self, offset: u64, len: u64) -> bool {
        match self.offset {
            Some(start) if !self.data.is_empty() => {
                let start = start as u64;
                start < offset + len && start + self.data.len() as u64 > offset
            }
            _ => false,
        }
    }

    /// Borrows `len` bytes at `local` bytes from the segment's start.
    pub fn read_at(&self, local: usize, len: usize) -> Option<&[u8]> {
        self.data.get(local..local.checked_add(len)?)
    }

    /// Overwrites bytes at `local`. Returns `false` without touching the
    /// buffer when the range does not fit.
    pub fn write_at(&mut self, local: usize, bytes: &[u8]) -> bool {
        let Some(end) = local.checked_add(bytes.len()) else {
            return false;
        };
        match self.data.get_mut(local..end) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    pub(crate) fn place(&mut self, address: u32, offset: u32) {
        self.address = Some(address);
        self.offset = Some(offset);
    }
}
