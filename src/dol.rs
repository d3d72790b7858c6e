//! The DOL container model.
//!
//! `DolFile` owns every segment of an image and exposes it as one flat
//! virtual address space through a cursor:
//! 1. Loading: the header tables are parsed and every present segment is
//!    copied into its own buffer.
//! 2. Virtual I/O: `seek`/`read`/`write` resolve the cursor to the backing
//!    segment. An access never continues into a neighbouring segment.
//! 3. Mutation: segments are appended with address and file-offset
//!    allocation, and branch instructions are patched in.
//! 4. Saving: the header and payloads are serialized back.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::branch::{decode_branch, encode_branch, Branch};
use crate::config::{DolOptions, SizePolicy};
use crate::error::{DolError, Result};
use crate::header::{DolHeader, SlotEntry, CODE_SLOTS, HEADER_SIZE, SLOT_COUNT};
use crate::layout::{Segment, SegmentKind, ADDRESS_MAX, ADDRESS_MIN};
use crate::resolver::{AddressSpace, SegmentRef};
use crate::text::{DecodeFailure, DecodedString, TextEncoding};
use crate::utils::align_up;

/// Entry point of a freshly created image.
pub const DEFAULT_ENTRY_POINT: u32 = 0x8000_3000;
/// Where address allocation starts when the image has no segments yet.
const DEFAULT_LOAD_ADDRESS: u32 = 0x8000_3100;
const SEGMENT_ALIGN: u64 = 32;

/// Generates big-endian typed accessors at a virtual address.
macro_rules! value_io {
    ($($ty:ty => $read:ident, $write:ident;)*) => {
        $(
            pub fn $read(&mut self, address: u32) -> Result<$ty> {
                self.seek_to(address)?;
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                self.read_into(&mut buf)?;
                Ok(<$ty>::from_be_bytes(buf))
            }

            pub fn $write(&mut self, address: u32, value: $ty) -> Result<()> {
                self.seek_to(address)?;
                self.write(&value.to_be_bytes())
            }
        )*
    };
}

/// A loaded DOL image.
#[derive(Debug, Clone)]
pub struct DolFile {
    /// Code table, in slot order.
    code: Vec<Segment>,
    /// Data table, in slot order.
    data: Vec<Segment>,
    /// Start of the zero-initialised region. It has no file payload.
    pub bss_address: u32,
    /// Length of the zero-initialised region in bytes.
    pub bss_size: u32,
    /// Address execution starts at once the image is loaded.
    pub entry_point: u32,
    /// Virtual address of the cursor.
    position: u32,
    options: DolOptions,
}

impl Default for DolFile {
    fn default() -> Self {
        Self::new()
    }
}

impl DolFile {
    /// An image with no segments.
    pub fn new() -> Self {
        Self::with_options(DolOptions::default())
    }

    pub fn with_options(options: DolOptions) -> Self {
        Self {
            code: Vec::new(),
            data: Vec::new(),
            bss_address: 0,
            bss_size: 0,
            entry_point: DEFAULT_ENTRY_POINT,
            position: 0,
            options,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes_at(bytes, 0, DolOptions::default())
    }

    /// Parses an image whose header starts `start_pos` bytes into `bytes`.
    ///
    /// A slot is present when its file offset points past the header. The
    /// cursor ends up at the segment stored first in the file.
    pub fn from_bytes_at(bytes: &[u8], start_pos: usize, options: DolOptions) -> Result<Self> {
        let source = bytes.get(start_pos..).ok_or(DolError::Truncated {
            offset: start_pos as u64,
            len: HEADER_SIZE as u64,
        })?;
        let header = DolHeader::parse(source).ok_or(DolError::Truncated {
            offset: start_pos as u64,
            len: HEADER_SIZE as u64,
        })?;

        let mut dol = Self::with_options(options);
        for slot in 0..SLOT_COUNT {
            let entry = header.slot(slot);
            if !entry.is_present() {
                continue;
            }
            let start = entry.offset as usize;
            let payload = start
                .checked_add(entry.size as usize)
                .and_then(|end| source.get(start..end))
                .ok_or(DolError::Truncated {
                    offset: start_pos as u64 + entry.offset as u64,
                    len: entry.size as u64,
                })?;

            let kind = if slot < CODE_SLOTS {
                SegmentKind::Code
            } else {
                SegmentKind::Data
            };
            let mut segment = Segment::new(kind, payload.to_vec());
            segment.place(entry.address, entry.offset);
            dol.table_mut(kind).push(segment);
        }

        (dol.bss_address, dol.bss_size) = header.bss();
        dol.entry_point = header.entry_point();

        if let Some(address) = dol.first_segment().and_then(Segment::address) {
            dol.position = address;
        }

        tracing::debug!(
            "Loaded DOL: {} text, {} data segments, entry 0x{:08X}",
            dol.code.len(),
            dol.data.len(),
            dol.entry_point
        );
        Ok(dol)
    }

    /// Reads an image from `reader`, with the header at `start_pos`.
    pub fn load<R: Read + Seek>(reader: &mut R, start_pos: u64, options: DolOptions) -> Result<Self> {
        reader.seek(SeekFrom::Start(start_pos))?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes_at(&bytes, 0, options)
    }

    pub fn options(&self) -> DolOptions {
        self.options
    }

    pub fn set_options(&mut self, options: DolOptions) {
        self.options = options;
    }

    pub fn code_segments(&self) -> &[Segment] {
        &self.code
    }

    pub fn data_segments(&self) -> &[Segment] {
        &self.data
    }

    /// Every segment, code table first.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.code.iter().chain(self.data.iter())
    }

    pub fn space(&self) -> AddressSpace<'_> {
        AddressSpace::new(&self.code, &self.data)
    }

    pub fn segment(&self, r: SegmentRef) -> Option<&Segment> {
        self.table(r.kind).get(r.index)
    }

    pub fn segment_size(&self, kind: SegmentKind, index: usize) -> Option<usize> {
        self.table(kind).get(index).map(Segment::size)
    }

    pub fn resolve(&self, address: u32) -> Result<SegmentRef> {
        self.space().resolve(address as u64).map(|(r, _)| r)
    }

    pub fn is_mapped(&self, address: u32) -> bool {
        self.space().is_mapped(address as u64)
    }

    fn table(&self, kind: SegmentKind) -> &Vec<Segment> {
        match kind {
            SegmentKind::Code => &self.code,
            SegmentKind::Data => &self.data,
        }
    }

    fn table_mut(&mut self, kind: SegmentKind) -> &mut Vec<Segment> {
        match kind {
            SegmentKind::Code => &mut self.code,
            SegmentKind::Data => &mut self.data,
        }
    }

    /// Segment stored first in the file.
    pub fn first_segment(&self) -> Option<&Segment> {
        self.segments().min_by_key(|s| s.offset())
    }

    /// Serialized length of the image.
    pub fn size(&self) -> usize {
        let end = self
            .segments()
            .filter_map(Segment::file_end)
            .max()
            .unwrap_or(0)
            .max(HEADER_SIZE as u64);
        let end = match self.options.size_policy {
            SizePolicy::Exact => end,
            SizePolicy::Padded => align_up(end, HEADER_SIZE as u64),
        };
        end as usize
    }

    /// Moves the cursor. Seeking relative to the end is not supported.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u32> {
        let target = match pos {
            SeekFrom::Start(address) => address,
            SeekFrom::Current(delta) => (self.position as i64)
                .checked_add(delta)
                .and_then(|target| u64::try_from(target).ok())
                .ok_or(DolError::InvalidArgument("seek outside the 64-bit address range"))?,
            SeekFrom::End(_) => {
                return Err(DolError::InvalidArgument(
                    "seeking from the end of the address space is not supported",
                ))
            }
        };
        self.space().resolve(target)?;
        // Resolution succeeded, so the target lies inside a 32-bit segment.
        self.position = target as u32;
        tracing::trace!("seek to 0x{:08X}", self.position);
        Ok(self.position)
    }

    fn seek_to(&mut self, address: u32) -> Result<u32> {
        self.seek(SeekFrom::Start(address as u64))
    }

    pub fn tell(&self) -> u32 {
        self.position
    }

    /// Locates an access of `len` bytes at the cursor, returning the segment
    /// and the offset inside it.
    fn access(&self, len: usize) -> Result<(SegmentRef, usize)> {
        let (r, segment) = self.space().resolve(self.position as u64)?;
        let start = segment.address().unwrap_or(0);
        let segment_end = segment.end().unwrap_or(0);
        if self.position as u64 + len as u64 > segment_end {
            return Err(DolError::SegmentBoundaryExceeded {
                address: self.position,
                len,
                segment_end,
            });
        }
        Ok((r, (self.position - start) as usize))
    }

    fn advance(&mut self, len: usize) {
        self.position = (self.position as u64 + len as u64) as u32;
    }

    /// Fills `buf` from the cursor and advances past it.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let (r, local) = self.access(buf.len())?;
        let bytes = self.table(r.kind)[r.index]
            .read_at(local, buf.len())
            .ok_or(DolError::UnmappedAddress(self.position as u64))?;
        buf.copy_from_slice(bytes);
        self.advance(buf.len());
        Ok(())
    }

    pub fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    /// Overwrites bytes at the cursor and advances past them.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let (r, local) = self.access(bytes.len())?;
        if !self.table_mut(r.kind)[r.index].write_at(local, bytes) {
            return Err(DolError::UnmappedAddress(self.position as u64));
        }
        self.advance(bytes.len());
        Ok(())
    }

    value_io! {
        u8 => read_u8, write_u8;
        i8 => read_i8, write_i8;
        u16 => read_u16, write_u16;
        i16 => read_i16, write_i16;
        u32 => read_u32, write_u32;
        i32 => read_i32, write_i32;
        f32 => read_f32, write_f32;
        f64 => read_f64, write_f64;
    }

    pub fn read_bool(&mut self, address: u32) -> Result<bool> {
        self.read_bool_sized(address, 1)
    }

    pub fn write_bool(&mut self, address: u32, value: bool) -> Result<()> {
        self.write_bool_sized(address, value, 1)
    }

    /// Reads a big-endian boolean stored in `width` bytes. Any nonzero byte
    /// makes it true.
    pub fn read_bool_sized(&mut self, address: u32, width: usize) -> Result<bool> {
        if width == 0 {
            return Err(DolError::InvalidArgument("boolean width must be at least one byte"));
        }
        self.seek_to(address)?;
        Ok(self.read(width)?.iter().any(|&b| b != 0))
    }

    /// Writes a boolean as a `width`-byte big-endian 0 or 1.
    pub fn write_bool_sized(&mut self, address: u32, value: bool, width: usize) -> Result<()> {
        if width == 0 {
            return Err(DolError::InvalidArgument("boolean width must be at least one byte"));
        }
        let mut bytes = vec![0u8; width];
        bytes[width - 1] = value as u8;
        self.seek_to(address)?;
        self.write(&bytes)
    }

    /// Writes `b to` (or `bl to`) at `from`.
    pub fn insert_branch(&mut self, to: u32, from: u32, link: bool) -> Result<()> {
        let from = from & !3;
        let word = encode_branch(to, from, link);
        self.write_u32(from, word)?;
        tracing::debug!("Inserted branch 0x{:08X} -> 0x{:08X} ({:08X})", from, to & !3, word);
        Ok(())
    }

    /// Decodes the branch instruction stored at `at`.
    pub fn extract_branch_addr(&mut self, at: u32) -> Result<Branch> {
        let word = self.read_u32(at)?;
        Ok(decode_branch(word, at))
    }

    /// Reads a NUL-terminated string of at most `max_len` bytes
    /// (0 means unbounded).
    ///
    /// Running off the end of the segment before a terminator is an error;
    /// an undecodable byte is not, and yields the text decoded before it.
    pub fn read_c_string(
        &mut self,
        address: u32,
        max_len: usize,
        encoding: TextEncoding,
    ) -> Result<DecodedString> {
        self.seek_to(address)?;
        let (r, local) = self.access(0)?;
        let segment = &self.table(r.kind)[r.index];
        let available = &segment.data()[local..];
        let window = match max_len {
            0 => available,
            n => &available[..n.min(available.len())],
        };

        let (bytes, consumed) = match window.iter().position(|&b| b == 0) {
            Some(nul) => (window[..nul].to_vec(), nul + 1),
            None if max_len != 0 && window.len() == max_len => (window.to_vec(), max_len),
            None => {
                return Err(DolError::SegmentBoundaryExceeded {
                    address: self.position,
                    len: window.len() + 1,
                    segment_end: segment.end().unwrap_or(0),
                })
            }
        };
        self.advance(consumed);
        Ok(decode_at(address, &bytes, encoding))
    }

    /// Reads a string of exactly `len` bytes.
    pub fn read_string(
        &mut self,
        address: u32,
        len: usize,
        encoding: TextEncoding,
    ) -> Result<DecodedString> {
        self.seek_to(address)?;
        let bytes = self.read(len)?;
        Ok(decode_at(address, &bytes, encoding))
    }

    /// Writes `text` followed by a NUL terminator. Nothing is written if
    /// the whole string does not fit in the segment.
    pub fn write_c_string(&mut self, address: u32, text: &str, encoding: TextEncoding) -> Result<()> {
        let mut bytes = encoding.encode(text)?;
        bytes.push(0);
        self.seek_to(address)?;
        self.write(&bytes)
    }

    /// Adds a segment to the end of its table.
    ///
    /// Missing addresses are allocated after the last segment of the same
    /// table, and missing file offsets after the last payload; offsets are
    /// always aligned to 32 bytes. The image is left untouched if any
    /// check fails.
    pub fn append_segment(&mut self, mut segment: Segment) -> Result<SegmentRef> {
        let kind = segment.kind();
        let capacity = kind.capacity();
        if self.table(kind).len() >= capacity {
            return Err(DolError::SectionCountFull { kind, capacity });
        }

        let size = segment.size() as u64;
        let address = match segment.address() {
            Some(address) => address as u64,
            None => {
                let start = self
                    .table(kind)
                    .last()
                    .and_then(Segment::end)
                    .or_else(|| self.segments().filter_map(Segment::end).max())
                    .unwrap_or(DEFAULT_LOAD_ADDRESS as u64);
                self.allocate_address(start, size)
            }
        };
        let offset = match segment.offset() {
            Some(offset) => offset as u64,
            None => self
                .segments()
                .filter_map(Segment::file_end)
                .max()
                .unwrap_or(HEADER_SIZE as u64),
        };
        let offset = align_up(offset, SEGMENT_ALIGN);

        self.check_placement(kind, address, offset, size, None)?;

        // check_placement bounds both values to 32 bits.
        segment.place(address as u32, offset as u32);
        let table = self.table_mut(kind);
        table.push(segment);
        let r = SegmentRef {
            kind,
            index: table.len() - 1,
        };
        tracing::debug!(
            "Appended {} segment {} at 0x{:08X} (offset {:#x}, size {:#x})",
            kind,
            r.index,
            address,
            offset,
            size
        );
        Ok(r)
    }

    /// Lowest 32-byte aligned free address at or after `start` that can hold
    /// `size` bytes.
    fn allocate_address(&self, start: u64, size: u64) -> u64 {
        let space = self.space();
        let buffer = u32::try_from(align_up(size, SEGMENT_ALIGN)).unwrap_or(u32::MAX);
        let mut address = align_up(start, SEGMENT_ALIGN);
        while let Ok(candidate) = u32::try_from(address) {
            let next = align_up(space.nearest_unmapped(candidate, buffer), SEGMENT_ALIGN);
            if next == address {
                break;
            }
            address = next;
        }
        address
    }

    fn check_placement(
        &self,
        kind: SegmentKind,
        address: u64,
        offset: u64,
        size: u64,
        skip: Option<SegmentRef>,
    ) -> Result<()> {
        // The start must be mapped memory even for an empty segment.
        if address < ADDRESS_MIN as u64
            || address >= ADDRESS_MAX as u64
            || address + size > ADDRESS_MAX as u64
        {
            return Err(DolError::AddressOutOfRange {
                kind,
                address,
                size: size as usize,
            });
        }
        if offset < HEADER_SIZE as u64 || offset + size > u32::MAX as u64 {
            return Err(DolError::FileOverlap {
                offset,
                size: size as usize,
                what: "the header or the 32-bit offset limit".to_string(),
            });
        }
        for (r, other) in self.space().segments() {
            if Some(r) == skip {
                continue;
            }
            if other.intersects(address, size) {
                return Err(DolError::AddressOverlap {
                    address,
                    size: size as usize,
                    other_kind: r.kind,
                    other_index: r.index,
                });
            }
            if other.file_intersects(offset, size) {
                return Err(DolError::FileOverlap {
                    offset,
                    size: size as usize,
                    what: format!("{} segment {}", r.kind, r.index),
                });
            }
        }
        if self.options.strict_bss && size > 0 && self.bss_size > 0 {
            let bss_start = self.bss_address as u64;
            let bss_end = bss_start + self.bss_size as u64;
            if address < bss_end && address + size > bss_start {
                return Err(DolError::BssOverlap {
                    address,
                    size: size as usize,
                    bss_address: self.bss_address,
                    bss_size: self.bss_size,
                });
            }
        }
        Ok(())
    }

    /// Checks every segment against the layout rules.
    ///
    /// Loading does not validate, so damaged images can still be inspected.
    pub fn validate(&self) -> Result<()> {
        for (r, segment) in self.space().segments() {
            let (address, offset) = placement(r, segment)?;
            self.check_placement(r.kind, address as u64, offset as u64, segment.size() as u64, Some(r))?;
        }
        Ok(())
    }

    /// Serializes the image, header first.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut placed = Vec::with_capacity(self.code.len() + self.data.len());
        for (r, segment) in self.space().segments() {
            let (address, offset) = placement(r, segment)?;
            let slot = match r.kind {
                SegmentKind::Code => r.index,
                SegmentKind::Data => CODE_SLOTS + r.index,
            };
            placed.push((slot, address, offset, segment));
        }

        let mut image = vec![0u8; self.size()];
        let mut header = DolHeader::empty();
        for (slot, address, offset, segment) in placed {
            header.set_slot(
                slot,
                SlotEntry {
                    offset,
                    address,
                    size: segment.size() as u32,
                },
            );
            let start = offset as usize;
            image[start..start + segment.size()].copy_from_slice(segment.data());
        }
        header.set_bss(self.bss_address, self.bss_size);
        header.set_entry_point(self.entry_point);
        image[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        Ok(image)
    }

    /// Writes the image to `writer` with the header at `start_pos`.
    pub fn save<W: Write + Seek>(&self, writer: &mut W, start_pos: u64) -> Result<()> {
        let image = self.to_bytes()?;
        writer.seek(SeekFrom::Start(start_pos))?;
        writer.write_all(&image)?;
        tracing::debug!("Saved DOL: {:#x} bytes at {:#x}", image.len(), start_pos);
        Ok(())
    }

    /// Snapshot of the layout for display.
    pub fn report(&self) -> DolReport {
        let info = |(r, segment): (SegmentRef, &Segment)| SegmentInfo {
            segment: r,
            offset: segment.offset(),
            address: segment.address(),
            size: segment.size(),
        };
        let (code, data) = self
            .space()
            .segments()
            .map(info)
            .partition(|s| s.segment.kind == SegmentKind::Code);
        DolReport {
            code,
            data,
            bss_address: self.bss_address,
            bss_size: self.bss_size,
            entry_point: self.entry_point,
            file_size: self.size(),
        }
    }
}

fn placement(r: SegmentRef, segment: &Segment) -> Result<(u32, u32)> {
    let incomplete = |missing| DolError::IncompleteSection {
        kind: r.kind,
        index: r.index,
        missing,
    };
    let address = segment.address().ok_or_else(|| incomplete("address"))?;
    let offset = segment.offset().ok_or_else(|| incomplete("file offset"))?;
    Ok((address, offset))
}

fn decode_at(address: u32, bytes: &[u8], encoding: TextEncoding) -> DecodedString {
    let (text, failure) = encoding.decode(bytes);
    DecodedString {
        text,
        failure: failure.map(|position| DecodeFailure {
            position,
            address: address.wrapping_add(position as u32),
        }),
        encoding,
    }
}

/// One row of a [`DolReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub segment: SegmentRef,
    /// File offset, or `None` if the segment was never placed.
    pub offset: Option<u32>,
    /// Virtual address, or `None` if the segment was never placed.
    pub address: Option<u32>,
    pub size: usize,
}

/// Layout summary of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DolReport {
    pub code: Vec<SegmentInfo>,
    pub data: Vec<SegmentInfo>,
    pub bss_address: u32,
    pub bss_size: u32,
    pub entry_point: u32,
    /// Serialized length under the current size policy.
    pub file_size: usize,
}

impl DolReport {
    pub fn bss_end(&self) -> u64 {
        self.bss_address as u64 + self.bss_size as u64
    }
}
