//! Address space resolution.
//!
//! Maps virtual addresses onto the segments that back them. Segments are
//! always scanned code table first, then data table, each in table order.
//! When a damaged table has overlapping ranges the first match wins.

use crate::error::{DolError, Result};
use crate::layout::{Segment, SegmentKind};

/// Identifies a segment by its table and position in that table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentRef {
    pub kind: SegmentKind,
    /// Position in the table, which is also the header slot within that kind.
    pub index: usize,
}

/// Read-only view over the two segment tables.
#[derive(Clone, Copy)]
pub struct AddressSpace<'a> {
    code: &'a [Segment],
    data: &'a [Segment],
}

impl<'a> AddressSpace<'a> {
    pub fn new(code: &'a [Segment], data: &'a [Segment]) -> Self {
        Self { code, data }
    }

    /// All segments in scan order.
    pub fn segments(&self) -> impl Iterator<Item = (SegmentRef, &'a Segment)> + 'a {
        let code = self.code.iter().enumerate().map(|(index, seg)| {
            let r = SegmentRef {
                kind: SegmentKind::Code,
                index,
            };
            (r, seg)
        });
        let data = self.data.iter().enumerate().map(|(index, seg)| {
            let r = SegmentRef {
                kind: SegmentKind::Data,
                index,
            };
            (r, seg)
        });
        code.chain(data)
    }

    /// Finds the segment housing `addr`.
    pub fn resolve(&self, addr: u64) -> Result<(SegmentRef, &'a Segment)> {
        self.segments()
            .find(|(_, seg)| seg.contains(addr))
            .ok_or(DolError::UnmappedAddress(addr))
    }

    pub fn is_mapped(&self, addr: u64) -> bool {
        self.resolve(addr).is_ok()
    }

    /// First segment whose virtual range intersects `[addr, addr + len)`.
    pub fn overlapping(&self, addr: u64, len: u64) -> Option<(SegmentRef, &'a Segment)> {
        self.segments().find(|(_, seg)| seg.intersects(addr, len))
    }

    /// Lowest address at or above `addr` that leaves `buffer` bytes free
    /// before the next segment.
    ///
    /// A segment collides unless it ends at or before `addr` or starts past
    /// `addr + buffer`. A segment starting exactly at `addr + buffer` still
    /// collides, so a result is never flush against the following segment.
    /// Each collision moves `addr` to the end of the colliding segment and
    /// restarts the scan, since the move may run into a segment that was
    /// already checked.
    pub fn nearest_unmapped(&self, addr: u32, buffer: u32) -> u64 {
        let mut addr = addr as u64;
        loop {
            let limit = addr + buffer as u64;
            let hit = self.segments().find_map(|(_, seg)| {
                let start = seg.address()? as u64;
                let end = seg.end()?;
                // end > addr keeps every move strictly forward.
                (start <= limit && end > addr).then_some(end)
            });
            match hit {
                Some(end) => addr = end,
                None => return addr,
            }
        }
    }
}
