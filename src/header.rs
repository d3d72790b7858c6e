//! DOL header codec.
//!
//! The header is a fixed 0x100-byte block of big-endian `u32` tables. It is
//! viewed as a slice of `U32Bytes<BigEndian>` words straight out of the
//! source bytes and written back with `bytes_of_slice`.

use object::endian::{BigEndian, U32Bytes};
use object::pod::{bytes_of_slice, slice_from_bytes};
use std::array;

/// Size of the header region. Slots with an offset below this are unused.
pub const HEADER_SIZE: usize = 0x100;
pub const CODE_SLOTS: usize = 7;
pub const DATA_SLOTS: usize = 11;
pub const SLOT_COUNT: usize = CODE_SLOTS + DATA_SLOTS;

pub const OFFSET_TABLE: usize = 0x00;
pub const ADDRESS_TABLE: usize = 0x48;
pub const SIZE_TABLE: usize = 0x90;
pub const BSS_ADDRESS: usize = 0xD8;
pub const BSS_SIZE: usize = 0xDC;
pub const ENTRY_POINT: usize = 0xE0;

const BE: BigEndian = BigEndian;
const WORDS: usize = HEADER_SIZE / 4;

type U32 = U32Bytes<BigEndian>;

/// Decoded header fields.
///
/// Code slots come first in every table, followed by the data slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DolHeader {
    /// File offset of each slot's payload.
    pub offsets: [u32; SLOT_COUNT],
    /// Virtual load address of each slot.
    pub addresses: [u32; SLOT_COUNT],
    /// Payload size of each slot.
    pub sizes: [u32; SLOT_COUNT],
    pub bss_address: u32,
    pub bss_size: u32,
    pub entry_point: u32,
}

/// One row of the three segment tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotEntry {
    pub offset: u32,
    pub address: u32,
    pub size: u32,
}

impl SlotEntry {
    /// A slot is occupied only when its payload starts past the header.
    pub fn is_present(&self) -> bool {
        self.offset as usize >= HEADER_SIZE
    }
}

impl Default for DolHeader {
    fn default() -> Self {
        Self::empty()
    }
}

impl DolHeader {
    /// A header with every slot unused and every field zero.
    pub fn empty() -> Self {
        Self {
            offsets: [0; SLOT_COUNT],
            addresses: [0; SLOT_COUNT],
            sizes: [0; SLOT_COUNT],
            bss_address: 0,
            bss_size: 0,
            entry_point: 0,
        }
    }

    /// Decodes the header at the start of `data`, or `None` if `data` is
    /// shorter than the header.
    pub fn parse(data: &[u8]) -> Option<DolHeader> {
        let (words, _) = slice_from_bytes::<U32>(data, WORDS).ok()?;
        let word = |at: usize| words[at / 4].get(BE);
        let table = |base: usize| -> [u32; SLOT_COUNT] { array::from_fn(|i| word(base + i * 4)) };
        Some(DolHeader {
            offsets: table(OFFSET_TABLE),
            addresses: table(ADDRESS_TABLE),
            sizes: table(SIZE_TABLE),
            bss_address: word(BSS_ADDRESS),
            bss_size: word(BSS_SIZE),
            entry_point: word(ENTRY_POINT),
        })
    }

    pub fn slot(&self, index: usize) -> SlotEntry {
        SlotEntry {
            offset: self.offsets[index],
            address: self.addresses[index],
            size: self.sizes[index],
        }
    }

    pub fn set_slot(&mut self, index: usize, entry: SlotEntry) {
        self.offsets[index] = entry.offset;
        self.addresses[index] = entry.address;
        self.sizes[index] = entry.size;
    }

    pub fn bss(&self) -> (u32, u32) {
        (self.bss_address, self.bss_size)
    }

    pub fn set_bss(&mut self, address: u32, size: u32) {
        self.bss_address = address;
        self.bss_size = size;
    }

    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    pub fn set_entry_point(&mut self, entry: u32) {
        self.entry_point = entry;
    }

    /// Encodes the full 0x100-byte header, padding included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut words = [U32::new(BE, 0); WORDS];
        let mut put = |at: usize, value: u32| words[at / 4] = U32::new(BE, value);
        for slot in 0..SLOT_COUNT {
            put(OFFSET_TABLE + slot * 4, self.offsets[slot]);
            put(ADDRESS_TABLE + slot * 4, self.addresses[slot]);
            put(SIZE_TABLE + slot * 4, self.sizes[slot]);
        }
        put(BSS_ADDRESS, self.bss_address);
        put(BSS_SIZE, self.bss_size);
        put(ENTRY_POINT, self.entry_point);
        bytes_of_slice(&words).to_vec()
    }
}
