//! PowerPC branch encoding.
//!
//! Only the `b`/`bl` family (primary opcode 18, top byte `0x48`) is
//! assembled. Decoding also recognises conditional branches by their top
//! byte, but uses the historical field masks described on
//! [`decode_branch`].

/// Top byte of an unconditional relative branch.
pub const BRANCH_OPCODE: u32 = 0x4800_0000;
/// LI field of an I-form branch, in place.
const LI_MASK: u32 = 0x03FF_FFFC;

/// A decoded branch destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    pub destination: u32,
    pub conditional: bool,
}

/// Encodes `b to` (or `bl to` when `link`) placed at `from`.
///
/// Both addresses are truncated to word alignment first.
pub fn encode_branch(to: u32, from: u32, link: bool) -> u32 {
    let to = to & !3;
    let from = from & !3;
    (to.wrapping_sub(from) & LI_MASK) | BRANCH_OPCODE | link as u32
}

/// Decodes the branch word `word` found at address `at`.
///
/// Words whose top byte is below `0x48` are treated as conditional. The
/// displacement masks are `0xFFFD` (conditional) and `0x03FF_FFFD`
/// (unconditional) rather than the `0xFFFC`/`0x03FF_FFFC` the ISA defines.
/// Existing tooling depends on these exact results, so they are kept as is:
/// a word with LK set decodes one byte past the real target.
pub fn decode_branch(word: u32, at: u32) -> Branch {
    let conditional = (word >> 24) & 0xFF < 0x48;

    let offset: i64 = if conditional {
        let field = (word & 0xFFFD) as i64;
        if word & 0x8000 != 0 {
            field - 0x1_0000
        } else {
            field
        }
    } else {
        let field = (word & 0x03FF_FFFD) as i64;
        if word & 0x0200_0000 != 0 {
            field - 0x0400_0000
        } else {
            field
        }
    };

    Branch {
        destination: (at as i64 + offset) as u32,
        conditional,
    }
}
