//! GameCube DOL executable library.
//!
//! This library reads, edits and writes DOL images. It is organized into
//! several modules:
//! - `header`: The fixed 0x100-byte header layout.
//! - `layout`: Segments and the legal virtual window.
//! - `resolver`: Virtual address to segment resolution and free-space search.
//! - `dol`: The container model with its virtual cursor.
//! - `branch`: PowerPC branch instruction encoding.
//! - `text`: String encodings.
//! - `config`: Library options and the CLI configuration.

pub mod branch;
pub mod config;
pub mod dol;
pub mod error;
pub mod header;
pub mod layout;
pub mod resolver;
pub mod text;
pub mod utils;

pub use dol::{DolFile, DolReport, SegmentInfo};
pub use error::{DolError, Result};
pub use layout::{Segment, SegmentKind};
pub use resolver::SegmentRef;
pub use text::{DecodedString, TextEncoding};
