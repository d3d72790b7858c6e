//! Configuration module.
//!
//! `DolOptions` controls the layout policies of the library. `Config` is the
//! command-line interface of the `dolreader` binary, parsed with `clap`.

use clap::Parser;
use std::path::PathBuf;

/// How the serialized container length is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizePolicy {
    /// End of the last segment payload.
    Exact,
    /// End of the last segment payload, padded to the 0x100 header alignment.
    #[default]
    Padded,
}

/// Layout policies for a [`DolFile`](crate::dol::DolFile).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DolOptions {
    pub size_policy: SizePolicy,
    /// Reject segments that overlap the BSS range.
    pub strict_bss: bool,
}

/// Inspect and patch GameCube DOL executables.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Input DOL file
    pub input: PathBuf,

    /// Write the (possibly patched) image here
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Insert a branch, given as FROM:TO virtual addresses
    #[arg(long, value_parser = parse_branch)]
    pub branch: Option<(u32, u32)>,

    /// Make the inserted branch a linking branch (bl)
    #[arg(long, requires = "branch")]
    pub link: bool,

    /// Print the NUL-terminated string at this address
    #[arg(long, value_parser = parse_address)]
    pub string: Option<u32>,

    /// Do not pad the saved file to 0x100 bytes
    #[arg(long)]
    pub exact_size: bool,

    /// Refuse segments that overlap the BSS range
    #[arg(long)]
    pub strict_bss: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

impl Config {
    pub fn options(&self) -> DolOptions {
        DolOptions {
            size_policy: if self.exact_size {
                SizePolicy::Exact
            } else {
                SizePolicy::Padded
            },
            strict_bss: self.strict_bss,
        }
    }
}

/// Parses `0x`-prefixed hex or plain decimal.
pub fn parse_address(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid address '{s}': {e}"))
}

fn parse_branch(s: &str) -> Result<(u32, u32), String> {
    let (from, to) = s
        .split_once(':')
        .ok_or_else(|| format!("expected FROM:TO, got '{s}'"))?;
    Ok((parse_address(from)?, parse_address(to)?))
}
