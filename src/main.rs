//! Entry point for the dolreader tool.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Map the input DOL and load it.
//! 3. Apply the requested edits (branch patch) and queries (string read).
//! 4. Print the layout report and optionally save the image.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use memmap2::Mmap;
use std::fs::File;
use tracing_subscriber::EnvFilter;

use dolreader::config::Config;
use dolreader::{DolFile, DolReport, SegmentInfo, TextEncoding};

fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let file = File::open(&config.input)
        .with_context(|| format!("failed to open {}", config.input.display()))?;
    let mmap = unsafe { Mmap::map(&file)? };
    let mut dol = DolFile::from_bytes_at(&mmap, 0, config.options())
        .with_context(|| format!("failed to parse {}", config.input.display()))?;

    if let Err(err) = dol.validate() {
        tracing::warn!("{} does not follow the DOL layout rules: {}", config.input.display(), err);
    }

    if let Some((from, to)) = config.branch {
        dol.insert_branch(to, from, config.link)
            .with_context(|| format!("failed to insert branch at 0x{from:08X}"))?;
    }

    if let Some(address) = config.string {
        let string = dol
            .read_c_string(address, 0, TextEncoding::Ascii)
            .with_context(|| format!("failed to read string at 0x{address:08X}"))?;
        if let Some(failure) = string.failure {
            tracing::warn!(
                "byte {} (address 0x{:08X}) is not a valid {} character",
                failure.position,
                failure.address,
                string.encoding.name()
            );
        }
        println!("0x{address:08X}: {:?}", string.text);
    }

    print_report(&dol.report());

    if let Some(output) = &config.output {
        let bytes = dol.to_bytes()?;
        std::fs::write(output, &bytes)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("Saved {:#x} bytes to {}", bytes.len(), output.display());
    }

    Ok(())
}

fn print_segment(label: &str, info: &SegmentInfo) {
    let hex = |v: Option<u32>| v.map_or_else(|| "-".to_string(), |v| format!("0x{v:X}"));
    println!("{label} {}", info.segment.index);
    println!("  {:<14}{}", "File Offset:", hex(info.offset));
    println!("  {:<14}{}", "Virtual addr:", hex(info.address));
    println!("  {:<14}0x{:X}", "Size:", info.size);
}

fn print_report(report: &DolReport) {
    for info in &report.code {
        print_segment("Text section", info);
    }
    for info in &report.data {
        print_segment("Data section", info);
    }
    println!("BSS section");
    println!("  {:<14}0x{:X}", "Virtual addr:", report.bss_address);
    println!("  {:<14}0x{:X}", "Size:", report.bss_size);
    println!("  {:<14}0x{:X}", "End:", report.bss_end());
    println!("Miscellaneous");
    println!("  {:<14}0x{:X}", "Entry point:", report.entry_point);
    println!("  {:<14}{}", "Text sections:", report.code.len());
    println!("  {:<14}{}", "Data sections:", report.data.len());
    println!("  {:<14}0x{:X}", "File length:", report.file_size);
}
