// Shared fixtures for the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use table_slicer::config::{LogIntervalConfig, SlicerConfig};
use table_slicer::log::MemoryLogger;
use table_slicer::progress::{MockClock, ProgressLogger};

/// The seven 12-byte rows `"1bc","def"\n` .. `"7bc","def"\n`.
pub fn seven_rows() -> Vec<String> {
    (1..=7).map(|i| format!("\"{i}bc\",\"def\"\n")).collect()
}

/// Config with small buffers, single-threaded gzip and plain output.
pub fn small_config() -> SlicerConfig {
    SlicerConfig {
        gzip: false,
        gzip_concurrency: 1,
        gzip_block_size: table_slicer::ByteSize::kb(4),
        buffer_size: table_slicer::ByteSize::kb(4),
        ahead_blocks: 2,
        ahead_block_size: table_slicer::ByteSize::kb(1),
        ..SlicerConfig::default()
    }
}

/// Progress logger that never fires on its own.
pub fn quiet_progress() -> ProgressLogger {
    ProgressLogger::new(
        Arc::new(MockClock::new()),
        Arc::new(MemoryLogger::default()),
        &LogIntervalConfig::default(),
        0,
        "Reading",
    )
}

pub fn write_gzip(path: &Path, data: &[u8]) -> Result<()> {
    let mut encoder = GzEncoder::new(fs::File::create(path)?, Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()?;
    Ok(())
}

/// Content of a slice, decompressed if it is gzipped.
pub fn read_slice(path: &Path) -> Result<Vec<u8>> {
    let data = fs::read(path)?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        let mut out = Vec::new();
        MultiGzDecoder::new(&data[..]).read_to_end(&mut out)?;
        Ok(out)
    } else {
        Ok(data)
    }
}

/// Slice files of an output directory, in order.
pub fn list_slices(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

pub fn count_rows(data: &[u8]) -> usize {
    data.iter().filter(|&&b| b == b'\n').count()
}
