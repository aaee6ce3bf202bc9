//! Sliced table writer.
//!
//! Rows are appended to the current output slice, `part0001`, `part0002`, ...
//! (with a `.gz` suffix when compressed). A new slice is opened when the next
//! row would break the sizing policy. Every slice holds at least one row, so a
//! single row larger than the limit still gets written.

use crate::config::SlicerConfig;
use crate::error::{Error, Result};
use crate::io::compression::{BufferedWriter, GZIP_EXTENSION, ParallelGzipWriter};
use crate::io::pool::Pools;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// How output slices are sized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceSizing {
    /// At most this many uncompressed bytes per slice.
    ByBytes(u64),
    /// At most this many rows per slice.
    ByRows(u64),
    /// Exactly `count` slices, unless that would make them smaller than `min_bytes`.
    ByFixedCount { count: u32, min_bytes: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Limit {
    Bytes(u64),
    Rows(u64),
}

impl SliceSizing {
    /// Resolves a fixed count into a byte limit for `total_input` bytes.
    /// The second value is the maximum number of slices, if capped.
    fn resolve(self, total_input: u64) -> (Limit, Option<u32>) {
        match self {
            Self::ByBytes(max) => (Limit::Bytes(max), None),
            Self::ByRows(max) => (Limit::Rows(max), None),
            Self::ByFixedCount { count, min_bytes } => {
                let count = count.max(1);
                let per_slice = total_input.div_ceil(u64::from(count)).max(min_bytes);
                (Limit::Bytes(per_slice), Some(count))
            }
        }
    }
}

/// Path of the slice with the 1-based `index` in `dir`.
#[must_use]
pub fn slice_path(dir: &Path, index: u32, gzip: bool) -> PathBuf {
    let mut name = format!("part{index:04}");
    if gzip {
        name.push_str(GZIP_EXTENSION);
    }
    dir.join(name)
}

enum SliceTarget {
    Plain(BufferedWriter<File>),
    Gzip(ParallelGzipWriter<File>),
}

/// One output file.
pub struct OutputSlice {
    index: u32,
    path: PathBuf,
    rows: u64,
    bytes: u64,
    target: SliceTarget,
}

impl OutputSlice {
    fn create(index: u32, dir: &Path, gzip: bool, pools: &Pools) -> Result<Self> {
        let path = slice_path(dir, index, gzip);
        let file = File::create(&path).map_err(|err| {
            Error::io(format!("cannot create slice \"{}\"", path.display()), err)
        })?;
        let target = if gzip {
            SliceTarget::Gzip(pools.gzip_writer(file)?)
        } else {
            SliceTarget::Plain(pools.buffered_writer(file))
        };
        tracing::debug!(slice = index, path = %path.display(), "output slice opened");
        Ok(Self {
            index,
            path,
            rows: 0,
            bytes: 0,
            target,
        })
    }

    fn write(&mut self, row: &[u8]) -> Result<()> {
        let written = match &mut self.target {
            SliceTarget::Plain(writer) => writer.write_all(row),
            SliceTarget::Gzip(writer) => writer.write_all(row),
        };
        written.map_err(|err| {
            Error::io(format!("cannot write row to slice \"{}\"", self.path.display()), err)
        })?;
        self.rows += 1;
        self.bytes += row.len() as u64;
        Ok(())
    }

    /// Flushes the slice and writes the gzip trailer, releasing pooled buffers.
    fn close(self) -> Result<()> {
        let finished = match self.target {
            SliceTarget::Plain(writer) => writer.finish(),
            SliceTarget::Gzip(writer) => writer.finish(),
        };
        finished.map_err(|err| {
            Error::io(format!("cannot close slice \"{}\"", self.path.display()), err)
        })?;
        tracing::debug!(
            slice = self.index,
            rows = self.rows,
            bytes = self.bytes,
            "output slice closed"
        );
        Ok(())
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Uncompressed bytes written.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Writes rows into a directory of slices.
///
/// ```no_run
/// use table_slicer::config::SlicerConfig;
/// use table_slicer::io::pool::Pools;
/// use table_slicer::writer::Writer;
/// # fn main() -> table_slicer::Result<()> {
///
/// let config = SlicerConfig::default();
/// let pools = Pools::new(&config)?;
/// let mut writer = Writer::new(&config, pools, 0, "out/tables/orders.csv")?;
/// writer.write(b"1,\"abc\"\n")?;
/// writer.close()?;
/// assert_eq!(writer.slices(), 1);
/// # Ok(())
/// # }
/// ```
pub struct Writer {
    pools: Pools,
    dir: PathBuf,
    gzip: bool,
    limit: Limit,
    max_slices: Option<u32>,
    current: Option<OutputSlice>,
    slices: u32,
    all_rows: u64,
    all_bytes: u64,
}

impl Writer {
    /// Creates the writer and opens the first slice in the existing directory `dir`.
    ///
    /// `total_input` is the uncompressed input size estimate used to resolve
    /// [`SliceSizing::ByFixedCount`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the first slice cannot be created.
    pub fn new(
        config: &SlicerConfig,
        pools: Pools,
        total_input: u64,
        dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let (limit, max_slices) = config.sizing().resolve(total_input);
        let mut writer = Self {
            pools,
            dir: dir.into(),
            gzip: config.gzip,
            limit,
            max_slices,
            current: None,
            slices: 0,
            all_rows: 0,
            all_bytes: 0,
        };
        writer.open_next_slice()?;
        Ok(writer)
    }

    /// Appends one row, including its newline, opening a new slice first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the row cannot be written or a slice cannot be
    /// rolled over, and [`Error::InvalidTable`] after [`Writer::close`].
    pub fn write(&mut self, row: &[u8]) -> Result<()> {
        if self.is_full(row.len() as u64) {
            self.open_next_slice()?;
        }
        let slice = self
            .current
            .as_mut()
            .ok_or_else(|| Error::InvalidTable("the writer is already closed".into()))?;
        slice.write(row)?;
        self.all_rows += 1;
        self.all_bytes += row.len() as u64;
        Ok(())
    }

    /// Closes the open slice. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the slice cannot be flushed.
    pub fn close(&mut self) -> Result<()> {
        match self.current.take() {
            Some(slice) => slice.close(),
            None => Ok(()),
        }
    }

    /// The effective policy, with a fixed count resolved to bytes.
    #[must_use]
    pub fn sizing(&self) -> SliceSizing {
        match self.limit {
            Limit::Bytes(max) => SliceSizing::ByBytes(max),
            Limit::Rows(max) => SliceSizing::ByRows(max),
        }
    }

    #[must_use]
    pub fn current_slice(&self) -> Option<&OutputSlice> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn gzip_enabled(&self) -> bool {
        self.gzip
    }

    /// Number of slices opened so far.
    #[must_use]
    pub fn slices(&self) -> u32 {
        self.slices
    }

    #[must_use]
    pub fn all_rows(&self) -> u64 {
        self.all_rows
    }

    /// Uncompressed bytes written to all slices.
    #[must_use]
    pub fn all_bytes(&self) -> u64 {
        self.all_bytes
    }

    fn is_full(&self, row_len: u64) -> bool {
        let Some(slice) = &self.current else {
            return false;
        };
        // Each slice takes at least one row; the last allowed slice takes the rest.
        if slice.rows == 0 || self.max_slices == Some(self.slices) {
            return false;
        }
        match self.limit {
            Limit::Bytes(max) => slice.bytes + row_len > max,
            Limit::Rows(max) => slice.rows >= max,
        }
    }

    fn open_next_slice(&mut self) -> Result<()> {
        if let Some(slice) = self.current.take() {
            slice.close()?;
        }
        let index = self.slices + 1;
        self.current = Some(OutputSlice::create(index, &self.dir, self.gzip, &self.pools)?);
        self.slices = index;
        Ok(())
    }
}
