//! Row reader over one or more input slices.
//!
//! Slicing never decodes columns, it only has to find row boundaries, see
//! [`RowScanner`]. The input slices are merged into one byte stream by two
//! background threads:
//!
//! - the *opener* opens the slices in order, each one wrapped as
//!   file, progress meter, gzip decoder (for `.gz`) and read-ahead worker,
//!   and queues them;
//! - the *copier* drains the queued slices one by one into a [`pipe`],
//!   releasing each slice as soon as it is exhausted.
//!
//! At most `aheadSlices` input files are open at any time; opening the next
//! one waits until an earlier one is closed. A failure on either thread ends
//! the merged stream, so the rows before it are delivered and the failure is
//! returned by the next [`Reader::next_row`].

use crate::columns::ColumnParser;
use crate::config::SlicerConfig;
use crate::error::{Error, Result, keep_first};
use crate::io::ahead::ReadAheadReader;
use crate::io::pipe::{CopyError, PipeReader, PipeWriter, pipe};
use crate::io::pool::Pools;
use crate::io::slices::InputSlice;
use crate::progress::ProgressLogger;
use crate::scanner::RowScanner;
use crossbeam_channel::{Receiver, Sender};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;

/// Initial size of the scan buffer.
const START_BUFFER_SIZE: usize = 8 * 1024 * 1024;
/// Chunks buffered between the copier and the scanner.
const PIPE_DEPTH: usize = 8;
const PIPE_CHUNK_SIZE: usize = 256 * 1024;

/// Shared open-file counter with a high-water mark.
#[derive(Debug, Default)]
struct OpenCounter {
    open: AtomicUsize,
    max: AtomicUsize,
}

/// Holds one of the `aheadSlices` open-file slots.
struct OpenSlot {
    release: Receiver<()>,
    counter: Arc<OpenCounter>,
}

impl OpenSlot {
    fn new(release: Receiver<()>, counter: Arc<OpenCounter>) -> Self {
        let open = counter.open.fetch_add(1, Ordering::SeqCst) + 1;
        counter.max.fetch_max(open, Ordering::SeqCst);
        Self { release, counter }
    }
}

impl Drop for OpenSlot {
    fn drop(&mut self) {
        self.counter.open.fetch_sub(1, Ordering::SeqCst);
        // One token per held slot.
        let _ = self.release.try_recv();
    }
}

enum SliceStream {
    Direct(Box<dyn Read + Send>),
    Ahead(ReadAheadReader),
}

/// A prepared input slice waiting to be copied.
struct OpenedSlice {
    index: usize,
    name: String,
    stream: SliceStream,
    // Dropped last, after the file is closed.
    _slot: OpenSlot,
}

impl OpenedSlice {
    fn reader(&mut self) -> &mut dyn Read {
        match &mut self.stream {
            SliceStream::Direct(reader) => reader.as_mut(),
            SliceStream::Ahead(reader) => reader,
        }
    }

    /// Releases the read-ahead worker, the decoder and the file, in that order.
    fn close(self) -> io::Result<()> {
        match self.stream {
            SliceStream::Direct(reader) => {
                drop(reader);
                Ok(())
            }
            SliceStream::Ahead(reader) => reader.close(),
        }
    }
}

/// Opens the input slices and builds their reader chains.
struct SliceOpener {
    pools: Pools,
    progress: ProgressLogger,
    counter: Arc<OpenCounter>,
}

impl SliceOpener {
    fn open(&self, index: usize, slice: &InputSlice, slot: OpenSlot) -> Result<OpenedSlice> {
        let file = File::open(&slice.path).map_err(|err| {
            Error::io(format!("cannot open slice \"{}\"", slice.path.display()), err)
        })?;
        let metered = self.progress.meter(file);
        let decoded: Box<dyn Read + Send> = if slice.is_compressed() {
            Box::new(self.pools.gzip_reader(metered))
        } else {
            Box::new(metered)
        };
        let stream = if self.pools.read_ahead_enabled() {
            SliceStream::Ahead(self.pools.ahead_reader(decoded))
        } else {
            SliceStream::Direct(decoded)
        };
        tracing::debug!(slice = index, path = %slice.path.display(), "input slice opened");
        Ok(OpenedSlice {
            index,
            name: slice.name(),
            stream,
            _slot: slot,
        })
    }

    fn run(
        &self,
        slices: Vec<InputSlice>,
        queue: &Sender<Result<OpenedSlice>>,
        slots: &Sender<()>,
        released: &Receiver<()>,
        cancelled: &AtomicBool,
    ) {
        for (index, slice) in slices.iter().enumerate() {
            // Blocks while all slots are taken.
            if cancelled.load(Ordering::SeqCst) || slots.send(()).is_err() {
                return;
            }
            let slot = OpenSlot::new(released.clone(), Arc::clone(&self.counter));
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            let opened = self.open(index, slice, slot);
            let failed = opened.is_err();
            if queue.send(opened).is_err() || failed {
                return;
            }
        }
    }
}

/// Drains the queued slices into the pipe in order.
fn copy_slices(queue: &Receiver<Result<OpenedSlice>>, out: PipeWriter, cancelled: &AtomicBool) {
    let mut result = Ok(());
    for opened in queue.iter() {
        let mut slice = match opened {
            Ok(slice) => slice,
            Err(err) => {
                result = Err(err);
                break;
            }
        };

        let copied = out.copy_from(slice.index, slice.reader());
        let name = slice.name.clone();
        let closed = slice
            .close()
            .map_err(|err| Error::io(format!("cannot close slice \"{name}\""), err));
        let copied = match copied {
            Ok(bytes) => {
                tracing::debug!(slice = %name, bytes, "input slice copied");
                Ok(())
            }
            // The consumer stopped reading, not an error.
            Err(CopyError::Closed) => break,
            Err(CopyError::Read(err)) => {
                Err(Error::io(format!("cannot read slice \"{name}\""), err))
            }
        };
        if let Err(err) = keep_first(copied, closed) {
            result = Err(err);
            break;
        }
    }

    cancelled.store(true, Ordering::SeqCst);
    if let Err(err) = result {
        out.fail(err);
    } else {
        drop(out);
    }
    // Release the slots of slices opened ahead and wait for the opener to stop.
    queue.iter().for_each(drop);
}

/// Row cursor over the merged input slices.
///
/// ```no_run
/// use std::sync::Arc;
/// use table_slicer::columns::ColumnParser;
/// use table_slicer::config::SlicerConfig;
/// use table_slicer::io::pool::Pools;
/// use table_slicer::io::slices::InputSlice;
/// use table_slicer::log::TracingLogger;
/// use table_slicer::progress::{ProgressLogger, SystemClock};
/// use table_slicer::reader::Reader;
/// # fn main() -> table_slicer::Result<()> {
///
/// let config = SlicerConfig::default();
/// let input = InputSlice::from_path("in/tables/orders.csv")?;
/// let progress = ProgressLogger::new(
///     Arc::new(SystemClock),
///     Arc::new(TracingLogger),
///     &config.log_interval,
///     input.size,
///     "Reading:",
/// );
/// let mut reader = Reader::for_file(
///     input,
///     ColumnParser::new(b',', b'"'),
///     &config,
///     &Pools::new(&config)?,
///     &progress,
/// )?;
/// println!("columns: {:?}", reader.header()?);
/// while let Some(row) = reader.next_row()? {
///     print!("{}", String::from_utf8_lossy(row));
/// }
/// reader.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Reader {
    table: String,
    slice_names: Vec<String>,
    sliced: bool,
    parser: ColumnParser,
    scanner: RowScanner,
    pipe: Option<PipeReader>,
    buffer: Vec<u8>,
    start: usize,
    end: usize,
    eof: bool,
    max_row_size: usize,
    rows: u64,
    counter: Arc<OpenCounter>,
    cancelled: Arc<AtomicBool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Reader {
    /// Reader of a single CSV file, its header can be read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the merge threads cannot be started.
    pub fn for_file(
        input: InputSlice,
        parser: ColumnParser,
        config: &SlicerConfig,
        pools: &Pools,
        progress: &ProgressLogger,
    ) -> Result<Self> {
        let table = input.name();
        Self::start(table, vec![input], false, parser, config, pools, progress)
    }

    /// Reader of a sliced table, the slices are read in the given order.
    /// Sliced tables carry no header row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the merge threads cannot be started.
    pub fn for_slices(
        dir: &Path,
        slices: Vec<InputSlice>,
        parser: ColumnParser,
        config: &SlicerConfig,
        pools: &Pools,
        progress: &ProgressLogger,
    ) -> Result<Self> {
        let table = dir.file_name().map_or_else(
            || dir.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        Self::start(table, slices, true, parser, config, pools, progress)
    }

    fn start(
        table: String,
        slices: Vec<InputSlice>,
        sliced: bool,
        parser: ColumnParser,
        config: &SlicerConfig,
        pools: &Pools,
        progress: &ProgressLogger,
    ) -> Result<Self> {
        let ahead = config.ahead_slices.max(1);
        let max_row_size = config.max_row_size.as_usize().max(1);
        let slice_names = slices.iter().map(InputSlice::name).collect();

        let (queue_tx, queue_rx) = crossbeam_channel::bounded(ahead);
        let (slots_tx, slots_rx) = crossbeam_channel::bounded(ahead);
        let (pipe_out, pipe_in) = pipe(PIPE_DEPTH, PIPE_CHUNK_SIZE);
        let counter = Arc::new(OpenCounter::default());
        let cancelled = Arc::new(AtomicBool::new(false));

        let mut reader = Self {
            table,
            slice_names,
            sliced,
            parser,
            scanner: RowScanner::new(parser.enclosure()),
            pipe: Some(pipe_in),
            buffer: vec![0; START_BUFFER_SIZE.min(max_row_size)],
            start: 0,
            end: 0,
            eof: false,
            max_row_size,
            rows: 0,
            counter: Arc::clone(&counter),
            cancelled: Arc::clone(&cancelled),
            tasks: Vec::with_capacity(2),
        };

        let opener = SliceOpener {
            pools: pools.clone(),
            progress: progress.clone(),
            counter,
        };
        let opener_cancelled = Arc::clone(&cancelled);
        let spawned = std::thread::Builder::new()
            .name("slice-opener".into())
            .spawn(move || {
                opener.run(slices, &queue_tx, &slots_tx, &slots_rx, &opener_cancelled);
            })
            .map_err(|err| Error::io("cannot start the slice opener", err))?;
        reader.tasks.push(("slice-opener", spawned));

        let spawned = std::thread::Builder::new()
            .name("slice-copier".into())
            .spawn(move || copy_slices(&queue_rx, pipe_out, &cancelled))
            .map_err(|err| Error::io("cannot start the slice copier", err))?;
        reader.tasks.push(("slice-copier", spawned));

        Ok(reader)
    }

    /// Reads and parses the header row. Only possible for a single file before
    /// any other row is read.
    ///
    /// # Errors
    ///
    /// - [`Error::HeaderUnavailable`] for sliced input or after rows were read
    /// - [`Error::MissingHeader`] for an empty file
    /// - [`Error::HeaderParse`] for a malformed header row
    pub fn header(&mut self) -> Result<Vec<String>> {
        if self.sliced {
            return Err(Error::HeaderUnavailable {
                table: self.table.clone(),
                reason: "the table is sliced, the header should be present in the manifest",
            });
        }
        if self.rows != 0 {
            return Err(Error::HeaderUnavailable {
                table: self.table.clone(),
                reason: "other rows have already been read",
            });
        }

        let parser = self.parser;
        let table = self.table.clone();
        match self.next_row()? {
            Some(row) => parser.parse(row).map_err(Error::HeaderParse),
            None => Err(Error::MissingHeader(table)),
        }
    }

    /// Advances to the next row. The row includes its newline, if it has one,
    /// and is only valid until the next call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RowTooLarge`] for a row longer than `maxRowSize`, or the
    /// error that ended the merged stream.
    pub fn next_row(&mut self) -> Result<Option<&[u8]>> {
        loop {
            let (consumed, found) = {
                let window = &self.buffer[self.start..self.end];
                let (consumed, row) = self.scanner.next(window, self.eof);
                (consumed, row.map(<[u8]>::len))
            };
            if let Some(len) = found {
                let row_start = self.start;
                self.start += consumed;
                self.rows += 1;
                return Ok(Some(&self.buffer[row_start..row_start + len]));
            }
            if self.eof {
                return Ok(None);
            }
            self.fill()?;
        }
    }

    /// Reads more bytes into the scan buffer, growing it up to `maxRowSize`.
    fn fill(&mut self) -> Result<()> {
        if self.start > 0 {
            self.buffer.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.end == self.buffer.len() {
            if self.buffer.len() >= self.max_row_size {
                return Err(Error::RowTooLarge {
                    slice: self.current_slice_name(),
                    max_size: self.max_row_size,
                });
            }
            let grown = (self.buffer.len() * 2).clamp(1, self.max_row_size);
            self.buffer.resize(grown, 0);
        }

        let Some(pipe) = self.pipe.as_mut() else {
            self.eof = true;
            return Ok(());
        };
        let n = pipe.read_bytes(&mut self.buffer[self.end..])?;
        if n == 0 {
            self.eof = true;
        }
        self.end += n;
        Ok(())
    }

    fn current_slice_name(&self) -> String {
        self.pipe
            .as_ref()
            .and_then(PipeReader::current_slice)
            .and_then(|index| self.slice_names.get(index).cloned())
            .unwrap_or_else(|| self.table.clone())
    }

    /// Number of input slices.
    #[must_use]
    pub fn slices(&self) -> usize {
        self.slice_names.len()
    }

    /// Rows returned so far, including the header.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    #[must_use]
    pub fn is_sliced(&self) -> bool {
        self.sliced
    }

    /// Most input slices that were open at the same time.
    #[must_use]
    pub fn max_open_slices(&self) -> usize {
        self.counter.max.load(Ordering::SeqCst)
    }

    /// Stops the merge threads and releases all open slices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskPanicked`] if a merge thread panicked.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        // Unblocks a copier waiting on a full pipe.
        self.pipe = None;
        let mut result = Ok(());
        for (name, task) in self.tasks.drain(..) {
            if task.join().is_err() {
                result = keep_first(result, Err(Error::TaskPanicked(name)));
            }
        }
        result
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(table = %self.table, error = %err, "reader released with an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ByteSize, LogIntervalConfig};
    use crate::log::MemoryLogger;
    use crate::progress::MockClock;
    use std::fs;
    use tempfile::TempDir;

    fn progress() -> ProgressLogger {
        ProgressLogger::new(
            Arc::new(MockClock::new()),
            Arc::new(MemoryLogger::default()),
            &LogIntervalConfig::default(),
            0,
            "test",
        )
    }

    #[test]
    fn test_row_too_large_names_the_slice() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("part1"), b"ok\n")?;
        fs::write(dir.path().join("part2"), b"\"this row is too long\"\n")?;
        let slices = crate::io::slices::find_slices(dir.path())?;

        let config = SlicerConfig {
            max_row_size: ByteSize::b(8),
            ahead_blocks: 0,
            ..SlicerConfig::default()
        };
        let pools = Pools::new(&config)?;
        let mut reader = Reader::for_slices(
            dir.path(),
            slices,
            ColumnParser::new(b',', b'"'),
            &config,
            &pools,
            &progress(),
        )?;

        assert_eq!(reader.next_row()?, Some(&b"ok\n"[..]));
        let err = reader.next_row().unwrap_err();
        assert_eq!(
            err.to_string(),
            "row in slice \"part2\" exceeds the maximum row size of 8 bytes"
        );
        reader.close()?;
        Ok(())
    }

    #[test]
    fn test_row_filling_the_whole_buffer() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let row = format!("{}\n", "x".repeat(100));
        let path = dir.path().join("table.csv");
        fs::write(&path, row.repeat(3))?;

        let config = SlicerConfig {
            max_row_size: ByteSize::b(101),
            ..SlicerConfig::default()
        };
        let pools = Pools::new(&config)?;
        let mut reader = Reader::for_file(
            InputSlice::from_path(&path)?,
            ColumnParser::new(b',', b'"'),
            &config,
            &pools,
            &progress(),
        )?;
        let mut rows = 0;
        while let Some(read) = reader.next_row()? {
            assert_eq!(read, row.as_bytes());
            rows += 1;
        }
        assert_eq!(rows, 3);
        assert_eq!(reader.rows(), 3);
        reader.close()?;
        Ok(())
    }
}
