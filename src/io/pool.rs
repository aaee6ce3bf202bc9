//! Object pools for the large buffers of a slicing run.
//!
//! Slices come and go, their buffers don't: every reader and writer layer
//! borrows its buffers from a [`Pool`] through a [`Pooled`] guard, which hands
//! them back when dropped. A guard that is leaked only costs an allocation
//! next time.
//!
//! ```
//! use table_slicer::io::pool::Pool;
//!
//! let pool = Pool::new(2, || Vec::<u8>::with_capacity(1024));
//! {
//!     let mut buffer = pool.get();
//!     buffer.extend_from_slice(b"row\n");
//! }
//! assert_eq!(pool.idle(), 1);
//! assert!(pool.get().is_empty());
//! ```

use crate::config::SlicerConfig;
use crate::error::{Error, Result};
use crate::io::ahead::{AheadBuffers, ReadAheadReader};
use crate::io::compression::{BufferedWriter, GzipBlocks, GzipReader, ParallelGzipWriter};
use flate2::Compression;
use parking_lot::Mutex;
use std::fmt;
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// State that must be cleared before an object is handed out again.
pub trait Reusable {
    fn reset(&mut self);
}

impl Reusable for Vec<u8> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// A free list of homogeneous objects.
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
    create: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: Reusable> Pool<T> {
    /// Creates a pool keeping at most `max_idle` released objects.
    pub fn new(max_idle: usize, create: impl Fn() -> T + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
            create: Box::new(create),
        })
    }

    /// Takes an idle object or creates a new one.
    pub fn get(self: &Arc<Self>) -> Pooled<T> {
        let value = self.idle.lock().pop().unwrap_or_else(|| (self.create)());
        Pooled {
            value: Some(value),
            pool: Arc::clone(self),
        }
    }

    /// Number of released objects waiting for reuse.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn release(&self, mut value: T) {
        value.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(value);
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle.lock().len())
            .field("max_idle", &self.max_idle)
            .finish_non_exhaustive()
    }
}

/// An object borrowed from a [`Pool`], returned on drop.
pub struct Pooled<T: Reusable> {
    value: Option<T>,
    pool: Arc<Pool<T>>,
}

impl<T: Reusable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `drop` takes the value.
        self.value.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Reusable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Reusable> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}

impl<T: Reusable> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled").finish_non_exhaustive()
    }
}

/// The pools shared by the reader and the writer of one run.
///
/// Each constructor method rebinds a pooled buffer to a new source or sink.
#[derive(Clone, Debug)]
pub struct Pools {
    buffered_writers: Arc<Pool<Vec<u8>>>,
    gzip_readers: Arc<Pool<Vec<u8>>>,
    gzip_writers: Arc<Pool<GzipBlocks>>,
    ahead_buffers: Arc<Pool<AheadBuffers>>,
    gzip_threads: Arc<Mutex<Option<Arc<rayon::ThreadPool>>>>,
    gzip_concurrency: usize,
    gzip_level: Compression,
    gzip_block_size: usize,
    ahead_blocks: usize,
    ahead_block_size: usize,
}

/// Input buffer of the gzip decoder.
const GZIP_READ_BUFFER: usize = 256 * 1024;

impl Pools {
    /// Creates empty pools sized from the configuration.
    ///
    /// The compression threads are started by the first [`Pools::gzip_writer`].
    pub fn new(config: &SlicerConfig) -> Result<Self> {
        let concurrency = match config.gzip_concurrency {
            0 => num_cpus::get(),
            n => n,
        };

        let buffer_size = config.buffer_size.as_usize();
        let gzip_block_size = config.gzip_block_size.as_usize();
        let ahead_blocks = config.ahead_blocks;
        let ahead_block_size = config.ahead_block_size.as_usize();
        // Readers: one per open input slice plus the one being drained.
        let open_slices = config.ahead_slices + 1;

        Ok(Self {
            buffered_writers: Pool::new(1, move || Vec::with_capacity(buffer_size)),
            gzip_readers: Pool::new(open_slices, || Vec::with_capacity(GZIP_READ_BUFFER)),
            gzip_writers: Pool::new(1, move || GzipBlocks::new(concurrency, gzip_block_size)),
            ahead_buffers: Pool::new(open_slices, move || {
                AheadBuffers::new(ahead_blocks, ahead_block_size)
            }),
            gzip_threads: Arc::new(Mutex::new(None)),
            gzip_concurrency: concurrency,
            gzip_level: Compression::new(config.gzip_level),
            gzip_block_size,
            ahead_blocks,
            ahead_block_size,
        })
    }

    pub fn buffered_writer<W: Write>(&self, inner: W) -> BufferedWriter<W> {
        BufferedWriter::new(inner, self.buffered_writers.get())
    }

    pub fn gzip_reader<R: Read>(&self, inner: R) -> GzipReader<R> {
        GzipReader::new(inner, self.gzip_readers.get())
    }

    /// # Errors
    ///
    /// Returns [`Error::GzipWorkers`] if the compression thread pool cannot start.
    pub fn gzip_writer<W: Write>(&self, inner: W) -> Result<ParallelGzipWriter<W>> {
        Ok(ParallelGzipWriter::new(
            inner,
            self.gzip_writers.get(),
            self.gzip_threads()?,
            self.gzip_level,
            self.gzip_block_size,
        ))
    }

    fn gzip_threads(&self) -> Result<Arc<rayon::ThreadPool>> {
        let mut threads = self.gzip_threads.lock();
        if let Some(threads) = threads.as_ref() {
            return Ok(Arc::clone(threads));
        }
        let started = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.gzip_concurrency)
                .thread_name(|i| format!("gzip-{i}"))
                .build()
                .map_err(Error::GzipWorkers)?,
        );
        tracing::debug!(threads = self.gzip_concurrency, "gzip workers started");
        *threads = Some(Arc::clone(&started));
        Ok(started)
    }

    /// True once a gzip writer has started the compression threads.
    #[must_use]
    pub fn gzip_threads_started(&self) -> bool {
        self.gzip_threads.lock().is_some()
    }

    /// False when read-ahead is disabled by zero `aheadBlocks`.
    #[must_use]
    pub fn read_ahead_enabled(&self) -> bool {
        self.ahead_blocks > 0
    }

    pub fn ahead_reader<R: Read + Send + 'static>(&self, inner: R) -> ReadAheadReader {
        ReadAheadReader::spawn(
            inner,
            self.ahead_buffers.get(),
            self.ahead_blocks,
            self.ahead_block_size,
        )
    }

    /// Idle objects per pool: buffered writers, gzip readers, gzip writers, read-ahead sets.
    #[must_use]
    pub fn idle(&self) -> [usize; 4] {
        [
            self.buffered_writers.idle(),
            self.gzip_readers.idle(),
            self.gzip_writers.idle(),
            self.ahead_buffers.idle(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ByteSize;
    use std::io::Write as _;

    #[test]
    fn test_release_on_drop() {
        let pool = Pool::new(1, || Vec::<u8>::with_capacity(16));
        let mut first = pool.get();
        let second = pool.get();
        first.push(1);
        drop(first);
        drop(second);
        // Only one object is kept.
        assert_eq!(pool.idle(), 1);
        let reused = pool.get();
        assert!(reused.is_empty());
        assert!(reused.capacity() >= 16);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_pools_reuse_writer_buffers() -> anyhow::Result<()> {
        let config = SlicerConfig {
            buffer_size: ByteSize::b(8),
            gzip_concurrency: 2,
            ..SlicerConfig::default()
        };
        let pools = Pools::new(&config)?;

        let mut writer = pools.buffered_writer(Vec::new());
        writer.write_all(b"0123456789abc")?;
        let out = writer.finish()?;
        assert_eq!(out, b"0123456789abc");
        assert_eq!(pools.idle()[0], 1);

        let mut gz = pools.gzip_writer(Vec::new())?;
        gz.write_all(b"x")?;
        gz.finish()?;
        assert_eq!(pools.idle()[2], 1);
        Ok(())
    }

    #[test]
    fn test_gzip_threads_start_on_first_writer() -> anyhow::Result<()> {
        let config = SlicerConfig {
            gzip: false,
            gzip_concurrency: 2,
            ..SlicerConfig::default()
        };
        let pools = Pools::new(&config)?;
        let mut writer = pools.buffered_writer(Vec::new());
        writer.write_all(b"plain\n")?;
        writer.finish()?;
        assert!(!pools.gzip_threads_started());

        let shared = pools.clone();
        shared.gzip_writer(Vec::new())?.finish()?;
        assert!(pools.gzip_threads_started());
        Ok(())
    }
}
