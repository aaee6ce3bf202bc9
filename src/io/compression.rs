//! Gzip support for slice files.
//!
//! Compression is detected from the file extension only, see [`is_gzip_path`].
//!
//! ## Reading
//!
//! [`GzipReader`] decodes all members of a gzip file, so concatenated gzip
//! files and the output of [`ParallelGzipWriter`] read back as one stream.
//!
//! ## Writing
//!
//! [`ParallelGzipWriter`] cuts the stream into fixed-size blocks and compresses
//! a batch of blocks in parallel on a dedicated `rayon` pool. Each block becomes
//! an independent gzip member; the members are written in input order.
//!
//! ```
//! use flate2::Compression;
//! use std::io::{Read, Write};
//! use std::sync::Arc;
//! use table_slicer::io::compression::{GzipBlocks, GzipReader, ParallelGzipWriter};
//! use table_slicer::io::pool::Pool;
//! # fn main() -> anyhow::Result<()> {
//!
//! let threads = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(2).build()?);
//! let blocks = Pool::new(1, || GzipBlocks::new(2, 4));
//! let mut writer = ParallelGzipWriter::new(Vec::new(), blocks.get(), threads, Compression::fast(), 4);
//! writer.write_all(b"id,name\n1,abc\n")?;
//! let compressed = writer.finish()?;
//!
//! let buffers = Pool::new(1, || Vec::with_capacity(64));
//! let mut text = String::new();
//! GzipReader::new(compressed.as_slice(), buffers.get()).read_to_string(&mut text)?;
//! assert_eq!(text, "id,name\n1,abc\n");
//! # Ok(())
//! # }
//! ```

use crate::io::pool::{Pooled, Reusable};
use flate2::Compression;
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use rayon::prelude::*;
use std::io::{self, BufRead, Read, Write};
use std::path::Path;
use std::sync::Arc;

/// File extension of gzip compressed slices.
pub const GZIP_EXTENSION: &str = ".gz";

/// Returns true when the path ends with the lowercase gzip extension.
#[must_use]
pub fn is_gzip_path(path: impl AsRef<Path>) -> bool {
    path.as_ref().to_string_lossy().ends_with(GZIP_EXTENSION)
}

/// `BufRead` adapter over a pooled buffer.
struct PooledBufReader<R> {
    inner: R,
    buffer: Pooled<Vec<u8>>,
    pos: usize,
    filled: usize,
}

impl<R: Read> PooledBufReader<R> {
    fn new(inner: R, mut buffer: Pooled<Vec<u8>>) -> Self {
        let size = buffer.capacity().max(1);
        buffer.resize(size, 0);
        Self {
            inner,
            buffer,
            pos: 0,
            filled: 0,
        }
    }
}

impl<R: Read> Read for PooledBufReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for PooledBufReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.filled {
            self.filled = self.inner.read(&mut self.buffer)?;
            self.pos = 0;
        }
        Ok(&self.buffer[self.pos..self.filled])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.filled);
    }
}

/// Multi-member gzip decoder reading through a pooled input buffer.
pub struct GzipReader<R> {
    decoder: MultiGzDecoder<PooledBufReader<R>>,
}

impl<R: Read> GzipReader<R> {
    pub fn new(inner: R, buffer: Pooled<Vec<u8>>) -> Self {
        Self {
            decoder: MultiGzDecoder::new(PooledBufReader::new(inner, buffer)),
        }
    }
}

impl<R: Read> Read for GzipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf)
    }
}

/// Block buffers of a [`ParallelGzipWriter`].
#[derive(Debug)]
pub struct GzipBlocks {
    input: Vec<Vec<u8>>,
    output: Vec<Vec<u8>>,
}

impl GzipBlocks {
    /// `count` blocks of `block_size` bytes, compressed together as one batch.
    #[must_use]
    pub fn new(count: usize, block_size: usize) -> Self {
        let count = count.max(1);
        Self {
            input: (0..count).map(|_| Vec::with_capacity(block_size)).collect(),
            output: (0..count).map(|_| Vec::new()).collect(),
        }
    }
}

impl Reusable for GzipBlocks {
    fn reset(&mut self) {
        self.input.iter_mut().for_each(Vec::clear);
        self.output.iter_mut().for_each(Vec::clear);
    }
}

/// Gzip writer compressing blocks in parallel.
pub struct ParallelGzipWriter<W: Write> {
    inner: W,
    blocks: Pooled<GzipBlocks>,
    threads: Arc<rayon::ThreadPool>,
    level: Compression,
    block_size: usize,
    /// Index of the block being filled.
    current: usize,
    members: u64,
}

impl<W: Write> ParallelGzipWriter<W> {
    pub fn new(
        inner: W,
        blocks: Pooled<GzipBlocks>,
        threads: Arc<rayon::ThreadPool>,
        level: Compression,
        block_size: usize,
    ) -> Self {
        Self {
            inner,
            blocks,
            threads,
            level,
            block_size: block_size.max(1),
            current: 0,
            members: 0,
        }
    }

    /// Compresses the buffered blocks, flushes and returns the inner writer.
    ///
    /// An empty stream still produces one (empty) gzip member.
    ///
    /// # Errors
    ///
    /// Returns any compression or write error.
    pub fn finish(mut self) -> io::Result<W> {
        self.compress_pending()?;
        if self.members == 0 {
            let empty = GzEncoder::new(Vec::new(), self.level).finish()?;
            self.inner.write_all(&empty)?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn compress_pending(&mut self) -> io::Result<()> {
        let GzipBlocks { input, output } = &mut *self.blocks;
        let used = input.iter().take_while(|block| !block.is_empty()).count();
        if used == 0 {
            return Ok(());
        }

        let level = self.level;
        self.threads.install(|| {
            input[..used]
                .par_iter()
                .zip(output[..used].par_iter_mut())
                .try_for_each(|(block, member)| -> io::Result<()> {
                    member.clear();
                    let mut encoder = GzEncoder::new(std::mem::take(member), level);
                    encoder.write_all(block)?;
                    *member = encoder.finish()?;
                    Ok(())
                })
        })?;

        for member in &output[..used] {
            self.inner.write_all(member)?;
        }
        self.members += used as u64;
        self.blocks.reset();
        self.current = 0;
        Ok(())
    }
}

impl<W: Write> Write for ParallelGzipWriter<W> {
    fn write(&mut self, mut data: &[u8]) -> io::Result<usize> {
        let written = data.len();
        while !data.is_empty() {
            let block = &mut self.blocks.input[self.current];
            let take = (self.block_size - block.len()).min(data.len());
            block.extend_from_slice(&data[..take]);
            data = &data[take..];

            if block.len() == self.block_size {
                self.current += 1;
                if self.current == self.blocks.input.len() {
                    self.compress_pending()?;
                }
            }
        }
        Ok(written)
    }

    /// Flushes the inner writer only; partial blocks stay buffered until
    /// they fill up or [`ParallelGzipWriter::finish`] is called.
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Write buffer over a pooled `Vec`.
pub struct BufferedWriter<W: Write> {
    inner: W,
    buffer: Pooled<Vec<u8>>,
    capacity: usize,
}

impl<W: Write> BufferedWriter<W> {
    pub fn new(inner: W, buffer: Pooled<Vec<u8>>) -> Self {
        let capacity = buffer.capacity().max(1);
        Self {
            inner,
            buffer,
            capacity,
        }
    }

    /// Flushes the buffer and returns the inner writer.
    ///
    /// # Errors
    ///
    /// Returns any write error of the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush()?;
        Ok(self.inner)
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            self.inner.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }
}

impl<W: Write> Write for BufferedWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buffer.len() + data.len() > self.capacity {
            self.flush_buffer()?;
        }
        if data.len() >= self.capacity {
            self.inner.write_all(data)?;
        } else {
            self.buffer.extend_from_slice(data);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer()?;
        self.inner.flush()
    }
}
