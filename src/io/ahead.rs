//! Read-ahead over a blocking source.
//!
//! A worker thread keeps reading the source into a set of pooled blocks while
//! the consumer processes the blocks filled earlier.

use crate::io::pool::{Pooled, Reusable};
use crossbeam_channel::{Receiver, Sender};
use std::io::{self, Read};
use std::thread::JoinHandle;

/// Block set of one [`ReadAheadReader`].
#[derive(Debug, Default)]
pub struct AheadBuffers {
    blocks: Vec<Vec<u8>>,
}

impl AheadBuffers {
    #[must_use]
    pub fn new(count: usize, block_size: usize) -> Self {
        Self {
            blocks: (0..count).map(|_| vec![0; block_size]).collect(),
        }
    }
}

impl Reusable for AheadBuffers {
    /// Blocks are overwritten on every fill, nothing to clear.
    fn reset(&mut self) {}
}

type Filled = io::Result<(Vec<u8>, usize)>;

/// Reader prefetching blocks of its source on a worker thread.
///
/// Dropping or closing the reader stops the worker, drops the source on the
/// worker thread and returns all blocks to their pool.
pub struct ReadAheadReader {
    filled: Receiver<Filled>,
    free: Option<Sender<Vec<u8>>>,
    free_rx: Receiver<Vec<u8>>,
    buffers: Pooled<AheadBuffers>,
    worker: Option<JoinHandle<()>>,
    current: Option<(Vec<u8>, usize)>,
    pos: usize,
    done: bool,
}

impl ReadAheadReader {
    /// Starts the worker reading `inner` into `count` blocks of `block_size` bytes.
    pub fn spawn<R: Read + Send + 'static>(
        inner: R,
        mut buffers: Pooled<AheadBuffers>,
        count: usize,
        block_size: usize,
    ) -> Self {
        let count = count.max(1);
        let block_size = block_size.max(1);
        let blocks = &mut buffers.blocks;
        blocks.retain(|block| block.len() == block_size);
        while blocks.len() < count {
            blocks.push(vec![0; block_size]);
        }

        let (filled_tx, filled) = crossbeam_channel::bounded(count);
        let (free, free_rx) = crossbeam_channel::bounded(count);
        for block in blocks.drain(..) {
            // The channel holds exactly `count` blocks.
            let _ = free.send(block);
        }

        let worker_free = free_rx.clone();
        let worker = std::thread::Builder::new()
            .name("read-ahead".into())
            .spawn(move || fill_blocks(inner, &worker_free, &filled_tx));

        match worker {
            Ok(worker) => Self {
                filled,
                free: Some(free),
                free_rx,
                buffers,
                worker: Some(worker),
                current: None,
                pos: 0,
                done: false,
            },
            Err(err) => {
                let (failed_tx, failed) = crossbeam_channel::bounded(1);
                let _ = failed_tx.send(Err(err));
                Self {
                    filled: failed,
                    free: Some(free),
                    free_rx,
                    buffers,
                    worker: None,
                    current: None,
                    pos: 0,
                    done: false,
                }
            }
        }
    }

    /// Stops the worker and returns the blocks to the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread panicked.
    pub fn close(mut self) -> io::Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        // The worker exits once no free block can arrive and its sends fail.
        self.free = None;
        let blocks = &mut self.buffers.blocks;
        if let Some((block, _)) = self.current.take() {
            blocks.push(block);
        }
        for (block, _) in self.filled.iter().flatten() {
            blocks.push(block);
        }

        let panicked = match self.worker.take() {
            Some(worker) => worker.join().is_err(),
            None => false,
        };
        blocks.extend(self.free_rx.try_iter());

        if panicked {
            return Err(io::Error::other("read-ahead worker panicked"));
        }
        Ok(())
    }
}

fn fill_blocks<R: Read>(mut inner: R, free: &Receiver<Vec<u8>>, filled: &Sender<Filled>) {
    while let Ok(mut block) = free.recv() {
        match fill(&mut inner, &mut block) {
            Ok(0) => {
                // An unused block travels back with a zero length so the consumer keeps it.
                let _ = filled.send(Ok((block, 0)));
                return;
            }
            Ok(n) => {
                if filled.send(Ok((block, n))).is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = filled.send(Err(err));
                return;
            }
        }
    }
}

/// Reads until the block is full or the source ends.
fn fill<R: Read>(inner: &mut R, block: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < block.len() {
        match inner.read(&mut block[n..]) {
            Ok(0) => break,
            Ok(read) => n += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(n)
}

impl Read for ReadAheadReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some((block, len)) = &self.current {
                if self.pos < *len {
                    let n = (*len - self.pos).min(out.len());
                    out[..n].copy_from_slice(&block[self.pos..self.pos + n]);
                    self.pos += n;
                    return Ok(n);
                }
            }
            if let Some((block, _)) = self.current.take() {
                if let Some(free) = &self.free {
                    let _ = free.send(block);
                }
            }
            if self.done {
                return Ok(0);
            }

            match self.filled.recv() {
                Ok(Ok((block, 0))) => {
                    self.buffers.blocks.push(block);
                    self.done = true;
                }
                Ok(Ok(filled)) => {
                    self.current = Some(filled);
                    self.pos = 0;
                }
                Ok(Err(err)) => {
                    self.done = true;
                    return Err(err);
                }
                Err(_) => self.done = true,
            }
        }
    }
}

impl Drop for ReadAheadReader {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "read-ahead reader released with an error");
        }
    }
}
