//! In-process pipe carrying the merged bytes of all input slices.
//!
//! The writing half sends chunks tagged with the index of the slice they came
//! from; a failure is sent as the last message, so the reading half sees the
//! bytes before the failure and then the failure itself, in stream order.
//! Drained chunk buffers travel back to the writer for reuse.

use crate::error::Error;
use crossbeam_channel::{Receiver, Sender};
use std::io::{self, Read};

/// Why [`PipeWriter::copy_from`] stopped.
#[derive(Debug)]
pub enum CopyError {
    /// The source failed.
    Read(io::Error),
    /// The reading half was dropped.
    Closed,
}

struct Chunk {
    slice: usize,
    data: Vec<u8>,
}

/// Creates a pipe buffering up to `depth` chunks of `chunk_size` bytes.
pub fn pipe(depth: usize, chunk_size: usize) -> (PipeWriter, PipeReader) {
    let depth = depth.max(1);
    let (tx, rx) = crossbeam_channel::bounded(depth);
    let (recycle, recycled) = crossbeam_channel::bounded(depth + 1);
    (
        PipeWriter {
            tx,
            recycled,
            chunk_size: chunk_size.max(1),
        },
        PipeReader {
            rx,
            recycle,
            current: None,
            pos: 0,
            slice: None,
            state: State::Open,
        },
    )
}

/// Sending half of a [`pipe`]. Dropping it ends the stream.
pub struct PipeWriter {
    tx: Sender<Result<Chunk, Error>>,
    recycled: Receiver<Vec<u8>>,
    chunk_size: usize,
}

impl PipeWriter {
    /// Copies `source` to its end into the pipe, returns the number of bytes copied.
    ///
    /// Blocks while the pipe is full.
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::Read`] with the read error of `source`, or
    /// [`CopyError::Closed`] when the reading half is gone.
    pub fn copy_from(&self, slice: usize, source: &mut dyn Read) -> Result<u64, CopyError> {
        let mut copied = 0u64;
        loop {
            let mut data = self
                .recycled
                .try_recv()
                .unwrap_or_else(|_| Vec::with_capacity(self.chunk_size));
            data.resize(self.chunk_size, 0);

            let n = loop {
                match source.read(&mut data) {
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    result => break result.map_err(CopyError::Read)?,
                }
            };
            if n == 0 {
                return Ok(copied);
            }
            data.truncate(n);
            copied += n as u64;

            if self.tx.send(Ok(Chunk { slice, data })).is_err() {
                return Err(CopyError::Closed);
            }
        }
    }

    /// Ends the stream with `err`.
    pub fn fail(self, err: Error) {
        // A closed reader no longer cares.
        let _ = self.tx.send(Err(err));
    }
}

enum State {
    Open,
    Ended,
    Failed,
}

/// Receiving half of a [`pipe`].
pub struct PipeReader {
    rx: Receiver<Result<Chunk, Error>>,
    recycle: Sender<Vec<u8>>,
    current: Option<Chunk>,
    pos: usize,
    slice: Option<usize>,
    state: State,
}

impl PipeReader {
    /// Index of the slice the last returned bytes came from.
    #[must_use]
    pub fn current_slice(&self) -> Option<usize> {
        self.slice
    }

    /// Reads the next bytes of the stream, `Ok(0)` at its end.
    ///
    /// # Errors
    ///
    /// Returns the error the writer ended the stream with. Reads after a
    /// failure keep failing.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some(chunk) = &self.current {
                if self.pos < chunk.data.len() {
                    let n = (chunk.data.len() - self.pos).min(out.len());
                    out[..n].copy_from_slice(&chunk.data[self.pos..self.pos + n]);
                    self.pos += n;
                    self.slice = Some(chunk.slice);
                    return Ok(n);
                }
            }
            if let Some(chunk) = self.current.take() {
                // A full queue or a gone writer just drops the buffer.
                let _ = self.recycle.try_send(chunk.data);
            }

            match self.state {
                State::Ended => return Ok(0),
                State::Failed => {
                    return Err(Error::io(
                        "cannot read merged input slices",
                        io::Error::other("the stream has already failed"),
                    ));
                }
                State::Open => {}
            }

            match self.rx.recv() {
                Ok(Ok(chunk)) => {
                    self.current = Some(chunk);
                    self.pos = 0;
                }
                Ok(Err(err)) => {
                    self.state = State::Failed;
                    return Err(err);
                }
                Err(_) => self.state = State::Ended,
            }
        }
    }
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.read_bytes(out).map_err(io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_chunks_arrive_in_order_with_slice_index() -> anyhow::Result<()> {
        let (writer, mut reader) = pipe(2, 3);
        let producer = std::thread::spawn(move || {
            writer.copy_from(0, &mut &b"abcdefg"[..]).is_ok()
                && writer.copy_from(1, &mut &b"hi"[..]).is_ok()
        });

        let mut seen = Vec::new();
        let mut buf = [0u8; 2];
        loop {
            let n = reader.read_bytes(&mut buf)?;
            if n == 0 {
                break;
            }
            seen.push((reader.current_slice(), buf[..n].to_vec()));
        }
        assert!(producer.join().map_err(|_| anyhow::anyhow!("producer panicked"))?);

        let text: Vec<u8> = seen.iter().flat_map(|(_, b)| b.clone()).collect();
        assert_eq!(text, b"abcdefghi");
        assert_eq!(seen.first().map(|s| s.0), Some(Some(0)));
        assert_eq!(seen.last().map(|s| s.0), Some(Some(1)));
        Ok(())
    }

    #[test]
    fn test_failure_follows_data() {
        let (writer, mut reader) = pipe(4, 16);
        writer.copy_from(0, &mut &b"row\n"[..]).unwrap();
        writer.fail(Error::InputNotFound(PathBuf::from("in/part2")));

        let mut buf = [0u8; 16];
        assert_eq!(reader.read_bytes(&mut buf).unwrap(), 4);
        let err = reader.read_bytes(&mut buf).unwrap_err();
        assert!(matches!(err, Error::InputNotFound(_)));
        assert!(reader.read_bytes(&mut buf).is_err());
    }

    #[test]
    fn test_closed_reader_breaks_the_pipe() {
        let (writer, reader) = pipe(1, 4);
        drop(reader);
        let err = writer.copy_from(0, &mut &b"abcdefgh"[..]).unwrap_err();
        assert!(matches!(err, CopyError::Closed));
    }
}
