//! Byte-stream plumbing shared by the reader and the writer.
//!
//! - [`pool`] - buffer pools recycled across slices
//! - [`compression`] - gzip decoding, parallel block gzip encoding, write buffering
//! - [`ahead`] - read-ahead worker over an input slice
//! - [`pipe`] - the channel merging all input slices into one stream
//! - [`slices`] - input slice discovery
//! - [`fs`] - filesystem helpers

pub mod ahead;
pub mod compression;
pub mod fs;
pub mod pipe;
pub mod pool;
pub mod slices;
