//! # Table Slicer
//!
//! Splits large CSV tables into many smaller **slices** that can be loaded in
//! parallel. The input is either a single CSV file with a header row or a
//! directory of headerless slices; the output is always a directory of slices
//! `part0001`, `part0002`, ... plus a manifest carrying the column names.
//!
//! ## Key Features
//!
//! - **Streaming** - rows are never decoded, only their boundaries are found,
//!   so memory use does not depend on the table size
//! - **Three sizing policies** - by bytes, by rows or into a fixed number of slices
//! - **Gzip in and out** - `.gz` input slices are decompressed on the fly, output
//!   slices are compressed in parallel blocks
//! - **Bounded read-ahead** - a configurable number of input slices is opened
//!   and decoded ahead of consumption, never more
//! - **Progress reporting** - read percentage logged at growing intervals
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use table_slicer::config::{Mode, SlicerConfig};
//! use table_slicer::log::TracingLogger;
//! use table_slicer::{SliceOutcome, Slicer, Table};
//!
//! # fn main() -> table_slicer::Result<()> {
//! let table = Table {
//!     name: "orders".into(),
//!     in_path: "in/tables/orders.csv".into(),
//!     in_manifest_path: Some("in/tables/orders.csv.manifest".into()),
//!     out_path: "out/tables/orders.csv".into(),
//!     out_manifest_path: "out/tables/orders.csv.manifest".into(),
//!     config: SlicerConfig {
//!         mode: Mode::Rows,
//!         rows_per_slice: 100_000,
//!         ..SlicerConfig::default()
//!     },
//!     ..Table::default()
//! };
//!
//! match Slicer::new(Arc::new(TracingLogger)).slice_table(&table)? {
//!     SliceOutcome::Sliced(stats) => println!("{} slices", stats.output_slices),
//!     SliceOutcome::Skipped { .. } => println!("too small, copied"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Reader
//!
//! A [`Reader`](reader::Reader) merges the input slices, in name order, into
//! one stream and cuts it into rows with a [`RowScanner`](scanner::RowScanner).
//! Two background threads open and drain the slices; at most `aheadSlices` of
//! them are open at a time.
//!
//! ### Writer
//!
//! A [`Writer`](writer::Writer) appends rows to the current output slice and
//! rolls over to the next one as the [`SliceSizing`](writer::SliceSizing)
//! policy dictates. Every slice holds at least one row.
//!
//! ### Pools
//!
//! The large buffers of readers and writers come from
//! [`Pools`](io::pool::Pools) and go back there when a slice is closed.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result`]. Errors are classified by
//! [`ErrorKind`]: user errors (exit code 1) for bad input and application
//! errors (exit code 2) for everything else.

pub mod columns;
pub mod config;
pub mod error;
pub mod io;
pub mod log;
pub mod manifest;
pub mod progress;
pub mod reader;
pub mod scanner;
pub mod slicer;
pub mod writer;

pub use config::{ByteSize, Mode, SlicerConfig};
pub use error::{Error, ErrorKind, Result};
pub use manifest::Manifest;
pub use slicer::{ManifestState, SliceOutcome, SliceStats, Slicer, Table};
