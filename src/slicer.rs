//! Slicing of one table: input file or sliced directory in, sliced directory out.

use crate::config::{ByteSize, SlicerConfig};
use crate::error::{Error, Result, keep_first};
use crate::io::fs::{copy_recursive, dir_size, mkdir};
use crate::io::pool::Pools;
use crate::io::slices::{InputSlice, find_slices, max_size, total_size};
use crate::log::{Logger, TracingLogger};
use crate::manifest::Manifest;
use crate::progress::{Clock, ProgressLogger, SystemClock};
use crate::reader::Reader;
use crate::writer::Writer;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Definition of the table to slice.
#[derive(Clone, Debug, Default)]
pub struct Table {
    pub name: String,
    /// A CSV file, or a directory of slices without a header.
    pub in_path: PathBuf,
    pub in_manifest_path: Option<PathBuf>,
    /// Fail when `in_manifest_path` is set but the file does not exist.
    pub in_manifest_must_exist: bool,
    pub out_path: PathBuf,
    pub out_manifest_path: PathBuf,
    /// Exit code for an input under the size threshold, 0 copies the table instead.
    pub input_size_low_exit_code: u8,
    pub config: SlicerConfig,
}

impl Table {
    /// Checks that the required fields are set and the configuration is valid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTable`] naming the missing field, or the
    /// [`Error::InvalidConfig`] of the configuration.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("name", self.name.is_empty()),
            ("inPath", self.in_path.as_os_str().is_empty()),
            ("outPath", self.out_path.as_os_str().is_empty()),
            ("outManifestPath", self.out_manifest_path.as_os_str().is_empty()),
        ];
        if let Some((field, _)) = required.iter().find(|(_, missing)| *missing) {
            return Err(Error::InvalidTable(format!("\"{field}\" is a required field")));
        }
        self.config.validate()
    }
}

/// What happened to the input manifest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestState {
    /// There was no input manifest.
    Created,
    /// The columns were added from the CSV header.
    Updated,
    Unaffected,
}

impl ManifestState {
    fn of(manifest: &Manifest) -> Self {
        if !manifest.exists() {
            Self::Created
        } else if manifest.modified() {
            Self::Updated
        } else {
            Self::Unaffected
        }
    }
}

impl fmt::Display for ManifestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unaffected => "unaffected",
        })
    }
}

/// Statistics of a sliced table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceStats {
    pub input_slices: usize,
    pub output_slices: u32,
    pub input_bytes: u64,
    /// On-disk size with gzip, otherwise the uncompressed size.
    pub output_bytes: u64,
    /// Data rows, without the header.
    pub rows: u64,
    pub manifest: ManifestState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SliceOutcome {
    Sliced(SliceStats),
    /// The input was under the size threshold. Without an exit code it was
    /// copied to the output unchanged.
    Skipped { exit_code: Option<u8> },
}

/// Slices tables, reporting to the operator through a [`Logger`].
///
/// ```no_run
/// use std::sync::Arc;
/// use table_slicer::log::TracingLogger;
/// use table_slicer::slicer::{SliceOutcome, Slicer, Table};
/// # fn main() -> table_slicer::Result<()> {
///
/// let table = Table {
///     name: "orders".into(),
///     in_path: "in/tables/orders.csv".into(),
///     out_path: "out/tables/orders.csv".into(),
///     out_manifest_path: "out/tables/orders.csv.manifest".into(),
///     ..Table::default()
/// };
/// if let SliceOutcome::Sliced(stats) = Slicer::new(Arc::new(TracingLogger)).slice_table(&table)? {
///     println!("{} rows", stats.rows);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Slicer {
    logger: Arc<dyn Logger>,
    clock: Arc<dyn Clock>,
}

impl Default for Slicer {
    fn default() -> Self {
        Self::new(Arc::new(TracingLogger))
    }
}

impl Slicer {
    #[must_use]
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            logger,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock driving the progress messages.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Slices `table` into its output directory and writes the output manifest.
    ///
    /// # Errors
    ///
    /// Any failure is terminal for the table, see [`Error`]. Output written
    /// before the failure is left in place.
    pub fn slice_table(&self, table: &Table) -> Result<SliceOutcome> {
        table.validate()?;

        let metadata = std::fs::metadata(&table.in_path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                Error::InputNotFound(table.in_path.clone())
            } else {
                Error::io(
                    format!("cannot read input table \"{}\"", table.in_path.display()),
                    err,
                )
            }
        })?;
        let sliced = metadata.is_dir();

        let manifest_path = table.in_manifest_path.as_deref();
        let mut manifest = Manifest::load(manifest_path)?;
        let manifest_display = manifest_path.map(Path::to_path_buf).unwrap_or_default();
        if table.in_manifest_must_exist && manifest_path.is_some() && !manifest.exists() {
            return Err(Error::ManifestNotFound(manifest_display));
        }
        if sliced && !manifest.exists() {
            return Err(Error::ManifestRequired(manifest_display));
        }
        if sliced && !manifest.has_columns() {
            return Err(Error::MissingManifestColumns(manifest_display));
        }

        let slices = if sliced {
            find_slices(&table.in_path)?
        } else {
            vec![InputSlice {
                path: table.in_path.clone(),
                size: metadata.len(),
            }]
        };
        let input_bytes = total_size(&slices);
        let largest = max_size(&slices);

        if largest < table.config.input_size_threshold.as_u64() {
            return self.skip(table, sliced, largest);
        }

        mkdir(&table.out_path)?;
        tracing::debug!(
            table = %table.name,
            sliced,
            slices = slices.len(),
            bytes = input_bytes,
            "slicing table"
        );

        let message = format!("Slicing table \"{}\"", table.name);
        self.logger.info(&format!("{message}."));
        let progress = ProgressLogger::new(
            Arc::clone(&self.clock),
            Arc::clone(&self.logger),
            &table.config.log_interval,
            input_bytes,
            message,
        );

        let result = slice_rows(table, sliced, slices, input_bytes, &mut manifest, &progress);
        progress.stop();
        let (input_slices, writer) = result?;

        let output_bytes = if writer.gzip_enabled() {
            dir_size(&table.out_path)?
        } else {
            writer.all_bytes()
        };
        manifest.write_to(&table.out_manifest_path)?;

        let stats = SliceStats {
            input_slices,
            output_slices: writer.slices(),
            input_bytes,
            output_bytes,
            rows: writer.all_rows(),
            manifest: ManifestState::of(&manifest),
        };
        self.logger.info(&format!(
            "Table \"{}\" sliced: in/out: {} / {} slices, {} / {} bytes, {} rows, manifest {}.",
            table.name,
            stats.input_slices,
            stats.output_slices,
            ByteSize::b(stats.input_bytes),
            ByteSize::b(stats.output_bytes),
            group_thousands(stats.rows),
            stats.manifest,
        ));
        Ok(SliceOutcome::Sliced(stats))
    }

    fn skip(&self, table: &Table, sliced: bool, largest: u64) -> Result<SliceOutcome> {
        let threshold = table.config.input_size_threshold;
        let size = ByteSize::b(largest);
        if sliced {
            self.logger.info(&format!(
                "Skipping table \"{}\": maximum size of slice \"{size}\" is smaller than the threshold \"{threshold}\".",
                table.name
            ));
        } else {
            self.logger.info(&format!(
                "Skipping table \"{}\": table size \"{size}\" is smaller than the threshold \"{threshold}\".",
                table.name
            ));
        }

        if table.input_size_low_exit_code != 0 {
            return Ok(SliceOutcome::Skipped {
                exit_code: Some(table.input_size_low_exit_code),
            });
        }

        copy_recursive(&table.in_path, &table.out_path)?;
        if let Some(manifest) = &table.in_manifest_path {
            if manifest.is_file() {
                copy_recursive(manifest, &table.out_manifest_path)?;
            }
        }
        self.logger.info(&format!(
            "Table \"{}\" has been copied to the output without modification.",
            table.name
        ));
        Ok(SliceOutcome::Skipped { exit_code: None })
    }
}

/// Copies all rows, returns the number of input slices and the closed writer.
fn slice_rows(
    table: &Table,
    sliced: bool,
    slices: Vec<InputSlice>,
    input_bytes: u64,
    manifest: &mut Manifest,
    progress: &ProgressLogger,
) -> Result<(usize, Writer)> {
    let config = &table.config;
    let pools = Pools::new(config)?;
    let mut reader = if sliced {
        Reader::for_slices(&table.in_path, slices, manifest.parser(), config, &pools, progress)?
    } else {
        let input = slices
            .into_iter()
            .next()
            .ok_or_else(|| Error::InputNotFound(table.in_path.clone()))?;
        Reader::for_file(input, manifest.parser(), config, &pools, progress)?
    };
    let mut writer = Writer::new(config, pools, input_bytes, table.out_path.clone())?;

    let copied = copy_rows(&mut reader, &mut writer, manifest);
    let input_slices = reader.slices();
    let read = reader.close();
    let written = writer.close();
    keep_first(keep_first(copied, read), written)?;
    Ok((input_slices, writer))
}

fn copy_rows(reader: &mut Reader, writer: &mut Writer, manifest: &mut Manifest) -> Result<()> {
    if !manifest.has_columns() {
        let columns = reader.header()?;
        manifest.set_columns(columns);
    }
    while let Some(row) = reader.next_row()? {
        writer.write(row)?;
    }
    Ok(())
}

/// `1234567` as `1,234,567`.
fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(digit);
    }
    out
}
