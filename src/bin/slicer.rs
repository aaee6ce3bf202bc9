//! Command-line slicer of a single table.
//!
//! Every flag can also be set through a `SLICER_*` environment variable.
//! Settings are applied in order: defaults, the `--config` file, flags.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use table_slicer::log::TracingLogger;
use table_slicer::{ByteSize, Mode, SliceOutcome, Slicer, SlicerConfig, Table};

/// Splits a CSV table into slices.
#[derive(Parser, Debug)]
#[command(name = "slicer", version, about, long_about = None)]
struct Cli {
    /// Name of the table, used in log messages
    #[arg(long, env = "SLICER_TABLE_NAME")]
    table_name: Option<String>,

    /// CSV file, or directory of slices
    #[arg(long, env = "SLICER_TABLE_INPUT_PATH")]
    table_input_path: Option<PathBuf>,

    /// Input manifest, must exist when set
    #[arg(long, env = "SLICER_TABLE_INPUT_MANIFEST_PATH")]
    table_input_manifest_path: Option<PathBuf>,

    /// Output directory for the slices
    #[arg(long, env = "SLICER_TABLE_OUTPUT_PATH")]
    table_output_path: Option<PathBuf>,

    #[arg(long, env = "SLICER_TABLE_OUTPUT_MANIFEST_PATH")]
    table_output_manifest_path: Option<PathBuf>,

    /// Exit with this code, without copying, when the input is under the threshold
    #[arg(long, env = "SLICER_INPUT_SIZE_LOW_EXIT_CODE", default_value_t = 0)]
    input_size_low_exit_code: u8,

    /// JSON file with a "parameters" object
    #[arg(long, env = "SLICER_CONFIG")]
    config: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,

    /// Sizing mode: bytes, rows or slices
    #[arg(long, env = "SLICER_MODE")]
    mode: Option<Mode>,

    #[arg(long, env = "SLICER_BYTES_PER_SLICE")]
    bytes_per_slice: Option<ByteSize>,

    #[arg(long, env = "SLICER_ROWS_PER_SLICE")]
    rows_per_slice: Option<u64>,

    #[arg(long, env = "SLICER_NUMBER_OF_SLICES")]
    number_of_slices: Option<u32>,

    #[arg(long, env = "SLICER_MIN_BYTES_PER_SLICE")]
    min_bytes_per_slice: Option<ByteSize>,

    /// Inputs smaller than this are not sliced, 0 disables the check
    #[arg(long, env = "SLICER_INPUT_SIZE_THRESHOLD")]
    input_size_threshold: Option<ByteSize>,

    #[arg(long, env = "SLICER_GZIP")]
    gzip: Option<bool>,

    #[arg(long, env = "SLICER_GZIP_LEVEL")]
    gzip_level: Option<u32>,

    /// Compression threads, 0 for one per CPU
    #[arg(long, env = "SLICER_GZIP_CONCURRENCY")]
    gzip_concurrency: Option<usize>,

    #[arg(long, env = "SLICER_GZIP_BLOCK_SIZE")]
    gzip_block_size: Option<ByteSize>,

    #[arg(long, env = "SLICER_BUFFER_SIZE")]
    buffer_size: Option<ByteSize>,

    /// Input slices opened ahead of the one being read
    #[arg(long, env = "SLICER_AHEAD_SLICES")]
    ahead_slices: Option<usize>,

    #[arg(long, env = "SLICER_AHEAD_BLOCKS")]
    ahead_blocks: Option<usize>,

    #[arg(long, env = "SLICER_AHEAD_BLOCK_SIZE")]
    ahead_block_size: Option<ByteSize>,

    #[arg(long, env = "SLICER_MAX_ROW_SIZE")]
    max_row_size: Option<ByteSize>,

    /// Seconds until the first progress message
    #[arg(long, env = "SLICER_LOG_INTERVAL_INITIAL")]
    log_interval_initial: Option<f64>,

    /// Maximum seconds between progress messages
    #[arg(long, env = "SLICER_LOG_INTERVAL_MAXIMUM")]
    log_interval_maximum: Option<f64>,

    #[arg(long, env = "SLICER_LOG_INTERVAL_MULTIPLIER")]
    log_interval_multiplier: Option<f64>,
}

impl Cli {
    fn slicer_config(&self) -> table_slicer::Result<SlicerConfig> {
        let mut config = match &self.config {
            Some(path) => SlicerConfig::from_json_file(path)?,
            None => SlicerConfig::default(),
        };

        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }
        set(&mut config.mode, &self.mode);
        set(&mut config.bytes_per_slice, &self.bytes_per_slice);
        set(&mut config.rows_per_slice, &self.rows_per_slice);
        set(&mut config.number_of_slices, &self.number_of_slices);
        set(&mut config.min_bytes_per_slice, &self.min_bytes_per_slice);
        set(&mut config.input_size_threshold, &self.input_size_threshold);
        set(&mut config.gzip, &self.gzip);
        set(&mut config.gzip_level, &self.gzip_level);
        set(&mut config.gzip_concurrency, &self.gzip_concurrency);
        set(&mut config.gzip_block_size, &self.gzip_block_size);
        set(&mut config.buffer_size, &self.buffer_size);
        set(&mut config.ahead_slices, &self.ahead_slices);
        set(&mut config.ahead_blocks, &self.ahead_blocks);
        set(&mut config.ahead_block_size, &self.ahead_block_size);
        set(&mut config.max_row_size, &self.max_row_size);
        set(&mut config.log_interval.multiplier, &self.log_interval_multiplier);

        let seconds = |value: f64, flag: &str| {
            Duration::try_from_secs_f64(value).map_err(|err| {
                table_slicer::Error::InvalidConfig(format!("\"{flag}\": {err}"))
            })
        };
        if let Some(value) = self.log_interval_initial {
            config.log_interval.initial = seconds(value, "log-interval-initial")?;
        }
        if let Some(value) = self.log_interval_maximum {
            config.log_interval.maximum = seconds(value, "log-interval-maximum")?;
        }

        config.validate()?;
        Ok(config)
    }

    fn table(&self, config: SlicerConfig) -> Table {
        Table {
            name: self.table_name.clone().unwrap_or_default(),
            in_path: self.table_input_path.clone().unwrap_or_default(),
            in_manifest_path: self.table_input_manifest_path.clone(),
            in_manifest_must_exist: true,
            out_path: self.table_output_path.clone().unwrap_or_default(),
            out_manifest_path: self.table_output_manifest_path.clone().unwrap_or_default(),
            input_size_low_exit_code: self.input_size_low_exit_code,
            config,
        }
    }
}

fn run(cli: &Cli) -> table_slicer::Result<ExitCode> {
    let config = cli.slicer_config()?;
    if cli.dump_config {
        let json = serde_json::to_string_pretty(&config).map_err(|err| {
            table_slicer::Error::InvalidConfig(format!("cannot encode config: {err}"))
        })?;
        println!("{json}");
        return Ok(ExitCode::SUCCESS);
    }

    let table = cli.table(config);
    match Slicer::new(Arc::new(TracingLogger)).slice_table(&table)? {
        SliceOutcome::Sliced(_) | SliceOutcome::Skipped { exit_code: None } => Ok(ExitCode::SUCCESS),
        SliceOutcome::Skipped {
            exit_code: Some(code),
        } => Ok(ExitCode::from(code)),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => code,
        Err(err) if err.is_user_error() => {
            tracing::error!("{err}");
            ExitCode::from(1)
        }
        Err(err) => {
            let code = err.exit_code();
            let err = anyhow::Error::new(err).context("slicing failed");
            tracing::error!("{err:?}");
            ExitCode::from(u8::try_from(code).unwrap_or(2))
        }
    }
}
