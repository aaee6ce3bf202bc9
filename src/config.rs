//! Per-run slicing configuration.
//!
//! [`SlicerConfig`] carries every tunable of a slicing run. It deserializes from
//! camelCase JSON, every key is optional and missing keys keep their default.
//! Sizes are [`ByteSize`] values, accepted either as a bare integer (bytes) or
//! as a string with a binary unit.
//!
//! ```
//! use table_slicer::config::{ByteSize, Mode, SlicerConfig};
//! use table_slicer::writer::SliceSizing;
//!
//! let config: SlicerConfig =
//!     serde_json::from_str(r#"{"mode": "rows", "rowsPerSlice": 100, "bufferSize": "4MB"}"#)?;
//! assert_eq!(config.mode, Mode::Rows);
//! assert_eq!(config.buffer_size, ByteSize::mb(4));
//! assert_eq!(config.sizing(), SliceSizing::ByRows(100));
//! # Ok::<(), serde_json::Error>(())
//! ```

use crate::error::{Error, Result};
use crate::writer::SliceSizing;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;
const TB: u64 = 1024 * GB;

/// How the output slices are sized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Mode {
    /// A new slice starts when `bytesPerSlice` would be exceeded.
    #[default]
    Bytes,
    /// A new slice starts when `rowsPerSlice` is reached.
    Rows,
    /// The table is split into `numberOfSlices` slices of at least `minBytesPerSlice`.
    Slices,
}

impl Mode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bytes => "bytes",
            Self::Rows => "rows",
            Self::Slices => "slices",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "bytes" => Ok(Self::Bytes),
            "rows" => Ok(Self::Rows),
            "slices" => Ok(Self::Slices),
            other => Err(format!(
                "unexpected value \"{other}\" for \"mode\", use \"rows\", \"bytes\" or \"slices\""
            )),
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.as_str().to_string()
    }
}

/// A size in bytes.
///
/// Parses `"123"`, `"500MB"`, `"4 MiB"`, `"2kb"`; units are binary, so
/// `1KB == 1024B`. Displays using the largest unit that divides it exactly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawByteSize", into = "String")]
pub struct ByteSize(u64);

impl ByteSize {
    #[must_use]
    pub const fn b(bytes: u64) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn kb(kb: u64) -> Self {
        Self(kb * KB)
    }

    #[must_use]
    pub const fn mb(mb: u64) -> Self {
        Self(mb * MB)
    }

    #[must_use]
    pub const fn gb(gb: u64) -> Self {
        Self(gb * GB)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The size as `usize`, saturating on 32-bit targets.
    #[must_use]
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        for (unit, name) in [(TB, "TB"), (GB, "GB"), (MB, "MB"), (KB, "KB")] {
            if bytes != 0 && bytes % unit == 0 {
                return write!(f, "{}{name}", bytes / unit);
            }
        }
        write!(f, "{bytes}B")
    }
}

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        if number.is_empty() {
            return Err(format!("invalid size \"{s}\", expected a number with an optional unit"));
        }
        let number: u64 = number
            .parse()
            .map_err(|err| format!("invalid size \"{s}\": {err}"))?;
        let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => KB,
            "m" | "mb" | "mib" => MB,
            "g" | "gb" | "gib" => GB,
            "t" | "tb" | "tib" => TB,
            other => return Err(format!("invalid size \"{s}\": unknown unit \"{other}\"")),
        };
        number
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| format!("invalid size \"{s}\": value is too large"))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawByteSize {
    Bytes(u64),
    Text(String),
}

impl TryFrom<RawByteSize> for ByteSize {
    type Error = String;

    fn try_from(raw: RawByteSize) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawByteSize::Bytes(bytes) => Ok(Self(bytes)),
            RawByteSize::Text(text) => text.parse(),
        }
    }
}

impl From<ByteSize> for String {
    fn from(size: ByteSize) -> Self {
        size.to_string()
    }
}

/// Schedule of the progress messages: the first one after `initial`, then
/// with the interval multiplied by `multiplier` up to `maximum`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogIntervalConfig {
    #[serde(with = "duration_secs")]
    pub initial: Duration,
    #[serde(with = "duration_secs")]
    pub maximum: Duration,
    pub multiplier: f64,
}

impl Default for LogIntervalConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            maximum: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Durations as (fractional) seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// All tunables of one slicing run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SlicerConfig {
    pub mode: Mode,
    pub bytes_per_slice: ByteSize,
    pub rows_per_slice: u64,
    pub number_of_slices: u32,
    /// Lower bound of a slice size in [`Mode::Slices`], takes precedence over the count.
    pub min_bytes_per_slice: ByteSize,
    /// Inputs whose largest file is smaller than this are not sliced. 0 disables the check.
    pub input_size_threshold: ByteSize,
    pub gzip: bool,
    pub gzip_level: u32,
    /// Gzip worker threads, 0 means one per available CPU.
    pub gzip_concurrency: usize,
    pub gzip_block_size: ByteSize,
    pub buffer_size: ByteSize,
    /// Maximum number of input slices open at once.
    pub ahead_slices: usize,
    /// Read-ahead blocks per input slice, 0 disables read-ahead.
    pub ahead_blocks: usize,
    pub ahead_block_size: ByteSize,
    pub max_row_size: ByteSize,
    pub log_interval: LogIntervalConfig,
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Bytes,
            bytes_per_slice: ByteSize::mb(500),
            rows_per_slice: 1_000_000,
            number_of_slices: 60,
            min_bytes_per_slice: ByteSize::mb(4),
            input_size_threshold: ByteSize::b(0),
            gzip: true,
            gzip_level: 2,
            gzip_concurrency: 0,
            gzip_block_size: ByteSize::mb(2),
            buffer_size: ByteSize::mb(20),
            ahead_slices: 1,
            ahead_blocks: 16,
            ahead_block_size: ByteSize::mb(1),
            max_row_size: ByteSize::mb(50),
            log_interval: LogIntervalConfig::default(),
        }
    }
}

#[derive(Deserialize)]
struct ProcessorConfig {
    parameters: SlicerConfig,
}

impl SlicerConfig {
    /// Loads the `parameters` object of a JSON config file over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the file cannot be read, is not
    /// valid JSON, or fails [`SlicerConfig::validate`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::InvalidConfig(format!("config file \"{}\" not found", path.display()))
            } else {
                Error::InvalidConfig(format!("cannot read config \"{}\": {err}", path.display()))
            }
        })?;
        let config: ProcessorConfig = serde_json::from_slice(&content)
            .map_err(|err| Error::InvalidConfig(format!("\"{}\": {err}", path.display())))?;
        config.parameters.validate()?;
        Ok(config.parameters)
    }

    /// Checks the value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first invalid key.
    pub fn validate(&self) -> Result<()> {
        fn check(ok: bool, key: &str, rule: &str) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!("\"{key}\" {rule}")))
            }
        }

        check((1..=9).contains(&self.gzip_level), "gzipLevel", "must be between 1 and 9")?;
        check(self.bytes_per_slice.as_u64() >= 1, "bytesPerSlice", "must be at least 1B")?;
        check(self.rows_per_slice >= 1, "rowsPerSlice", "must be at least 1")?;
        check(self.number_of_slices >= 1, "numberOfSlices", "must be at least 1")?;
        check(self.min_bytes_per_slice.as_u64() >= 1, "minBytesPerSlice", "must be at least 1B")?;
        check(self.ahead_slices >= 1, "aheadSlices", "must be at least 1")?;
        check(
            self.ahead_blocks == 0 || self.ahead_block_size.as_u64() >= 1,
            "aheadBlockSize",
            "must be at least 1B when aheadBlocks is set",
        )?;
        check(self.gzip_block_size.as_u64() >= 1, "gzipBlockSize", "must be at least 1B")?;
        check(self.buffer_size.as_u64() >= 1, "bufferSize", "must be at least 1B")?;
        check(self.max_row_size.as_u64() >= 1, "maxRowSize", "must be at least 1B")?;

        let interval = &self.log_interval;
        check(!interval.initial.is_zero(), "logInterval.initial", "must be greater than 0")?;
        check(
            interval.maximum >= interval.initial,
            "logInterval.maximum",
            "must not be less than logInterval.initial",
        )?;
        check(interval.multiplier >= 1.0, "logInterval.multiplier", "must be at least 1")?;
        Ok(())
    }

    /// The slice sizing policy selected by [`SlicerConfig::mode`].
    #[must_use]
    pub fn sizing(&self) -> SliceSizing {
        match self.mode {
            Mode::Bytes => SliceSizing::ByBytes(self.bytes_per_slice.as_u64()),
            Mode::Rows => SliceSizing::ByRows(self.rows_per_slice),
            Mode::Slices => SliceSizing::ByFixedCount {
                count: self.number_of_slices,
                min_bytes: self.min_bytes_per_slice.as_u64(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size_parse() {
        let cases = [
            ("0", 0),
            ("123", 123),
            ("12B", 12),
            ("2kb", 2048),
            ("4 MiB", 4 * MB),
            ("500MB", 500 * MB),
            (" 1GB ", GB),
            ("3T", 3 * TB),
        ];
        for (input, expected) in cases {
            assert_eq!(input.parse::<ByteSize>().unwrap().as_u64(), expected, "{input}");
        }
        for input in ["", "MB", "12XB", "-1", "99999999999999999999TB"] {
            assert!(input.parse::<ByteSize>().is_err(), "{input}");
        }
    }

    #[test]
    fn test_byte_size_display() {
        assert_eq!(ByteSize::mb(500).to_string(), "500MB");
        assert_eq!(ByteSize::b(1536).to_string(), "1536B");
        assert_eq!(ByteSize::b(0).to_string(), "0B");
        assert_eq!(ByteSize::gb(2).to_string(), "2GB");
        assert_eq!(ByteSize::b(84).to_string(), "84B");
    }

    #[test]
    fn test_byte_size_serde() {
        let sizes: Vec<ByteSize> = serde_json::from_str(r#"[1024, "2MB"]"#).unwrap();
        assert_eq!(sizes, vec![ByteSize::kb(1), ByteSize::mb(2)]);
        assert_eq!(serde_json::to_string(&ByteSize::kb(1)).unwrap(), "\"1KB\"");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("slices".parse::<Mode>(), Ok(Mode::Slices));
        let err = serde_json::from_str::<Mode>("\"lines\"").unwrap_err();
        assert!(err.to_string().contains("use \"rows\", \"bytes\" or \"slices\""));
    }

    #[test]
    fn test_validate() {
        assert!(SlicerConfig::default().validate().is_ok());

        let config = SlicerConfig {
            gzip_level: 10,
            ..SlicerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_user_error());
        assert!(err.to_string().contains("gzipLevel"));

        let config = SlicerConfig {
            log_interval: LogIntervalConfig {
                initial: Duration::from_secs(10),
                maximum: Duration::from_secs(5),
                multiplier: 2.0,
            },
            ..SlicerConfig::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("logInterval.maximum"));
    }

    #[test]
    fn test_sizing() {
        let config = SlicerConfig {
            mode: Mode::Slices,
            number_of_slices: 3,
            min_bytes_per_slice: ByteSize::b(1),
            ..SlicerConfig::default()
        };
        assert_eq!(
            config.sizing(),
            SliceSizing::ByFixedCount {
                count: 3,
                min_bytes: 1
            }
        );
        assert_eq!(
            SlicerConfig::default().sizing(),
            SliceSizing::ByBytes(500 * MB)
        );
    }
}
