mod common;

use anyhow::Result;
use common::{list_slices, read_slice, seven_rows, small_config, write_gzip};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use table_slicer::config::{ByteSize, Mode, SlicerConfig};
use table_slicer::log::MemoryLogger;
use table_slicer::progress::MockClock;
use table_slicer::{Error, ManifestState, SliceOutcome, SliceStats, Slicer, Table};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    logger: MemoryLogger,
}

impl Fixture {
    fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        fs::create_dir(dir.path().join("in"))?;
        fs::create_dir(dir.path().join("out"))?;
        Ok(Self {
            dir,
            logger: MemoryLogger::default(),
        })
    }

    fn path(&self, relative: &str) -> std::path::PathBuf {
        self.dir.path().join(relative)
    }

    fn table(&self, config: SlicerConfig) -> Table {
        Table {
            name: "t".into(),
            in_path: self.path("in/t.csv"),
            in_manifest_path: Some(self.path("in/t.csv.manifest")),
            in_manifest_must_exist: false,
            out_path: self.path("out/t.csv"),
            out_manifest_path: self.path("out/t.csv.manifest"),
            input_size_low_exit_code: 0,
            config,
        }
    }

    fn slice(&self, table: &Table) -> table_slicer::Result<SliceOutcome> {
        Slicer::new(Arc::new(self.logger.clone()))
            .with_clock(Arc::new(MockClock::new()))
            .slice_table(table)
    }

    fn sliced(&self, table: &Table) -> Result<SliceStats> {
        match self.slice(table)? {
            SliceOutcome::Sliced(stats) => Ok(stats),
            other => anyhow::bail!("unexpected outcome {other:?}"),
        }
    }
}

fn fixed_count(count: u32) -> SlicerConfig {
    SlicerConfig {
        mode: Mode::Slices,
        number_of_slices: count,
        min_bytes_per_slice: ByteSize::b(1),
        ..small_config()
    }
}

fn output_rows(dir: &Path) -> Result<Vec<u8>> {
    let mut all = Vec::new();
    for path in list_slices(dir)? {
        all.extend(read_slice(&path)?);
    }
    Ok(all)
}

// ============================================================================
// Single file
// ============================================================================

#[test]
fn test_slice_file_with_manifest_columns() -> Result<()> {
    let fx = Fixture::new()?;
    fs::write(fx.path("in/t.csv"), seven_rows().concat())?;
    fs::write(fx.path("in/t.csv.manifest"), r#"{"columns": ["a", "b"]}"#)?;

    let stats = fx.sliced(&fx.table(fixed_count(3)))?;
    assert_eq!(
        stats,
        SliceStats {
            input_slices: 1,
            output_slices: 3,
            input_bytes: 84,
            output_bytes: 84,
            rows: 7,
            manifest: ManifestState::Unaffected,
        }
    );
    assert_eq!(output_rows(&fx.path("out/t.csv"))?, seven_rows().concat().into_bytes());
    assert_eq!(
        fx.logger.lines(),
        vec![
            "INFO  Slicing table \"t\".".to_string(),
            "INFO  Table \"t\" sliced: in/out: 1 / 3 slices, 84B / 84B bytes, 7 rows, manifest unaffected."
                .to_string(),
        ]
    );
    Ok(())
}

#[test]
fn test_header_creates_manifest() -> Result<()> {
    let fx = Fixture::new()?;
    fs::write(fx.path("in/t.csv"), format!("\"id\",\"name\"\n{}", seven_rows().concat()))?;

    let stats = fx.sliced(&fx.table(fixed_count(3)))?;
    assert_eq!(stats.manifest, ManifestState::Created);
    assert_eq!(stats.rows, 7);
    assert_eq!(output_rows(&fx.path("out/t.csv"))?, seven_rows().concat().into_bytes());
    assert_eq!(
        fs::read_to_string(fx.path("out/t.csv.manifest"))?,
        "{\n    \"columns\": [\n        \"id\",\n        \"name\"\n    ]\n}"
    );
    assert!(fx.logger.lines()[1].ends_with(", manifest created."));
    Ok(())
}

#[test]
fn test_header_updates_manifest() -> Result<()> {
    let fx = Fixture::new()?;
    fs::write(fx.path("in/t.csv"), "id;name\n1;a\n")?;
    fs::write(
        fx.path("in/t.csv.manifest"),
        r#"{"incremental": true, "delimiter": ";"}"#,
    )?;

    let stats = fx.sliced(&fx.table(small_config()))?;
    assert_eq!(stats.manifest, ManifestState::Updated);
    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(fx.path("out/t.csv.manifest"))?)?;
    assert_eq!(
        manifest,
        serde_json::json!({"incremental": true, "delimiter": ";", "columns": ["id", "name"]})
    );
    Ok(())
}

#[test]
fn test_gzip_output_size_is_on_disk_size() -> Result<()> {
    let fx = Fixture::new()?;
    let data = "1,\"abc\"\n".repeat(10_000);
    fs::write(fx.path("in/t.csv"), &data)?;
    fs::write(fx.path("in/t.csv.manifest"), r#"{"columns": ["id", "value"]}"#)?;

    let config = SlicerConfig {
        gzip: true,
        bytes_per_slice: ByteSize::kb(16),
        ..small_config()
    };
    let stats = fx.sliced(&fx.table(config))?;
    assert_eq!(stats.rows, 10_000);
    assert_eq!(stats.output_slices, 5);
    assert!(stats.output_bytes < stats.input_bytes);
    assert_eq!(output_rows(&fx.path("out/t.csv"))?, data.into_bytes());
    Ok(())
}

#[test]
fn test_malformed_header() -> Result<()> {
    let fx = Fixture::new()?;
    fs::write(fx.path("in/t.csv"), "aaa\"\n")?;

    let err = fx.slice(&fx.table(small_config())).unwrap_err();
    match &err {
        Error::HeaderParse(table_slicer::columns::ParseError::UnexpectedTokenBeforeEnclosure {
            token,
            position,
        }) => {
            assert_eq!(token, "aaa");
            assert_eq!(*position, 4);
        }
        other => anyhow::bail!("unexpected error {other}"),
    }
    assert_eq!(err.exit_code(), 2);
    Ok(())
}

// ============================================================================
// Sliced input
// ============================================================================

#[test]
fn test_slice_sliced_table() -> Result<()> {
    let fx = Fixture::new()?;
    let in_dir = fx.path("in/t.csv");
    fs::create_dir(&in_dir)?;
    let rows = seven_rows();
    write_gzip(&in_dir.join("part1.gz"), rows[..3].concat().as_bytes())?;
    write_gzip(&in_dir.join("part2.gz"), rows[3..5].concat().as_bytes())?;
    fs::write(in_dir.join("part3"), rows[5..].concat())?;
    fs::write(fx.path("in/t.csv.manifest"), r#"{"columns": ["a", "b"]}"#)?;

    let config = SlicerConfig {
        mode: Mode::Rows,
        rows_per_slice: 2,
        ahead_slices: 2,
        ..small_config()
    };
    let stats = fx.sliced(&fx.table(config))?;
    assert_eq!(stats.input_slices, 3);
    assert_eq!(stats.output_slices, 4);
    assert_eq!(stats.rows, 7);
    assert_eq!(stats.manifest, ManifestState::Unaffected);
    assert_eq!(output_rows(&fx.path("out/t.csv"))?, rows.concat().into_bytes());
    Ok(())
}

#[test]
fn test_sliced_table_requires_manifest() -> Result<()> {
    let fx = Fixture::new()?;
    fs::create_dir(fx.path("in/t.csv"))?;
    fs::write(fx.path("in/t.csv/part1"), "1\n")?;

    let err = fx.slice(&fx.table(small_config())).unwrap_err();
    assert!(matches!(err, Error::ManifestRequired(_)));
    assert!(err.is_user_error());

    fs::write(fx.path("in/t.csv.manifest"), r#"{"columns": []}"#)?;
    let err = fx.slice(&fx.table(small_config())).unwrap_err();
    assert!(matches!(err, Error::MissingManifestColumns(_)));
    assert_eq!(err.exit_code(), 1);
    Ok(())
}

#[test]
fn test_sliced_table_with_directory() -> Result<()> {
    let fx = Fixture::new()?;
    fs::create_dir_all(fx.path("in/t.csv/nested"))?;
    fs::write(fx.path("in/t.csv.manifest"), r#"{"columns": ["a"]}"#)?;

    let err = fx.slice(&fx.table(small_config())).unwrap_err();
    assert!(matches!(err, Error::UnexpectedDirectory(_)));
    Ok(())
}

// ============================================================================
// Table definition
// ============================================================================

#[test]
fn test_input_not_found() -> Result<()> {
    let fx = Fixture::new()?;
    let err = fx.slice(&fx.table(small_config())).unwrap_err();
    assert!(matches!(err, Error::InputNotFound(_)));
    assert!(err.is_user_error());
    Ok(())
}

#[test]
fn test_manifest_must_exist() -> Result<()> {
    let fx = Fixture::new()?;
    fs::write(fx.path("in/t.csv"), "a\n1\n")?;

    let mut table = fx.table(small_config());
    table.in_manifest_must_exist = true;
    let err = fx.slice(&table).unwrap_err();
    assert!(matches!(err, Error::ManifestNotFound(_)));

    table.in_manifest_path = None;
    assert!(matches!(fx.slice(&table)?, SliceOutcome::Sliced(_)));
    Ok(())
}

#[test]
fn test_invalid_config() -> Result<()> {
    let fx = Fixture::new()?;
    fs::write(fx.path("in/t.csv"), "a\n1\n")?;

    let config = SlicerConfig {
        gzip_level: 0,
        ..small_config()
    };
    let err = fx.slice(&fx.table(config)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid configuration: \"gzipLevel\" must be between 1 and 9"
    );
    Ok(())
}

// ============================================================================
// Input size threshold
// ============================================================================

#[test]
fn test_small_table_is_copied() -> Result<()> {
    let fx = Fixture::new()?;
    fs::write(fx.path("in/t.csv"), "a\n1\n")?;
    fs::write(fx.path("in/t.csv.manifest"), r#"{"columns": ["a"]}"#)?;

    let config = SlicerConfig {
        input_size_threshold: ByteSize::kb(1),
        ..small_config()
    };
    let outcome = fx.slice(&fx.table(config))?;
    assert_eq!(outcome, SliceOutcome::Skipped { exit_code: None });
    assert_eq!(fs::read_to_string(fx.path("out/t.csv"))?, "a\n1\n");
    assert_eq!(
        fs::read_to_string(fx.path("out/t.csv.manifest"))?,
        r#"{"columns": ["a"]}"#
    );
    assert_eq!(
        fx.logger.lines(),
        vec![
            "INFO  Skipping table \"t\": table size \"4B\" is smaller than the threshold \"1KB\"."
                .to_string(),
            "INFO  Table \"t\" has been copied to the output without modification.".to_string(),
        ]
    );
    Ok(())
}

#[test]
fn test_small_table_exit_code() -> Result<()> {
    let fx = Fixture::new()?;
    fs::write(fx.path("in/t.csv"), "a\n1\n")?;

    let mut table = fx.table(SlicerConfig {
        input_size_threshold: ByteSize::kb(1),
        ..small_config()
    });
    table.input_size_low_exit_code = 3;
    let outcome = fx.slice(&table)?;
    assert_eq!(outcome, SliceOutcome::Skipped { exit_code: Some(3) });
    assert!(!fx.path("out/t.csv").exists());
    Ok(())
}

#[test]
fn test_threshold_uses_largest_slice() -> Result<()> {
    let fx = Fixture::new()?;
    fs::create_dir(fx.path("in/t.csv"))?;
    fs::write(fx.path("in/t.csv/part1"), "1\n".repeat(100))?;
    fs::write(fx.path("in/t.csv/part2"), "2\n")?;
    fs::write(fx.path("in/t.csv.manifest"), r#"{"columns": ["a"]}"#)?;

    let config = SlicerConfig {
        input_size_threshold: ByteSize::b(100),
        ..small_config()
    };
    let stats = fx.sliced(&fx.table(config))?;
    assert_eq!(stats.rows, 101);
    assert_eq!(stats.input_bytes, 202);
    Ok(())
}
