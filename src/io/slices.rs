//! Input slices of a sliced table.
//!
//! A sliced table is a directory whose files are the slices of one table, in
//! lexicographic order of their names. Nested directories are not allowed.
//!
//! ```no_run
//! use table_slicer::io::slices::{find_slices, total_size};
//!
//! let slices = find_slices("in/tables/orders.csv")?;
//! println!("{} slices, {} bytes", slices.len(), total_size(&slices));
//! # Ok::<(), table_slicer::Error>(())
//! ```

use crate::error::{Error, Result};
use crate::io::compression::is_gzip_path;
use glob::{MatchOptions, Pattern, glob_with};
use std::path::{Path, PathBuf};

/// One input file of a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSlice {
    pub path: PathBuf,
    pub size: u64,
}

impl InputSlice {
    /// Describes the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InputNotFound`] if the file does not exist.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::InputNotFound(path.clone())
            } else {
                Error::io(format!("cannot stat \"{}\"", path.display()), err)
            }
        })?;
        Ok(Self {
            size: metadata.len(),
            path,
        })
    }

    /// True for gzip compressed slices, decided by the file extension.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        is_gzip_path(&self.path)
    }

    /// File name for log and error messages.
    #[must_use]
    pub fn name(&self) -> String {
        self.path.file_name().map_or_else(
            || self.path.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        )
    }
}

/// Lists the slices of the sliced table directory `dir`, sorted by path.
///
/// # Errors
///
/// Returns [`Error::UnexpectedDirectory`] for a nested directory and
/// [`Error::Io`] if the directory cannot be listed.
pub fn find_slices(dir: impl AsRef<Path>) -> Result<Vec<InputSlice>> {
    let dir = dir.as_ref();
    let pattern = format!("{}/*", Pattern::escape(&dir.to_string_lossy()));
    let options = MatchOptions {
        require_literal_leading_dot: false,
        ..MatchOptions::new()
    };
    let entries = glob_with(&pattern, options).map_err(|err| {
        Error::InvalidTable(format!(
            "invalid sliced table path \"{}\": {err}",
            dir.display()
        ))
    })?;

    let mut slices = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| {
            Error::io(
                format!("cannot list sliced table \"{}\"", dir.display()),
                err.into_error(),
            )
        })?;
        if path.is_dir() {
            return Err(Error::UnexpectedDirectory(path));
        }
        slices.push(InputSlice::from_path(path)?);
    }

    slices.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(slices)
}

/// Sum of the slice sizes.
#[must_use]
pub fn total_size(slices: &[InputSlice]) -> u64 {
    slices.iter().map(|slice| slice.size).sum()
}

/// Size of the largest slice, 0 for no slices.
#[must_use]
pub fn max_size(slices: &[InputSlice]) -> u64 {
    slices.iter().map(|slice| slice.size).max().unwrap_or(0)
}
