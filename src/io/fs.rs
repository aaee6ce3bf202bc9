//! Filesystem helpers with path-carrying errors.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Creates the directory `path`; an existing directory is fine.
///
/// # Errors
///
/// Returns [`Error::Io`] if the directory cannot be created.
pub fn mkdir(path: &Path) -> Result<()> {
    match fs::create_dir(path) {
        Err(err) if err.kind() != std::io::ErrorKind::AlreadyExists => Err(Error::io(
            format!("cannot create dir \"{}\"", path.display()),
            err,
        )),
        _ => Ok(()),
    }
}

/// Copies a file, or a directory with all its content, to `target`.
///
/// # Errors
///
/// Returns [`Error::Io`] naming the entry that failed.
pub fn copy_recursive(source: &Path, target: &Path) -> Result<()> {
    let context = || format!("cannot copy \"{}\" -> \"{}\"", source.display(), target.display());
    let metadata = fs::metadata(source).map_err(|err| Error::io(context(), err))?;
    if !metadata.is_dir() {
        fs::copy(source, target).map_err(|err| Error::io(context(), err))?;
        return Ok(());
    }

    mkdir(target)?;
    let entries = fs::read_dir(source).map_err(|err| Error::io(context(), err))?;
    for entry in entries {
        let entry = entry.map_err(|err| Error::io(context(), err))?;
        copy_recursive(&entry.path(), &target.join(entry.file_name()))?;
    }
    Ok(())
}

/// Total size of the files under `path`, or the size of `path` itself if it is a file.
///
/// # Errors
///
/// Returns [`Error::Io`] if an entry cannot be inspected.
pub fn dir_size(path: &Path) -> Result<u64> {
    let context = || format!("cannot get size of \"{}\"", path.display());
    let metadata = fs::metadata(path).map_err(|err| Error::io(context(), err))?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }

    let mut size = 0;
    for entry in fs::read_dir(path).map_err(|err| Error::io(context(), err))? {
        let entry = entry.map_err(|err| Error::io(context(), err))?;
        size += dir_size(&entry.path())?;
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_and_size() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let source = dir.path().join("table.csv");
        fs::create_dir(&source)?;
        fs::write(source.join("part1"), b"abc\n")?;
        fs::create_dir(source.join("nested"))?;
        fs::write(source.join("nested/part2"), b"de\n")?;

        let target = dir.path().join("copy");
        copy_recursive(&source, &target)?;
        assert_eq!(fs::read(target.join("nested/part2"))?, b"de\n");
        assert_eq!(dir_size(&target)?, 7);

        // Second mkdir of an existing dir is fine.
        mkdir(&target)?;
        Ok(())
    }
}
