//! Table manifest.
//!
//! A manifest is a JSON object stored next to the table. The slicer reads its
//! `delimiter`, `enclosure` and `columns` keys and may add `columns` found in
//! the CSV header. Every other key, and the order of all keys, is written back
//! untouched.

use crate::columns::ColumnParser;
use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_DELIMITER: u8 = b',';
pub const DEFAULT_ENCLOSURE: u8 = b'"';

const DELIMITER_KEY: &str = "delimiter";
const ENCLOSURE_KEY: &str = "enclosure";
const COLUMNS_KEY: &str = "columns";

/// A parsed table manifest.
#[derive(Clone, Debug)]
pub struct Manifest {
    path: Option<PathBuf>,
    exists: bool,
    modified: bool,
    content: Map<String, Value>,
    columns: Vec<String>,
    delimiter: u8,
    enclosure: u8,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            path: None,
            exists: false,
            modified: false,
            content: Map::new(),
            columns: Vec::new(),
            delimiter: DEFAULT_DELIMITER,
            enclosure: DEFAULT_ENCLOSURE,
        }
    }
}

impl Manifest {
    /// Loads the manifest at `path`. Without a path, or when the file does not
    /// exist, an empty manifest is returned, it is created on write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidManifest`] for malformed JSON or keys, and
    /// [`Error::Io`] if the file cannot be read.
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use table_slicer::manifest::Manifest;
    /// # fn main() -> table_slicer::Result<()> {
    ///
    /// let mut manifest = Manifest::load(Some(Path::new("in/tables/orders.csv.manifest")))?;
    /// if !manifest.has_columns() {
    ///     manifest.set_columns(vec!["id".into(), "name".into()]);
    /// }
    /// manifest.write_to(Path::new("out/tables/orders.csv.manifest"))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Self {
                    path: Some(path.to_path_buf()),
                    ..Self::default()
                });
            }
            Err(err) => {
                return Err(Error::io(
                    format!("cannot read manifest \"{}\"", path.display()),
                    err,
                ));
            }
        };

        let invalid = |message: String| Error::InvalidManifest {
            path: path.to_path_buf(),
            message,
        };

        let content: Map<String, Value> = serde_json::from_slice(&data)
            .map_err(|err| invalid(format!("cannot decode JSON: {err}")))?;

        let delimiter = single_byte(&content, DELIMITER_KEY, DEFAULT_DELIMITER).map_err(&invalid)?;
        let enclosure = single_byte(&content, ENCLOSURE_KEY, DEFAULT_ENCLOSURE).map_err(&invalid)?;
        let columns = match content.get(COLUMNS_KEY) {
            None => Vec::new(),
            Some(Value::Array(values)) => values.iter().map(column_name).collect(),
            Some(other) => {
                return Err(invalid(format!(
                    "unexpected type \"{}\" of the manifest \"{COLUMNS_KEY}\" key",
                    type_name(other)
                )));
            }
        };

        let mut manifest = Self {
            path: Some(path.to_path_buf()),
            exists: true,
            modified: false,
            content,
            columns,
            delimiter,
            enclosure,
        };
        // Normalized to strings, so it is written back that way too.
        if manifest.content.contains_key(COLUMNS_KEY) {
            let columns = manifest.columns.clone();
            manifest.store_columns(columns);
        }
        Ok(manifest)
    }

    /// Writes the manifest as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManifestEncode`] or [`Error::Io`].
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut data = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut data, PrettyFormatter::with_indent(b"    "));
        self.content
            .serialize(&mut serializer)
            .map_err(|source| Error::ManifestEncode {
                path: path.to_path_buf(),
                source,
            })?;
        fs::write(path, data).map_err(|err| {
            Error::io(format!("cannot write manifest \"{}\"", path.display()), err)
        })
    }

    /// Path the manifest was loaded from, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.exists
    }

    #[must_use]
    pub fn modified(&self) -> bool {
        self.modified
    }

    /// True for a non-empty `columns` array.
    #[must_use]
    pub fn has_columns(&self) -> bool {
        !self.columns.is_empty()
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn set_columns(&mut self, columns: Vec<String>) {
        self.store_columns(columns);
        self.modified = true;
    }

    #[must_use]
    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    #[must_use]
    pub fn enclosure(&self) -> u8 {
        self.enclosure
    }

    /// Parser for the header of the described table.
    #[must_use]
    pub fn parser(&self) -> ColumnParser {
        ColumnParser::new(self.delimiter, self.enclosure)
    }

    fn store_columns(&mut self, columns: Vec<String>) {
        let values = columns.iter().cloned().map(Value::String).collect();
        self.content.insert(COLUMNS_KEY.into(), Value::Array(values));
        self.columns = columns;
    }
}

fn single_byte(
    content: &Map<String, Value>,
    key: &str,
    default: u8,
) -> std::result::Result<u8, String> {
    match content.get(key) {
        None => Ok(default),
        Some(Value::String(value)) => match value.as_bytes() {
            [byte] => Ok(*byte),
            bytes => Err(format!(
                "unexpected length \"{}\" of the manifest \"{key}\" key. Expected 1 char",
                bytes.len()
            )),
        },
        Some(other) => Err(format!(
            "unexpected type \"{}\" of the manifest \"{key}\" key",
            type_name(other)
        )),
    }
}

fn column_name(value: &Value) -> String {
    match value {
        Value::String(name) => name.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
