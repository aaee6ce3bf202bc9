//! Column splitting for a single row.
//!
//! Only used to recover the column names from a header row, so it favours
//! precise error reporting over speed.

use thiserror::Error;

/// Malformed row.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Content appeared in a column before its opening enclosure.
    /// `position` is the 1-based offset right after the offending token.
    #[error("unexpected token \"{token}\" before enclosure at position {position}")]
    UnexpectedTokenBeforeEnclosure { token: String, position: usize },

    #[error("reached end of the row, but enclosure is not ended")]
    UnterminatedEnclosure,
}

/// Splits rows into columns by delimiter, honouring enclosures.
#[derive(Clone, Copy, Debug)]
pub struct ColumnParser {
    delimiter: u8,
    enclosure: u8,
}

impl ColumnParser {
    #[must_use]
    pub fn new(delimiter: u8, enclosure: u8) -> Self {
        Self {
            delimiter,
            enclosure,
        }
    }

    #[must_use]
    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    #[must_use]
    pub fn enclosure(&self) -> u8 {
        self.enclosure
    }

    /// Parses one row into its column values.
    ///
    /// A doubled enclosure is a literal enclosure character. An empty row
    /// yields no columns at all.
    ///
    /// # Errors
    ///
    /// See [`ParseError`].
    ///
    /// ```
    /// use table_slicer::columns::ColumnParser;
    ///
    /// let parser = ColumnParser::new(b',', b'"');
    /// let columns = parser.parse(b"\"id\",\"a \"\"b\"\"\",c\n").unwrap();
    /// assert_eq!(columns, vec!["id", "a \"b\"", "c"]);
    /// ```
    pub fn parse(&self, row: &[u8]) -> Result<Vec<String>, ParseError> {
        let row = row.strip_suffix(b"\n").unwrap_or(row);

        let mut columns = Vec::new();
        let mut current: Vec<u8> = Vec::new();
        let mut inside = false;
        let mut index = 0;

        while index < row.len() {
            let byte = row[index];
            if byte == self.delimiter && !inside {
                columns.push(String::from_utf8_lossy(&current).into_owned());
                current.clear();
            } else if byte == self.enclosure {
                if row.get(index + 1) == Some(&self.enclosure) {
                    current.push(byte);
                    index += 2;
                    continue;
                }
                if !inside && !current.is_empty() {
                    return Err(ParseError::UnexpectedTokenBeforeEnclosure {
                        token: String::from_utf8_lossy(&current).into_owned(),
                        position: index + 1,
                    });
                }
                inside = !inside;
            } else {
                current.push(byte);
            }
            index += 1;
        }

        if !row.is_empty() {
            columns.push(String::from_utf8_lossy(&current).into_owned());
        }

        if inside {
            return Err(ParseError::UnterminatedEnclosure);
        }

        Ok(columns)
    }
}
