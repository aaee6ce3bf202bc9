//! Quote-aware row boundary scanner.
//!
//! Rows end at a newline that is not inside an enclosure. The enclosure state
//! is a pure toggle on every enclosure byte, so an escaped (doubled) enclosure
//! flips the state twice and leaves it unchanged.
//!
//! The scanner is resumable: when a window ends without a row terminator it
//! remembers how far it got, so growing the window and scanning again does not
//! rescan bytes it has already seen.
//!
//! ```
//! use table_slicer::scanner::RowScanner;
//!
//! let mut scanner = RowScanner::new(b'"');
//! let data = b"\"a\nb\",c\nd";
//! let (consumed, row) = scanner.next(data, false);
//! assert_eq!(consumed, 8);
//! assert_eq!(row, Some(&b"\"a\nb\",c\n"[..]));
//!
//! // The rest has no terminator, so it is only returned at end of input.
//! assert_eq!(scanner.next(&data[8..], false), (0, None));
//! assert_eq!(scanner.next(&data[8..], true), (1, Some(&b"d"[..])));
//! ```

/// Row boundary state machine for one byte stream.
#[derive(Clone, Debug)]
pub struct RowScanner {
    enclosure: u8,
    /// Bytes of the pending window already scanned without finding a row end.
    scanned: usize,
    /// Enclosure state at `scanned`.
    inside: bool,
}

impl RowScanner {
    #[must_use]
    pub fn new(enclosure: u8) -> Self {
        Self {
            enclosure,
            scanned: 0,
            inside: false,
        }
    }

    /// Finds the next complete row at the start of `data`.
    ///
    /// Returns the number of bytes consumed and the row, including its trailing
    /// newline when it has one. `(0, None)` means more input is needed, or at
    /// end of input, that nothing is left.
    ///
    /// Between calls that return `(0, None)` the caller may only append to the
    /// window; after a row is returned the next window must start right after
    /// the consumed bytes.
    pub fn next<'a>(&mut self, data: &'a [u8], at_eof: bool) -> (usize, Option<&'a [u8]>) {
        let start = self.scanned.min(data.len());
        for (offset, &byte) in data[start..].iter().enumerate() {
            if byte == self.enclosure {
                self.inside = !self.inside;
            } else if byte == b'\n' && !self.inside {
                let end = start + offset + 1;
                self.reset();
                return (end, Some(&data[..end]));
            }
        }

        if at_eof {
            self.reset();
            if data.is_empty() {
                return (0, None);
            }
            return (data.len(), Some(data));
        }

        self.scanned = data.len();
        (0, None)
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.inside = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(input: &[u8]) -> Vec<Vec<u8>> {
        let mut scanner = RowScanner::new(b'"');
        let mut rows = Vec::new();
        let mut pos = 0;
        loop {
            let (consumed, row) = scanner.next(&input[pos..], true);
            match row {
                Some(row) => rows.push(row.to_vec()),
                None => break,
            }
            pos += consumed;
        }
        rows
    }

    #[test]
    fn test_rows_with_embedded_newlines() {
        let rows = scan_all(b"\"1\n2\",x\n\"a\"\"\n\",y\nlast");
        assert_eq!(
            rows,
            vec![
                b"\"1\n2\",x\n".to_vec(),
                b"\"a\"\"\n\",y\n".to_vec(),
                b"last".to_vec(),
            ]
        );
    }

    #[test]
    fn test_lone_newline_is_a_row() {
        assert_eq!(scan_all(b"\n\n"), vec![b"\n".to_vec(), b"\n".to_vec()]);
    }

    #[test]
    fn test_empty_input_yields_no_row() {
        assert!(scan_all(b"").is_empty());
        let mut scanner = RowScanner::new(b'"');
        assert_eq!(scanner.next(b"", true), (0, None));
    }

    #[test]
    fn test_unterminated_enclosure_at_eof() {
        assert_eq!(scan_all(b"\"abc\ndef"), vec![b"\"abc\ndef".to_vec()]);
    }

    #[test]
    fn test_resume_after_growth() {
        let mut scanner = RowScanner::new(b'"');
        let full = b"\"a\nb\"\nrest";
        // Window ends inside the enclosure.
        assert_eq!(scanner.next(&full[..3], false), (0, None));
        // Grown window: the newline at index 2 must still count as enclosed.
        let (consumed, row) = scanner.next(&full[..6], false);
        assert_eq!(consumed, 6);
        assert_eq!(row, Some(&b"\"a\nb\"\n"[..]));
        assert_eq!(scanner.next(&full[6..], false), (0, None));
        assert_eq!(scanner.next(&full[6..], true), (4, Some(&b"rest"[..])));
    }

    #[test]
    fn test_custom_enclosure() {
        let mut scanner = RowScanner::new(b'\'');
        let (consumed, row) = scanner.next(b"'x\ny'\nz\n", false);
        assert_eq!(consumed, 6);
        assert_eq!(row, Some(&b"'x\ny'\n"[..]));
    }
}
