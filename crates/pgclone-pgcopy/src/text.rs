//! Row-boundary scanning for the default (text) COPY format: fields
//! separated by tab, rows by newline, with `\`-escaping of the delimiter,
//! newline, carriage return, and backslash itself. We only need to find
//! unescaped newlines; field contents are opaque bytes we pass through.

/// Counts complete, newline-terminated rows in `buf`. A trailing partial
/// row (no terminating `\n` yet) is not counted.
pub fn count_complete_rows(buf: &[u8]) -> usize {
    let mut rows = 0;
    let mut escaped = false;
    for &b in buf {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'\n' => rows += 1,
            _ => {}
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_plain_rows() {
        assert_eq!(count_complete_rows(b"a\tb\nc\td\n"), 2);
    }

    #[test]
    fn does_not_count_escaped_newline_in_field_data() {
        // A literal backslash-n inside a field is an escape sequence, not a
        // row terminator, in COPY's text format.
        assert_eq!(count_complete_rows(b"a\\\nb\tc\n"), 1);
    }

    #[test]
    fn ignores_trailing_partial_row() {
        assert_eq!(count_complete_rows(b"a\tb\nc\td"), 1);
    }
}
