//! Row-boundary scanning for the binary COPY format. See the PostgreSQL
//! file format documentation: a fixed signature, a flags word, an optional
//! header extension, then a sequence of tuples each starting with an
//! `i16` field count (`-1` marks end-of-data), and per field an `i32`
//! length (`-1` = NULL) followed by that many bytes of raw data.

use crate::{CopyError, BINARY_SIGNATURE};

/// Strips the fixed signature, flags word, and header extension, returning
/// the remainder of the buffer. Only called once per stream.
pub fn strip_header(buf: &[u8]) -> Result<&[u8], CopyError> {
    if buf.len() < BINARY_SIGNATURE.len() + 8 {
        return Err(CopyError::Truncated {
            expected: BINARY_SIGNATURE.len() + 8 - buf.len(),
        });
    }
    if &buf[..BINARY_SIGNATURE.len()] != BINARY_SIGNATURE {
        return Err(CopyError::BadSignature);
    }
    let mut off = BINARY_SIGNATURE.len();
    // flags (4 bytes), currently always zero in practice
    off += 4;
    let ext_len = read_i32(buf, off)?;
    off += 4;
    if ext_len < 0 {
        return Err(CopyError::UnsupportedExtension);
    }
    off += ext_len as usize;
    if off > buf.len() {
        return Err(CopyError::Truncated {
            expected: off - buf.len(),
        });
    }
    Ok(&buf[off..])
}

/// Counts how many whole tuples are present in `buf`, stopping at the first
/// incomplete tuple or the `-1` trailer. Field contents are skipped by
/// length, never inspected.
pub fn count_complete_rows(mut buf: &[u8]) -> usize {
    let mut rows = 0;
    loop {
        let Ok(field_count) = read_i16(buf, 0) else {
            break;
        };
        if field_count < 0 {
            // end-of-data trailer
            break;
        }
        let mut off = 2;
        let mut ok = true;
        for _ in 0..field_count {
            let Ok(len) = read_i32(buf, off) else {
                ok = false;
                break;
            };
            off += 4;
            if len >= 0 {
                off += len as usize;
            }
        }
        if !ok || off > buf.len() {
            break;
        }
        rows += 1;
        buf = &buf[off..];
    }
    rows
}

fn read_i16(buf: &[u8], off: usize) -> Result<i16, CopyError> {
    let bytes: [u8; 2] = buf
        .get(off..off + 2)
        .ok_or(CopyError::Truncated { expected: 2 })?
        .try_into()
        .unwrap();
    Ok(i16::from_be_bytes(bytes))
}

fn read_i32(buf: &[u8], off: usize) -> Result<i32, CopyError> {
    let bytes: [u8; 4] = buf
        .get(off..off + 4)
        .ok_or(CopyError::Truncated { expected: 4 })?
        .try_into()
        .unwrap();
    Ok(i32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stream() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(BINARY_SIGNATURE);
        buf.extend_from_slice(&0i32.to_be_bytes()); // flags
        buf.extend_from_slice(&0i32.to_be_bytes()); // no header extension
        // tuple 1: two fields, one NULL
        buf.extend_from_slice(&2i16.to_be_bytes());
        buf.extend_from_slice(&4i32.to_be_bytes());
        buf.extend_from_slice(&42i32.to_be_bytes());
        buf.extend_from_slice(&(-1i32).to_be_bytes());
        // tuple 2: one field
        buf.extend_from_slice(&1i16.to_be_bytes());
        buf.extend_from_slice(&3i32.to_be_bytes());
        buf.extend_from_slice(b"abc");
        // trailer
        buf.extend_from_slice(&(-1i16).to_be_bytes());
        buf
    }

    #[test]
    fn strips_header_and_counts_both_tuples() {
        let stream = sample_stream();
        let body = strip_header(&stream).unwrap();
        assert_eq!(count_complete_rows(body), 2);
    }

    #[test]
    fn rejects_bad_signature() {
        let err = strip_header(b"not a copy stream at all, long enough").unwrap_err();
        assert!(matches!(err, CopyError::BadSignature));
    }

    #[test]
    fn stops_at_incomplete_trailing_tuple() {
        let stream = sample_stream();
        let body = strip_header(&stream).unwrap();
        // Truncate mid-second-tuple.
        let truncated = &body[..body.len() - 6];
        assert_eq!(count_complete_rows(truncated), 1);
    }
}
