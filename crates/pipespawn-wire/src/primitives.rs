//! Integer, string and string-array encoding.
//!
//! Reads go through `read_exact`, which keeps retrying on short reads from a
//! blocking stream. End of stream before a value is complete surfaces as
//! [`WireError::Closed`]; any other read failure as [`WireError::Io`].

use crate::error::WireError;
use pipespawn_common::{ProcessState, ProcessStateRecord};
use std::io::{self, Read, Write};

/// Length prefix marking an absent string.
pub const ABSENT: i32 = -1;

/// Strings are read in chunks so a garbage length cannot force a huge
/// allocation up front.
const READ_CHUNK: usize = 64 * 1024;

fn fill<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> Result<(), WireError> {
    r.read_exact(buf).map_err(WireError::from_read)
}

pub fn write_i32<W: Write + ?Sized>(w: &mut W, x: i32) -> io::Result<()> {
    w.write_all(&x.to_le_bytes())
}

pub fn read_i32<R: Read + ?Sized>(r: &mut R) -> Result<i32, WireError> {
    let mut buf = [0u8; 4];
    fill(r, &mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn write_i64<W: Write + ?Sized>(w: &mut W, x: i64) -> io::Result<()> {
    w.write_all(&x.to_le_bytes())
}

pub fn read_i64<R: Read + ?Sized>(r: &mut R) -> Result<i64, WireError> {
    let mut buf = [0u8; 8];
    fill(r, &mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Writes `None` as the length `-1`, otherwise the length followed by the
/// raw bytes (no terminator).
pub fn write_string<W: Write + ?Sized>(w: &mut W, s: Option<&str>) -> io::Result<()> {
    match s {
        None => write_i32(w, ABSENT),
        Some(s) => {
            let len = i32::try_from(s.len()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "string too long for the wire")
            })?;
            write_i32(w, len)?;
            w.write_all(s.as_bytes())
        }
    }
}

/// Reads a string written by [`write_string`]. `-1` decodes to `None`,
/// never to an empty string.
pub fn read_string<R: Read + ?Sized>(r: &mut R) -> Result<Option<String>, WireError> {
    let len = read_i32(r)?;
    if len == ABSENT {
        return Ok(None);
    }
    let len = usize::try_from(len).map_err(|_| WireError::InvalidLength(len))?;

    let mut bytes = Vec::with_capacity(len.min(READ_CHUNK));
    let mut remaining = len;
    let mut chunk = [0u8; 4096];
    while remaining > 0 {
        let n = remaining.min(chunk.len());
        fill(r, &mut chunk[..n])?;
        bytes.extend_from_slice(&chunk[..n]);
        remaining -= n;
    }
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| WireError::InvalidUtf8)
}

/// Count followed by that many present strings.
pub fn write_strings<W, S>(w: &mut W, items: &[S]) -> io::Result<()>
where
    W: Write + ?Sized,
    S: AsRef<str>,
{
    let count = i32::try_from(items.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "too many strings for the wire")
    })?;
    write_i32(w, count)?;
    for item in items {
        write_string(w, Some(item.as_ref()))?;
    }
    Ok(())
}

/// Reads a string array. An absent element inside an array is malformed.
pub fn read_strings<R: Read + ?Sized>(r: &mut R) -> Result<Vec<String>, WireError> {
    let count = read_i32(r)?;
    let count = usize::try_from(count).map_err(|_| WireError::InvalidLength(count))?;

    let mut items = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        match read_string(r)? {
            Some(s) => items.push(s),
            None => return Err(WireError::InvalidLength(ABSENT)),
        }
    }
    Ok(items)
}

pub fn write_process_state<W: Write + ?Sized>(
    w: &mut W,
    record: &ProcessStateRecord,
) -> io::Result<()> {
    write_i32(w, record.state.code())?;
    write_i32(w, record.exit_code)
}

pub fn read_process_state<R: Read + ?Sized>(r: &mut R) -> Result<ProcessStateRecord, WireError> {
    let code = read_i32(r)?;
    let exit_code = read_i32(r)?;
    let state = ProcessState::from_code(code).ok_or(WireError::UnknownState(code))?;
    Ok(ProcessStateRecord::new(state, exit_code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out at most one byte per read call.
    struct Trickle<R>(R);

    impl<R: Read> Read for Trickle<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(1);
            self.0.read(&mut buf[..n])
        }
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "boom"))
        }
    }

    #[test]
    fn test_i32_is_little_endian() {
        let mut buf = Vec::new();
        write_i32(&mut buf, 0x0102_0304).unwrap();
        assert_eq!(buf, [4, 3, 2, 1]);
    }

    #[test]
    fn test_absent_and_empty_strings_differ() {
        let mut buf = Vec::new();
        write_string(&mut buf, None).unwrap();
        write_string(&mut buf, Some("")).unwrap();
        assert_eq!(buf, [0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]);

        let mut r = Cursor::new(buf);
        assert_eq!(read_string(&mut r).unwrap(), None);
        assert_eq!(read_string(&mut r).unwrap(), Some(String::new()));
    }

    #[test]
    fn test_string_has_no_terminator_on_the_wire() {
        let mut buf = Vec::new();
        write_string(&mut buf, Some("abc")).unwrap();
        assert_eq!(buf, [3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn test_short_reads_are_retried() {
        let mut buf = Vec::new();
        write_strings(&mut buf, &["alpha", "beta"]).unwrap();
        write_i64(&mut buf, -42).unwrap();

        let mut r = Trickle(Cursor::new(buf));
        assert_eq!(read_strings(&mut r).unwrap(), vec!["alpha", "beta"]);
        assert_eq!(read_i64(&mut r).unwrap(), -42);
    }

    #[test]
    fn test_eof_mid_value_is_closed() {
        let mut r = Cursor::new(vec![5, 0, 0, 0, b'a', b'b']);
        assert!(read_string(&mut r).unwrap_err().is_closed());

        let mut r = Cursor::new(vec![1, 2]);
        assert!(read_i32(&mut r).unwrap_err().is_closed());
    }

    #[test]
    fn test_read_error_is_not_closed() {
        let err = read_i32(&mut Broken).unwrap_err();
        assert!(matches!(err, WireError::Io(_)));
    }

    #[test]
    fn test_negative_lengths_are_rejected() {
        let mut buf = Vec::new();
        write_i32(&mut buf, -5).unwrap();
        assert!(matches!(
            read_string(&mut Cursor::new(buf.clone())),
            Err(WireError::InvalidLength(-5))
        ));
        assert!(matches!(
            read_strings(&mut Cursor::new(buf)),
            Err(WireError::InvalidLength(-5))
        ));
    }

    #[test]
    fn test_absent_element_in_array_is_rejected() {
        let mut buf = Vec::new();
        write_i32(&mut buf, 1).unwrap();
        write_string(&mut buf, None).unwrap();
        assert!(read_strings(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut buf = Vec::new();
        write_i32(&mut buf, 2).unwrap();
        buf.extend_from_slice(&[0xc3, 0x28]);
        assert!(matches!(
            read_string(&mut Cursor::new(buf)),
            Err(WireError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_process_state_record() {
        let mut buf = Vec::new();
        write_process_state(&mut buf, &ProcessStateRecord::terminated(9)).unwrap();
        assert_eq!(buf, [2, 0, 0, 0, 9, 0, 0, 0]);
        assert_eq!(
            read_process_state(&mut Cursor::new(buf)).unwrap(),
            ProcessStateRecord::terminated(9)
        );

        let mut bad = Vec::new();
        write_i32(&mut bad, 7).unwrap();
        write_i32(&mut bad, 0).unwrap();
        assert!(matches!(
            read_process_state(&mut Cursor::new(bad)),
            Err(WireError::UnknownState(7))
        ));
    }
}
