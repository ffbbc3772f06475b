// Length-delimited framing for the front-end bridge connection.
//
// Every `FrontendMessage` / `BotMessage` travels as a 4-byte big-endian
// length prefix followed by the JSON payload. The helpers below only move
// bytes; JSON encoding is done by the caller so this module stays agnostic of
// the message enums.
//
// `MAX_FRAME_SIZE` bounds the allocation made from an untrusted length
// prefix. Order attachments (binary item files) are the largest payloads the
// front-end sends, and they are a few kilobytes in practice.

use std::io::{self, Read, Write};

/// Largest frame accepted in either direction (4 MB).
pub const MAX_FRAME_SIZE: u32 = 4 * 1024 * 1024;

/// Write one frame: big-endian length, then the payload, then flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = match u32::try_from(payload.len()) {
        Ok(len) if len <= MAX_FRAME_SIZE => len,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
                    payload.len()
                ),
            ));
        }
    };
    let prefix = len.to_be_bytes();
    writer.write_all(&prefix)?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Read one frame written by `write_frame`.
///
/// A stream that closes mid-frame surfaces as `UnexpectedEof`; a length
/// prefix above `MAX_FRAME_SIZE` surfaces as `InvalidData` before anything is
/// allocated.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let len = u32::from_be_bytes(prefix);
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frames_are_read_back_in_order() {
        let frames: Vec<&[u8]> = vec![b"order", b"", b"queue position"];
        let mut wire = Vec::new();
        for frame in &frames {
            write_frame(&mut wire, frame).unwrap();
        }

        let mut cursor = Cursor::new(&wire);
        for expected in &frames {
            assert_eq!(read_frame(&mut cursor).unwrap(), *expected);
        }
    }

    #[test]
    fn length_prefix_is_big_endian() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"abc").unwrap();
        assert_eq!(&wire[..4], &[0, 0, 0, 3]);
        assert_eq!(&wire[4..], b"abc");
    }

    #[test]
    fn oversized_write_is_refused() {
        let big = vec![0u8; MAX_FRAME_SIZE as usize + 1];
        let mut wire = Vec::new();
        let err = write_frame(&mut wire, &big).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(wire.is_empty());
    }

    #[test]
    fn oversized_prefix_is_refused() {
        let prefix = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(prefix.to_vec());
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_frame_is_eof() {
        // Prefix promises 10 bytes, only 3 follow.
        let mut wire = 10u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"abc");
        let mut cursor = Cursor::new(wire);
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
