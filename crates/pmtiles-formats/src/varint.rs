//! Unsigned LEB128 varints as used by directory columns

use crate::error::{FormatError, FormatResult};

/// Longest encoding of a `u64`
pub const MAX_VARINT_LEN: usize = 10;

/// Read a little-endian base-128 varint starting at `*pos`.
///
/// On success `*pos` points just past the terminating byte. On failure the
/// cursor is left where it was.
pub fn read_varint(buf: &[u8], pos: &mut usize) -> FormatResult<u64> {
    let start = *pos;
    let mut value: u64 = 0;

    for i in 0..MAX_VARINT_LEN {
        let Some(&byte) = buf.get(start + i) else {
            return Err(FormatError::MalformedVarint { position: start });
        };

        let payload = u64::from(byte & 0x7F);
        // The tenth byte may only carry the top bit of a u64
        if i == MAX_VARINT_LEN - 1 && payload > 1 {
            return Err(FormatError::MalformedVarint { position: start });
        }
        value |= payload << (7 * i);

        if byte & 0x80 == 0 {
            *pos = start + i + 1;
            return Ok(value);
        }
    }

    Err(FormatError::MalformedVarint { position: start })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_300() {
        let buf = [0xAC, 0x02];
        let mut pos = 0;
        assert_eq!(read_varint(&buf, &mut pos).expect("valid varint"), 300);
        assert_eq!(pos, 2);
    }

    #[test]
    fn test_consecutive_values() {
        let buf = [0x00, 0x7F, 0x80, 0x01];
        let mut pos = 0;
        assert_eq!(read_varint(&buf, &mut pos).unwrap(), 0);
        assert_eq!(read_varint(&buf, &mut pos).unwrap(), 127);
        assert_eq!(read_varint(&buf, &mut pos).unwrap(), 128);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn test_values_beyond_32_bits() {
        // 2^40
        let buf = [0x80, 0x80, 0x80, 0x80, 0x80, 0x20];
        let mut pos = 0;
        assert_eq!(read_varint(&buf, &mut pos).unwrap(), 1u64 << 40);

        let max = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let mut pos = 0;
        assert_eq!(read_varint(&max, &mut pos).unwrap(), u64::MAX);
        assert_eq!(pos, 10);
    }

    #[test]
    fn test_unterminated_varint() {
        let buf = [0x80, 0x80];
        let mut pos = 0;
        let err = read_varint(&buf, &mut pos).unwrap_err();
        assert!(matches!(err, FormatError::MalformedVarint { position: 0 }));
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_empty_buffer() {
        let mut pos = 0;
        assert!(read_varint(&[], &mut pos).is_err());
    }

    #[test]
    fn test_overlong_varint() {
        let buf = [0xFF; 11];
        let mut pos = 0;
        assert!(read_varint(&buf, &mut pos).is_err());

        // Tenth byte carrying more than one bit overflows u64
        let overflow = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x02];
        let mut pos = 0;
        assert!(read_varint(&overflow, &mut pos).is_err());
    }
}
