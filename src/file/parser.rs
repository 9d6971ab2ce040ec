//! Cursor-based parser for the bridge's binary encodings.
//!
//! [`Parser`] keeps a position into a borrowed byte slice and offers bounds-checked
//! reads of fixed-width primitives, ECMA-335 compressed unsigned integers and
//! length-prefixed strings. Type descriptors and the instrumentation request decode
//! through it.
//!
//! # Compressed integers
//!
//! Lengths and counts use the ECMA-335 II.23.2 compressed unsigned integer encoding:
//!
//! | Pattern | Bytes | Range |
//! |---|---|---|
//! | `0xxxxxxx` | 1 | `0..=0x7F` |
//! | `10xxxxxx xxxxxxxx` | 2 | `0x80..=0x3FFF` |
//! | `110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx` | 4 | `0x4000..=0x1FFF_FFFF` |
//!
//! # Examples
//!
//! ```rust
//! use clrbridge::file::parser::Parser;
//!
//! let data = [0x03, b'a', b'b', b'c', 0x2A, 0x00];
//! let mut parser = Parser::new(&data);
//! assert_eq!(parser.read_prefixed_string_utf8()?, "abc");
//! assert_eq!(parser.read_le::<u16>()?, 42);
//! assert!(!parser.has_more_data());
//! # Ok::<(), clrbridge::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, WireIO},
    Result,
};

/// A cursor over a byte slice.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the underlying buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true while unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current position in the buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Read a little-endian primitive.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the buffer is exhausted.
    pub fn read_le<T: WireIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Borrow the next `length` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        if length > self.remaining() {
            return Err(out_of_bounds_error!());
        }

        let slice = &self.data[self.position..self.position + length];
        self.position += length;
        Ok(slice)
    }

    /// Read an ECMA-335 compressed unsigned integer.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input and [`crate::Error::Malformed`]
    /// for an invalid lead byte.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte));
        }

        // 4-byte encoding: 110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let rest = self.read_bytes(3)?;
            return Ok(((u32::from(first_byte) & 0x1F) << 24)
                | (u32::from(rest[0]) << 16)
                | (u32::from(rest[1]) << 8)
                | u32::from(rest[2]));
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a UTF-8 string prefixed with its compressed byte length.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input and [`crate::Error::Malformed`]
    /// for invalid UTF-8.
    pub fn read_prefixed_string_utf8(&mut self) -> Result<String> {
        let length = self.read_compressed_uint()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(length)?;

        std::str::from_utf8(bytes).map(str::to_string).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}-{}: {}",
                start,
                start + length,
                e
            )
        })
    }
}

/// Append `value` to `out` using the ECMA-335 compressed unsigned integer encoding.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `value` exceeds `0x1FFF_FFFF`.
pub fn write_compressed_uint(out: &mut Vec<u8>, value: u32) -> Result<()> {
    match value {
        0..=0x7F => out.push(value as u8),
        0x80..=0x3FFF => {
            out.push(0x80 | (value >> 8) as u8);
            out.push(value as u8);
        }
        0x4000..=0x1FFF_FFFF => {
            out.push(0xC0 | (value >> 24) as u8);
            out.push((value >> 16) as u8);
            out.push((value >> 8) as u8);
            out.push(value as u8);
        }
        _ => return Err(malformed_error!("Value too large to compress - {}", value)),
    }
    Ok(())
}

/// Append `value` as a compressed length followed by its UTF-8 bytes.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the string is too long to encode.
pub fn write_prefixed_string_utf8(out: &mut Vec<u8>, value: &str) -> Result<()> {
    let Ok(length) = u32::try_from(value.len()) else {
        return Err(malformed_error!("String too long - {} bytes", value.len()));
    };
    write_compressed_uint(out, length)?;
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_read_compressed_uint() {
        let test_cases = vec![
            (vec![0x03], 3),                             // 1-byte format
            (vec![0x7F], 0x7F),                          // 1-byte format, max value
            (vec![0x80, 0x80], 0x80),                    // 2-byte format, min value
            (vec![0xBF, 0xFF], 0x3FFF),                  // 2-byte format, max value
            (vec![0xC0, 0x00, 0x40, 0x00], 0x4000),      // 4-byte format, min value
            (vec![0xDF, 0xFF, 0xFF, 0xFF], 0x1FFF_FFFF), // 4-byte format, max value
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_compressed_uint().unwrap(), expected);
            assert!(!parser.has_more_data());

            let mut encoded = Vec::new();
            write_compressed_uint(&mut encoded, expected).unwrap();
            assert_eq!(encoded, input);
        }

        let mut parser = Parser::new(&[]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::OutOfBounds)
        ));

        let mut parser = Parser::new(&[0xE0]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::Malformed { .. })
        ));

        assert!(write_compressed_uint(&mut Vec::new(), 0x2000_0000).is_err());
    }

    #[test]
    fn test_prefixed_string() {
        let mut encoded = Vec::new();
        write_prefixed_string_utf8(&mut encoded, "System.Private.CoreLib").unwrap();
        write_prefixed_string_utf8(&mut encoded, "").unwrap();
        write_prefixed_string_utf8(&mut encoded, "中文").unwrap();

        let mut parser = Parser::new(&encoded);
        assert_eq!(
            parser.read_prefixed_string_utf8().unwrap(),
            "System.Private.CoreLib"
        );
        assert_eq!(parser.read_prefixed_string_utf8().unwrap(), "");
        assert_eq!(parser.read_prefixed_string_utf8().unwrap(), "中文");
        assert_eq!(parser.remaining(), 0);
    }

    #[test]
    fn test_invalid_utf8() {
        let mut parser = Parser::new(&[0x02, 0xC3, 0x28]);
        assert!(matches!(
            parser.read_prefixed_string_utf8(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_truncated_string_leaves_position_on_prefix() {
        let data = [0x05, b'a', b'b'];
        let mut parser = Parser::new(&data);

        assert!(matches!(
            parser.read_prefixed_string_utf8(),
            Err(Error::OutOfBounds)
        ));
        assert_eq!(parser.pos(), 1);

        parser = Parser::new(&data);
        assert_eq!(parser.read_le::<u8>().unwrap(), 0x05);
        assert_eq!(parser.read_bytes(2).unwrap(), b"ab");
        assert!(parser.read_bytes(1).is_err());
    }
}
