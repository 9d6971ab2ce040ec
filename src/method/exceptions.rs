//! Exception handler tables.
//!
//! Each clause travels as a fixed 24-byte record of six little-endian `u32` values, and a
//! table is the plain concatenation of its records with no count prefix. See
//! [`ExceptionHandler`] for the field order.

use bitflags::bitflags;

use crate::{
    file::{io::push_le, parser::Parser},
    Result,
};

/// Size in bytes of one serialized [`ExceptionHandler`] record.
pub const EXCEPTION_HANDLER_SIZE: usize = 24;

bitflags! {
    /// Kind of an exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u32 {
        /// A typed exception clause; the record carries the caught type's token
        const EXCEPTION = 0x0000;
        /// A filter clause; the record carries the filter's code offset
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// A fault clause, a finally that only runs when an exception escapes
        const FAULT = 0x0004;
    }
}

/// One protected region of a method body and its handler.
///
/// # Layout
///
/// Records cross the native boundary as six little-endian `u32` values, concatenated in
/// handler order with no count prefix:
///
/// | Offset | Field |
/// |---|---|
/// | 0 | flags |
/// | 4 | try offset |
/// | 8 | try length |
/// | 12 | handler offset |
/// | 16 | handler length |
/// | 20 | class token or filter offset |
///
/// # Examples
///
/// ```rust
/// use clrbridge::method::{ExceptionHandler, ExceptionHandlerFlags};
///
/// let handler = ExceptionHandler {
///     flags: ExceptionHandlerFlags::FINALLY,
///     try_offset: 0,
///     try_length: 10,
///     handler_offset: 10,
///     handler_length: 4,
///     class_token_or_filter: 0,
/// };
/// let bytes = ExceptionHandler::write_table(&[handler]);
/// assert_eq!(ExceptionHandler::parse_table(&bytes)?, [handler]);
/// # Ok::<(), clrbridge::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// Offset of the try block from the start of the code
    pub try_offset: u32,
    /// Length of the try block in bytes
    pub try_length: u32,
    /// Offset of the handler from the start of the code
    pub handler_offset: u32,
    /// Length of the handler in bytes
    pub handler_length: u32,
    /// Caught type token for typed clauses, filter offset for filter clauses
    pub class_token_or_filter: u32,
}

impl ExceptionHandler {
    /// The token of the caught type, for typed clauses.
    #[must_use]
    pub fn class_token(&self) -> Option<u32> {
        self.flags.is_empty().then_some(self.class_token_or_filter)
    }

    /// The offset of the filter code, for filter clauses.
    #[must_use]
    pub fn filter_offset(&self) -> Option<u32> {
        self.flags
            .contains(ExceptionHandlerFlags::FILTER)
            .then_some(self.class_token_or_filter)
    }

    /// Read one record.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than 24 bytes remain.
    pub fn read(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(ExceptionHandler {
            flags: ExceptionHandlerFlags::from_bits_truncate(parser.read_le::<u32>()?),
            try_offset: parser.read_le::<u32>()?,
            try_length: parser.read_le::<u32>()?,
            handler_offset: parser.read_le::<u32>()?,
            handler_length: parser.read_le::<u32>()?,
            class_token_or_filter: parser.read_le::<u32>()?,
        })
    }

    /// Append the record to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        push_le(out, self.flags.bits());
        push_le(out, self.try_offset);
        push_le(out, self.try_length);
        push_le(out, self.handler_offset);
        push_le(out, self.handler_length);
        push_le(out, self.class_token_or_filter);
    }

    /// Decode a flattened handler table.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the table length is not a multiple of the
    /// record size.
    pub fn parse_table(data: &[u8]) -> Result<Vec<Self>> {
        if data.len() % EXCEPTION_HANDLER_SIZE != 0 {
            return Err(malformed_error!(
                "Exception handler table of {} bytes is not a multiple of {}",
                data.len(),
                EXCEPTION_HANDLER_SIZE
            ));
        }

        let mut parser = Parser::new(data);
        let mut handlers = Vec::with_capacity(data.len() / EXCEPTION_HANDLER_SIZE);
        while parser.has_more_data() {
            handlers.push(Self::read(&mut parser)?);
        }
        Ok(handlers)
    }

    /// Flatten a handler table.
    #[must_use]
    pub fn write_table(handlers: &[Self]) -> Vec<u8> {
        let mut out = Vec::with_capacity(handlers.len() * EXCEPTION_HANDLER_SIZE);
        for handler in handlers {
            handler.write(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn record_layout() {
        let handler = ExceptionHandler {
            flags: ExceptionHandlerFlags::FILTER,
            try_offset: 1,
            try_length: 2,
            handler_offset: 3,
            handler_length: 4,
            class_token_or_filter: 0x0100_0005,
        };

        let bytes = ExceptionHandler::write_table(&[handler, handler]);
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[..8], &[1, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(&bytes[20..24], &[5, 0, 0, 1]);

        assert_eq!(handler.filter_offset(), Some(0x0100_0005));
        assert_eq!(handler.class_token(), None);
    }

    #[test]
    fn typed_clause() {
        let bytes = [
            0, 0, 0, 0, 0x10, 0, 0, 0, 0x20, 0, 0, 0, 0x30, 0, 0, 0, 0x08, 0, 0, 0, 0x07, 0, 0,
            0x02,
        ];
        let handlers = ExceptionHandler::parse_table(&bytes).unwrap();

        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].class_token(), Some(0x0200_0007));
        assert_eq!(handlers[0].handler_offset, 0x30);
    }

    #[test]
    fn truncated_table() {
        assert!(ExceptionHandler::parse_table(&[]).unwrap().is_empty());
        assert!(matches!(
            ExceptionHandler::parse_table(&[0; 23]),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            ExceptionHandler::parse_table(&[0; 25]),
            Err(Error::Malformed { .. })
        ));
    }
}
