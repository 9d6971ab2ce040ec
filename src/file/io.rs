//! Little-endian primitive reading and writing for the bridge wire formats.
//!
//! Everything that crosses the native boundary as raw bytes (type descriptors, the
//! signature-token block, exception-handler records) is little-endian. This module
//! provides the bounds-checked primitives the decoders are built on.
//!
//! # Key Components
//!
//! - [`crate::file::io::WireIO`] - Trait implemented by every primitive that can be read or written
//! - [`crate::file::io::read_le`] - Read a value from the start of a buffer
//! - [`crate::file::io::read_le_at`] - Read a value at an offset, advancing the offset
//! - [`crate::file::io::push_le`] - Append a value to a growing buffer
//!
//! # Examples
//!
//! ```rust
//! use clrbridge::file::io::{push_le, read_le_at};
//!
//! let mut data = Vec::new();
//! push_le(&mut data, 0x1234_u16);
//! push_le(&mut data, 7_u32);
//! assert_eq!(data, [0x34, 0x12, 0x07, 0x00, 0x00, 0x00]);
//!
//! let mut offset = 2;
//! let value: u32 = read_le_at(&data, &mut offset)?;
//! assert_eq!(value, 7);
//! assert_eq!(offset, 6);
//! # Ok::<(), clrbridge::Error>(())
//! ```
//!
//! # Error Handling
//!
//! Reads return [`crate::Error::OutOfBounds`] when the buffer is too short and leave the
//! offset untouched. Appending cannot fail.

use crate::Result;

/// Trait for primitive types with a fixed little-endian byte representation.
///
/// The associated `Bytes` array is what gets copied in and out of wire buffers; its
/// length is the encoded width of the type.
pub trait WireIO: Sized + Copy {
    /// Fixed-size byte array holding the encoded value.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decode a value from its little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode a value into its little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_wire_io {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_wire_io!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64, usize, isize);

/// Reads a value of type `T` from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: WireIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Reads a value of type `T` at `offset` and advances the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: WireIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Appends the little-endian encoding of `value` to a growable buffer.
pub fn push_le<T: WireIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_le_bytes().as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn read_le_widths() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

        assert_eq!(read_le::<u8>(&data).unwrap(), 0x01);
        assert_eq!(read_le::<u16>(&data).unwrap(), 0x0201);
        assert_eq!(read_le::<u32>(&data).unwrap(), 0x0403_0201);
        assert_eq!(read_le::<u64>(&data).unwrap(), 0x0807_0605_0403_0201);
        assert_eq!(read_le::<i8>(&[0xFF]).unwrap(), -1);
        assert_eq!(read_le::<i32>(&[0xFE, 0xFF, 0xFF, 0xFF]).unwrap(), -2);
    }

    #[test]
    fn read_le_float_keeps_bits() {
        let nan_bits = 0x7FF8_0000_0000_0001_u64;
        let value: f64 = read_le(&nan_bits.to_le_bytes()).unwrap();
        assert_eq!(value.to_bits(), nan_bits);

        let neg_zero: f32 = read_le(&(-0.0_f32).to_bits().to_le_bytes()).unwrap();
        assert!(neg_zero.is_sign_negative());
    }

    #[test]
    fn read_le_at_advances() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00];
        let mut offset = 0;

        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 1);
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 2);
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 3);
        assert_eq!(offset, 8);
    }

    #[test]
    fn errors() {
        let data = [0x01, 0x02, 0x03];
        assert!(matches!(read_le::<u32>(&data), Err(Error::OutOfBounds)));

        let mut offset = 2;
        assert!(matches!(
            read_le_at::<u16>(&data, &mut offset),
            Err(Error::OutOfBounds)
        ));
        assert_eq!(offset, 2);

        let mut offset = usize::MAX;
        assert!(matches!(
            read_le_at::<u8>(&data, &mut offset),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn push_le_appends() {
        let mut out = vec![0xAA];
        push_le(&mut out, 0x0102_0304_u32);
        push_le(&mut out, -1_i16);
        assert_eq!(out, [0xAA, 0x04, 0x03, 0x02, 0x01, 0xFF, 0xFF]);
    }
}
