use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{EnumCount, EnumIter};

use crate::Result;

#[allow(non_snake_case, dead_code, missing_docs)]
/// Element type bytes used to tag type descriptors, from ECMA-335 II.23.1.16
pub mod ELEMENT_TYPE {
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    // Followed by a named type
    pub const VALUETYPE: u8 = 0x11;
    // Followed by a named type
    pub const CLASS: u8 = 0x12;
    // Generic parameter, followed by its index
    pub const VAR: u8 = 0x13;
    // Followed by the element type and the rank
    pub const ARRAY: u8 = 0x14;
    // Followed by a named type, the argument count and the arguments
    pub const GENERICINST: u8 = 0x15;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const OBJECT: u8 = 0x1c;
    // Single-dimension zero-based array, followed by the element type
    pub const SZARRAY: u8 = 0x1d;
}

/// Size of a pointer, and of every reference slot, on the supported 64-bit targets.
pub const POINTER_SIZE: u32 = 8;

/// The primitive value types of the runtime.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    EnumCount,
    Serialize,
    Deserialize,
)]
pub enum PrimitiveKind {
    /// System.Boolean
    Boolean,
    /// System.Char - UTF-16 code unit
    Char,
    /// System.SByte
    I1,
    /// System.Byte
    U1,
    /// System.Int16
    I2,
    /// System.UInt16
    U2,
    /// System.Int32
    I4,
    /// System.UInt32
    U4,
    /// System.Int64
    I8,
    /// System.UInt64
    U8,
    /// System.Single
    R4,
    /// System.Double
    R8,
    /// System.IntPtr
    I,
    /// System.UIntPtr
    U,
}

impl PrimitiveKind {
    /// Size of a value of this kind in bytes.
    #[must_use]
    pub fn size(self) -> u32 {
        match self {
            PrimitiveKind::Boolean | PrimitiveKind::I1 | PrimitiveKind::U1 => 1,
            PrimitiveKind::Char | PrimitiveKind::I2 | PrimitiveKind::U2 => 2,
            PrimitiveKind::I4 | PrimitiveKind::U4 | PrimitiveKind::R4 => 4,
            PrimitiveKind::I8 | PrimitiveKind::U8 | PrimitiveKind::R8 => 8,
            PrimitiveKind::I | PrimitiveKind::U => POINTER_SIZE,
        }
    }

    /// True for the kinds whose values are sign-extended when widened.
    #[must_use]
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PrimitiveKind::I1
                | PrimitiveKind::I2
                | PrimitiveKind::I4
                | PrimitiveKind::I8
                | PrimitiveKind::I
        )
    }

    /// True for `R4` and `R8`.
    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, PrimitiveKind::R4 | PrimitiveKind::R8)
    }

    /// True for the integer kinds that can back an enumeration.
    #[must_use]
    pub fn is_integral(self) -> bool {
        !self.is_float() && self != PrimitiveKind::Boolean
    }

    /// The `ELEMENT_TYPE_*` byte of this kind.
    #[must_use]
    pub fn element_type(self) -> u8 {
        match self {
            PrimitiveKind::Boolean => ELEMENT_TYPE::BOOLEAN,
            PrimitiveKind::Char => ELEMENT_TYPE::CHAR,
            PrimitiveKind::I1 => ELEMENT_TYPE::I1,
            PrimitiveKind::U1 => ELEMENT_TYPE::U1,
            PrimitiveKind::I2 => ELEMENT_TYPE::I2,
            PrimitiveKind::U2 => ELEMENT_TYPE::U2,
            PrimitiveKind::I4 => ELEMENT_TYPE::I4,
            PrimitiveKind::U4 => ELEMENT_TYPE::U4,
            PrimitiveKind::I8 => ELEMENT_TYPE::I8,
            PrimitiveKind::U8 => ELEMENT_TYPE::U8,
            PrimitiveKind::R4 => ELEMENT_TYPE::R4,
            PrimitiveKind::R8 => ELEMENT_TYPE::R8,
            PrimitiveKind::I => ELEMENT_TYPE::I,
            PrimitiveKind::U => ELEMENT_TYPE::U,
        }
    }

    /// Parse from an `ELEMENT_TYPE_*` byte
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the byte is not a primitive element type.
    pub fn from_element_type(type_byte: u8) -> Result<Self> {
        match type_byte {
            ELEMENT_TYPE::BOOLEAN => Ok(PrimitiveKind::Boolean),
            ELEMENT_TYPE::CHAR => Ok(PrimitiveKind::Char),
            ELEMENT_TYPE::I1 => Ok(PrimitiveKind::I1),
            ELEMENT_TYPE::U1 => Ok(PrimitiveKind::U1),
            ELEMENT_TYPE::I2 => Ok(PrimitiveKind::I2),
            ELEMENT_TYPE::U2 => Ok(PrimitiveKind::U2),
            ELEMENT_TYPE::I4 => Ok(PrimitiveKind::I4),
            ELEMENT_TYPE::U4 => Ok(PrimitiveKind::U4),
            ELEMENT_TYPE::I8 => Ok(PrimitiveKind::I8),
            ELEMENT_TYPE::U8 => Ok(PrimitiveKind::U8),
            ELEMENT_TYPE::R4 => Ok(PrimitiveKind::R4),
            ELEMENT_TYPE::R8 => Ok(PrimitiveKind::R8),
            ELEMENT_TYPE::I => Ok(PrimitiveKind::I),
            ELEMENT_TYPE::U => Ok(PrimitiveKind::U),
            _ => Err(malformed_error!(
                "Not a primitive element type - 0x{:02X}",
                type_byte
            )),
        }
    }

    /// Namespace-qualified CLR name, e.g. `System.Int32`.
    #[must_use]
    pub fn clr_full_name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "System.Boolean",
            PrimitiveKind::Char => "System.Char",
            PrimitiveKind::I1 => "System.SByte",
            PrimitiveKind::U1 => "System.Byte",
            PrimitiveKind::I2 => "System.Int16",
            PrimitiveKind::U2 => "System.UInt16",
            PrimitiveKind::I4 => "System.Int32",
            PrimitiveKind::U4 => "System.UInt32",
            PrimitiveKind::I8 => "System.Int64",
            PrimitiveKind::U8 => "System.UInt64",
            PrimitiveKind::R4 => "System.Single",
            PrimitiveKind::R8 => "System.Double",
            PrimitiveKind::I => "System.IntPtr",
            PrimitiveKind::U => "System.UIntPtr",
        }
    }

    /// Mask selecting the bits a value of this kind occupies.
    #[must_use]
    pub fn bit_mask(self) -> u64 {
        match self.size() {
            8 => u64::MAX,
            size => (1_u64 << (size * 8)) - 1,
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.clr_full_name())
    }
}
