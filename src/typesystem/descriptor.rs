//! Binary type descriptors exchanged with the native engine.
//!
//! A descriptor is a signature-style encoding of one runtime type. It reuses the
//! `ELEMENT_TYPE_*` bytes of ECMA-335 as tags, but names types by their
//! assembly/module/type name chain instead of metadata tokens, since the two sides do not
//! share a metadata scope:
//!
//! ```text
//! descriptor := BOOLEAN | CHAR | I1 | U1 | I2 | U2 | I4 | U4 | I8 | U8 | R4 | R8 | I | U
//!             | STRING | OBJECT
//!             | (CLASS | VALUETYPE) named
//!             | GENERICINST (CLASS | VALUETYPE) count named descriptor*
//!             | SZARRAY descriptor
//!             | ARRAY descriptor rank
//!             | VAR index
//! named      := string(assembly) string(module) string(type)
//! string     := compressed-length utf8-bytes
//! ```
//!
//! Decoding consumes the whole buffer and resolves every named type against a
//! [`TypeRegistry`], so a successfully decoded descriptor always refers to known types.
//!
//! # Examples
//!
//! ```rust
//! use clrbridge::typesystem::{descriptor, TypeDescriptor, TypeRegistry, TypeSig, PrimitiveKind};
//!
//! let registry = TypeRegistry::new();
//! let sig = TypeSig::sz_array(TypeSig::Primitive(PrimitiveKind::I4));
//!
//! let bytes = descriptor::encode(&registry, &sig)?;
//! assert_eq!(bytes, [0x1D, 0x08]);
//! assert_eq!(TypeDescriptor::new(&bytes).decode(&registry)?, sig);
//! # Ok::<(), clrbridge::Error>(())
//! ```

use crate::{
    file::parser::{write_compressed_uint, write_prefixed_string_utf8, Parser},
    typesystem::{PrimitiveKind, TypeKind, TypeName, TypeRegistry, TypeSig, ELEMENT_TYPE},
    Result,
};

/// Maximum nesting of array and generic argument descriptors.
const MAX_NESTING: usize = 64;

/// A borrowed, undecoded type descriptor.
#[derive(Debug, Clone, Copy)]
pub struct TypeDescriptor<'a> {
    data: &'a [u8],
}

impl<'a> TypeDescriptor<'a> {
    /// Wrap raw descriptor bytes.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        TypeDescriptor { data }
    }

    /// The raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Decode into a [`TypeSig`], resolving named types against `registry`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for undecodable
    /// input and [`crate::Error::TypeNotFound`] when a named type is not registered in the
    /// given module.
    pub fn decode(&self, registry: &TypeRegistry) -> Result<TypeSig> {
        if self.data.is_empty() {
            return Err(malformed_error!("Empty type descriptor"));
        }

        let mut parser = Parser::new(self.data);
        let sig = decode_sig(&mut parser, registry, 0)?;
        if parser.has_more_data() {
            return Err(malformed_error!(
                "Type descriptor has {} trailing bytes",
                parser.remaining()
            ));
        }
        Ok(sig)
    }
}

fn decode_sig(parser: &mut Parser<'_>, registry: &TypeRegistry, depth: usize) -> Result<TypeSig> {
    if depth > MAX_NESTING {
        return Err(malformed_error!("Type descriptor nested too deeply"));
    }

    let tag = parser.read_le::<u8>()?;
    match tag {
        ELEMENT_TYPE::STRING => Ok(TypeSig::String),
        ELEMENT_TYPE::OBJECT => Ok(TypeSig::Object),
        ELEMENT_TYPE::CLASS | ELEMENT_TYPE::VALUETYPE => {
            let name = decode_named(parser, registry, tag, 0)?;
            Ok(TypeSig::Named {
                name,
                args: Vec::new(),
            })
        }
        ELEMENT_TYPE::GENERICINST => {
            let kind_tag = parser.read_le::<u8>()?;
            if kind_tag != ELEMENT_TYPE::CLASS && kind_tag != ELEMENT_TYPE::VALUETYPE {
                return Err(malformed_error!(
                    "Generic instantiation of non-named type 0x{:02X}",
                    kind_tag
                ));
            }

            let count = parser.read_compressed_uint()?;
            let name = decode_named(parser, registry, kind_tag, count)?;
            let mut args = Vec::with_capacity(count as usize);
            for _ in 0..count {
                args.push(decode_sig(parser, registry, depth + 1)?);
            }
            Ok(TypeSig::Named { name, args })
        }
        ELEMENT_TYPE::SZARRAY => Ok(TypeSig::sz_array(decode_sig(parser, registry, depth + 1)?)),
        ELEMENT_TYPE::ARRAY => {
            let element = decode_sig(parser, registry, depth + 1)?;
            let rank = parser.read_compressed_uint()?;
            if rank == 0 {
                return Err(malformed_error!("Array descriptor with rank 0"));
            }
            Ok(TypeSig::array(element, rank))
        }
        ELEMENT_TYPE::VAR => Ok(TypeSig::GenericParam(parser.read_compressed_uint()?)),
        other => Ok(TypeSig::Primitive(PrimitiveKind::from_element_type(other)?)),
    }
}

fn decode_named(
    parser: &mut Parser<'_>,
    registry: &TypeRegistry,
    tag: u8,
    arg_count: u32,
) -> Result<TypeName> {
    let assembly = parser.read_prefixed_string_utf8()?;
    let module = parser.read_prefixed_string_utf8()?;
    let name = TypeName::new(assembly, parser.read_prefixed_string_utf8()?);

    let def = registry.get_in_module(&name, &module)?;
    let is_value_type = matches!(def.kind, TypeKind::Struct | TypeKind::Enum(_));
    if is_value_type != (tag == ELEMENT_TYPE::VALUETYPE) {
        return Err(malformed_error!(
            "Descriptor tag 0x{:02X} does not match the kind of {}",
            tag,
            name
        ));
    }
    if def.generic_params != arg_count {
        return Err(malformed_error!(
            "{} expects {} generic arguments, descriptor has {}",
            name,
            def.generic_params,
            arg_count
        ));
    }

    Ok(name)
}

/// Encode `sig` as a descriptor.
///
/// Module names and the class/value-type distinction are taken from `registry`.
///
/// # Errors
/// Returns [`crate::Error::TypeNotFound`] for unregistered named types.
pub fn encode(registry: &TypeRegistry, sig: &TypeSig) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(registry, sig, &mut out)?;
    Ok(out)
}

fn encode_into(registry: &TypeRegistry, sig: &TypeSig, out: &mut Vec<u8>) -> Result<()> {
    match sig {
        TypeSig::Primitive(kind) => out.push(kind.element_type()),
        TypeSig::String => out.push(ELEMENT_TYPE::STRING),
        TypeSig::Object => out.push(ELEMENT_TYPE::OBJECT),
        TypeSig::Named { name, args } => {
            let def = registry.expect(name)?;
            let tag = match def.kind {
                TypeKind::Struct | TypeKind::Enum(_) => ELEMENT_TYPE::VALUETYPE,
                _ => ELEMENT_TYPE::CLASS,
            };

            if args.is_empty() {
                out.push(tag);
            } else {
                out.push(ELEMENT_TYPE::GENERICINST);
                out.push(tag);
                write_compressed_uint(out, args.len() as u32)?;
            }
            write_prefixed_string_utf8(out, &name.assembly)?;
            write_prefixed_string_utf8(out, &def.module)?;
            write_prefixed_string_utf8(out, &name.name)?;
            for arg in args {
                encode_into(registry, arg, out)?;
            }
        }
        TypeSig::SzArray(element) => {
            out.push(ELEMENT_TYPE::SZARRAY);
            encode_into(registry, element, out)?;
        }
        TypeSig::Array { element, rank } => {
            out.push(ELEMENT_TYPE::ARRAY);
            encode_into(registry, element, out)?;
            write_compressed_uint(out, *rank)?;
        }
        TypeSig::GenericParam(index) => {
            out.push(ELEMENT_TYPE::VAR);
            write_compressed_uint(out, *index)?;
        }
    }
    Ok(())
}
