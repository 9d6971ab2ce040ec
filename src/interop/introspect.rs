use crate::{
    typesystem::{layout, TypeDescriptor, TypeKind, TypeRegistry, TypeSig},
    Result,
};

/// Layout of one element slot of a single-dimension zero-based array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayInfo {
    /// Byte size of one element slot
    pub element_size: u32,
    /// Offsets of references within one element slot
    pub ref_offsets: Vec<u32>,
}

/// Answer an array layout query.
///
/// # Errors
/// Returns [`crate::Error::Protocol`] when the descriptor is not a single-dimension
/// zero-based array, and decoding or layout errors for the element type.
pub fn array_info(registry: &TypeRegistry, descriptor: &[u8]) -> Result<ArrayInfo> {
    let sig = TypeDescriptor::new(descriptor).decode(registry)?;
    let TypeSig::SzArray(element) = &sig else {
        return Err(protocol_error!(
            "Array layout requested for {}, only single-dimension zero-based arrays are supported",
            sig
        ));
    };

    let slot = layout::slot(registry, element)?;
    log::trace!(
        "Array of {}: element size {}, {} references",
        element,
        slot.size,
        slot.ref_offsets.len()
    );
    Ok(ArrayInfo {
        element_size: slot.size,
        ref_offsets: slot.ref_offsets,
    })
}

/// Answer an object layout query with the reference offsets of an instance.
///
/// Strings, primitives and enums are opaque leaves and yield no offsets.
///
/// # Errors
/// Returns [`crate::Error::Protocol`] for array types, which must go through
/// [`array_info`], and decoding or layout errors otherwise.
pub fn object_info(registry: &TypeRegistry, descriptor: &[u8]) -> Result<Vec<u32>> {
    let sig = TypeDescriptor::new(descriptor).decode(registry)?;
    match &sig {
        TypeSig::String | TypeSig::Primitive(_) => Ok(Vec::new()),
        TypeSig::SzArray(_) | TypeSig::Array { .. } => Err(protocol_error!(
            "Object layout requested for array type {}",
            sig
        )),
        _ => {
            if let Some(TypeKind::Enum(_)) = registry.kind_of(&sig)? {
                return Ok(Vec::new());
            }
            Ok(registry.layout(&sig)?.ref_offsets.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test::sample_registry,
        typesystem::{descriptor::encode, PrimitiveKind},
        Error,
    };

    fn bytes(registry: &TypeRegistry, sig: &TypeSig) -> Vec<u8> {
        encode(registry, sig).unwrap()
    }

    #[test]
    fn array_elements() {
        let registry = sample_registry();
        let pair = TypeSig::named("Tests", "Tests.Pair");

        let cases = [
            (TypeSig::sz_array(PrimitiveKind::I4.into()), 4, vec![]),
            (TypeSig::sz_array(PrimitiveKind::Boolean.into()), 1, vec![]),
            (TypeSig::sz_array(TypeSig::String), 8, vec![0]),
            (TypeSig::sz_array(TypeSig::named("Tests", "Tests.Mixed")), 8, vec![0]),
            (TypeSig::sz_array(TypeSig::named("Tests", "Tests.Color")), 1, vec![]),
            (TypeSig::sz_array(pair), 16, vec![8]),
        ];
        for (sig, size, refs) in cases {
            let info = array_info(&registry, &bytes(&registry, &sig)).unwrap();
            assert_eq!(info.element_size, size, "{sig}");
            assert_eq!(info.ref_offsets, refs, "{sig}");
        }
    }

    #[test]
    fn only_vectors_have_array_info() {
        let registry = sample_registry();

        for sig in [
            TypeSig::array(PrimitiveKind::I4.into(), 2),
            TypeSig::array(PrimitiveKind::I4.into(), 1),
            TypeSig::String,
        ] {
            assert!(matches!(
                array_info(&registry, &bytes(&registry, &sig)),
                Err(Error::Protocol(_))
            ));
        }
    }

    #[test]
    fn object_offsets() {
        let registry = sample_registry();

        let holder = bytes(&registry, &TypeSig::named("Tests", "Tests.Holder"));
        // pairs@0, pair@8 (pair.value@16), ready@24
        assert_eq!(object_info(&registry, &holder).unwrap(), [0, 16]);

        let derived = bytes(&registry, &TypeSig::named("Tests", "Tests.Derived"));
        assert_eq!(object_info(&registry, &derived).unwrap(), [0]);
    }

    #[test]
    fn leaves_have_no_offsets() {
        let registry = sample_registry();

        for sig in [
            TypeSig::String,
            TypeSig::Object,
            PrimitiveKind::R8.into(),
            TypeSig::named("Tests", "Tests.Color"),
        ] {
            assert!(object_info(&registry, &bytes(&registry, &sig)).unwrap().is_empty());
        }
    }

    #[test]
    fn arrays_are_rejected_by_the_object_query() {
        let registry = sample_registry();
        let sig = TypeSig::sz_array(TypeSig::String);

        assert!(matches!(
            object_info(&registry, &bytes(&registry, &sig)),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            object_info(&registry, &[0xFF]),
            Err(Error::Malformed { .. })
        ));
    }
}
