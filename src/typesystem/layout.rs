//! Instance layout computation.
//!
//! Computes where every instance field of a type lives and which byte offsets hold a
//! reference, using the conventions of a 64-bit runtime:
//!
//! - every reference slot (string, object, class, delegate, interface, array) is
//!   [`POINTER_SIZE`] bytes wide and pointer aligned
//! - primitives and enums use their natural size and alignment
//! - classes use automatic layout: the base class's fields come first, then the type's own
//!   fields with references first, then value fields by descending alignment
//! - structs use sequential layout, or explicit offsets when declared, and their size is
//!   rounded up to their alignment
//!
//! Offsets are relative to the first byte of instance field data: the byte after the
//! method-table pointer for reference types, the first byte of the value for value types.
//! Reference offsets of inline struct fields are flattened into the containing layout.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    typesystem::{
        registry::TypeRegistry, LayoutKind, PrimitiveKind, TypeDef, TypeKind, TypeSig,
        POINTER_SIZE,
    },
    Result,
};

/// Placement of a single instance field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    /// Field name
    pub name: String,
    /// Field type, generic arguments applied
    pub sig: TypeSig,
    /// Byte offset within the instance field data
    pub offset: u32,
    /// Byte size of the field slot
    pub size: u32,
}

/// The computed layout of a type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeLayout {
    /// Size of the instance field data in bytes
    pub size: u32,
    /// Alignment requirement when embedded by value
    pub align: u32,
    /// All instance fields, inherited ones first, ordered by offset
    pub fields: Vec<FieldLayout>,
    /// Ascending offsets of every reference slot, including those inside inline structs
    pub ref_offsets: Vec<u32>,
}

/// Size, alignment and reference offsets of one storage slot of a given type.
///
/// A slot is what a field or an array element of that type occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Byte size
    pub size: u32,
    /// Byte alignment
    pub align: u32,
    /// Offsets of references within the slot
    pub ref_offsets: Vec<u32>,
}

impl Slot {
    fn reference() -> Self {
        Slot {
            size: POINTER_SIZE,
            align: POINTER_SIZE,
            ref_offsets: vec![0],
        }
    }

    fn primitive(kind: PrimitiveKind) -> Self {
        let size = kind.size();
        Slot {
            size,
            align: size.min(POINTER_SIZE),
            ref_offsets: Vec::new(),
        }
    }
}

/// Memoized layouts keyed by type signature.
#[derive(Default)]
pub(crate) struct LayoutCache {
    entries: DashMap<TypeSig, Arc<TypeLayout>>,
}

impl LayoutCache {
    pub(crate) fn get(&self, sig: &TypeSig) -> Option<Arc<TypeLayout>> {
        self.entries.get(sig).map(|entry| entry.value().clone())
    }

    /// Insert unless another thread got there first; returns the stored layout.
    pub(crate) fn insert(&self, sig: TypeSig, layout: Arc<TypeLayout>) -> Arc<TypeLayout> {
        self.entries.entry(sig).or_insert(layout).value().clone()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The slot a value of `sig` occupies when stored in a field or array element.
///
/// # Errors
/// Returns [`crate::Error::TypeNotFound`] for unknown types and [`crate::Error::Malformed`] for
/// generic parameters and recursive value types.
pub fn slot(registry: &TypeRegistry, sig: &TypeSig) -> Result<Slot> {
    slot_with(registry, sig, &mut Vec::new())
}

fn slot_with(
    registry: &TypeRegistry,
    sig: &TypeSig,
    in_progress: &mut Vec<TypeSig>,
) -> Result<Slot> {
    match sig {
        TypeSig::Primitive(kind) => Ok(Slot::primitive(*kind)),
        TypeSig::String | TypeSig::Object | TypeSig::SzArray(_) | TypeSig::Array { .. } => {
            Ok(Slot::reference())
        }
        TypeSig::GenericParam(index) => {
            Err(malformed_error!("Unsubstituted generic parameter !{}", index))
        }
        TypeSig::Named { name, .. } => match registry.expect(name)?.kind {
            TypeKind::Class | TypeKind::Delegate | TypeKind::Interface => Ok(Slot::reference()),
            TypeKind::Enum(underlying) => Ok(Slot::primitive(underlying)),
            TypeKind::Struct => {
                let layout = registry.layout_with(sig, in_progress)?;
                Ok(Slot {
                    size: layout.size,
                    align: layout.align,
                    ref_offsets: layout.ref_offsets.clone(),
                })
            }
        },
    }
}

/// Compute the layout of `sig` without consulting the cache for `sig` itself.
pub(super) fn compute(
    registry: &TypeRegistry,
    sig: &TypeSig,
    in_progress: &mut Vec<TypeSig>,
) -> Result<TypeLayout> {
    match sig {
        TypeSig::Primitive(kind) => Ok(leaf(Slot::primitive(*kind))),
        TypeSig::String | TypeSig::Object => Ok(TypeLayout {
            align: 1,
            ..TypeLayout::default()
        }),
        TypeSig::SzArray(_) | TypeSig::Array { .. } => Err(malformed_error!(
            "{} has no fixed instance layout",
            sig
        )),
        TypeSig::GenericParam(index) => {
            Err(malformed_error!("Unsubstituted generic parameter !{}", index))
        }
        TypeSig::Named { name, args } => {
            let def = registry.expect(name)?;
            match def.kind {
                TypeKind::Enum(underlying) => Ok(leaf(Slot::primitive(underlying))),
                TypeKind::Interface => Err(malformed_error!(
                    "Interface {} has no instance layout",
                    name
                )),
                TypeKind::Class | TypeKind::Delegate => {
                    let base = match &def.base {
                        Some(base) => {
                            Some(registry.layout_with(&base.substitute(args), in_progress)?)
                        }
                        None => None,
                    };
                    place_fields(registry, &def, args, base.as_deref(), in_progress)
                }
                TypeKind::Struct => place_fields(registry, &def, args, None, in_progress),
            }
        }
    }
}

fn leaf(slot: Slot) -> TypeLayout {
    TypeLayout {
        size: slot.size,
        align: slot.align,
        fields: Vec::new(),
        ref_offsets: slot.ref_offsets,
    }
}

fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

fn place_fields(
    registry: &TypeRegistry,
    def: &TypeDef,
    args: &[TypeSig],
    base: Option<&TypeLayout>,
    in_progress: &mut Vec<TypeSig>,
) -> Result<TypeLayout> {
    let is_value_type = def.kind == TypeKind::Struct;

    let mut own = Vec::new();
    for field in def.instance_fields() {
        let sig = field.sig.substitute(args);
        let slot = slot_with(registry, &sig, in_progress)?;
        let is_reference = registry.is_reference(&sig)?;
        own.push((field, sig, slot, is_reference));
    }

    let mut layout = base.cloned().unwrap_or_default();
    let start = layout.size;
    let mut cursor = start;
    let mut align = layout.align.max(1);

    match def.layout {
        LayoutKind::Explicit { size } => {
            for (field, sig, slot, _) in own {
                let Some(offset) = field.offset else {
                    return Err(malformed_error!(
                        "Field {} of {} has no explicit offset",
                        field.name,
                        def.name
                    ));
                };
                let offset = start + offset;
                push_field(&mut layout, &field.name, sig, offset, &slot);
                cursor = cursor.max(offset + slot.size);
                align = align.max(slot.align);
            }
            if let Some(size) = size {
                cursor = cursor.max(start + size);
            }
        }
        LayoutKind::Auto | LayoutKind::Sequential { .. } => {
            let pack = match def.layout {
                LayoutKind::Sequential { pack: Some(pack) } if pack > 0 => pack,
                _ => POINTER_SIZE,
            };

            if def.layout == LayoutKind::Auto && !is_value_type {
                // sort_by_key is stable, declaration order breaks ties
                own.sort_by_key(|(_, _, slot, is_reference)| {
                    (!*is_reference, std::cmp::Reverse(slot.align))
                });
            }

            for (field, sig, slot, _) in own {
                let field_align = slot.align.min(pack).max(1);
                let offset = align_up(cursor, field_align);
                push_field(&mut layout, &field.name, sig, offset, &slot);
                cursor = offset + slot.size;
                align = align.max(field_align);
            }
        }
    }

    layout.align = align;
    layout.size = if is_value_type {
        align_up(cursor, align).max(1)
    } else {
        cursor
    };
    layout.fields.sort_by_key(|field| field.offset);
    layout.ref_offsets.sort_unstable();
    layout.ref_offsets.dedup();

    Ok(layout)
}

fn push_field(layout: &mut TypeLayout, name: &str, sig: TypeSig, offset: u32, slot: &Slot) {
    layout
        .ref_offsets
        .extend(slot.ref_offsets.iter().map(|inner| offset + inner));
    layout.fields.push(FieldLayout {
        name: name.to_string(),
        sig,
        offset,
        size: slot.size,
    });
}
