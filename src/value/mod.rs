//! The serializable value graph of recorded arguments, receivers and results.
//!
//! A [`Value`] is a closed sum over every shape a recorded runtime value can take. Object
//! nodes carry an [`Identity`] so that aliasing and cycles survive serialization: the first
//! occurrence of an identity in a graph carries the object's fields, every later occurrence
//! with the same identity refers to that same instance.
//!
//! # Key Components
//!
//! - [`crate::value::Value`] - the tagged union
//! - [`crate::value::Primitive`] - bit-exact primitive payloads
//! - [`crate::value::ArrayValue`] - dense or sparse arrays of any rank
//! - [`crate::value::FieldMap`] - insertion-ordered field name to value map
//! - [`crate::value::compare`] - the structural outcome comparator
//!
//! # Examples
//!
//! ```rust
//! use clrbridge::value::{Identity, ObjectValue, FieldMap, Value};
//! use clrbridge::typesystem::TypeSig;
//!
//! // node.next == node
//! let node = TypeSig::named("Tests", "Tests.Node");
//! let mut fields = FieldMap::new();
//! fields.insert("value", Value::i4(1));
//! fields.insert("next", Value::alias(node.clone(), Identity(1)));
//! let cyclic = Value::Object(ObjectValue { ty: node, identity: Identity(1), fields });
//!
//! assert_eq!(cyclic.to_string(), "Tests.Node#1 { value: 1, next: Tests.Node#1 }");
//! ```

pub mod compare;
mod display;
mod fields;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use compare::{equal, Comparator};
pub use fields::FieldMap;

use crate::{
    typesystem::{PrimitiveKind, TypeKind, TypeRegistry, TypeSig},
    Error, Result,
};

/// Deepest chain of by-value structs instantiated when building default values.
const MAX_DEFAULT_DEPTH: usize = 64;

/// Per-capture token distinguishing object instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub u64);

/// A primitive value stored as its raw bit pattern.
///
/// Floating point values keep their exact bits, so `-0.0`, every NaN payload, the infinities
/// and `Epsilon` are all distinct and compare bit-exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Primitive {
    /// The primitive type
    pub kind: PrimitiveKind,
    /// Raw bits, zero-extended to 64 bits
    pub bits: u64,
}

impl Primitive {
    /// Create a primitive from raw bits; bits beyond the width of `kind` are discarded.
    #[must_use]
    pub fn new(kind: PrimitiveKind, bits: u64) -> Self {
        Primitive {
            kind,
            bits: bits & kind.bit_mask(),
        }
    }

    /// The zero value of `kind`.
    #[must_use]
    pub fn zero(kind: PrimitiveKind) -> Self {
        Primitive { kind, bits: 0 }
    }

    /// `System.Boolean`
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::new(PrimitiveKind::Boolean, u64::from(value))
    }

    /// `System.Char`
    #[must_use]
    pub fn char(value: u16) -> Self {
        Self::new(PrimitiveKind::Char, u64::from(value))
    }

    /// `System.SByte`
    #[must_use]
    pub fn i1(value: i8) -> Self {
        Self::new(PrimitiveKind::I1, value as u64)
    }

    /// `System.Byte`
    #[must_use]
    pub fn u1(value: u8) -> Self {
        Self::new(PrimitiveKind::U1, u64::from(value))
    }

    /// `System.Int16`
    #[must_use]
    pub fn i2(value: i16) -> Self {
        Self::new(PrimitiveKind::I2, value as u64)
    }

    /// `System.UInt16`
    #[must_use]
    pub fn u2(value: u16) -> Self {
        Self::new(PrimitiveKind::U2, u64::from(value))
    }

    /// `System.Int32`
    #[must_use]
    pub fn i4(value: i32) -> Self {
        Self::new(PrimitiveKind::I4, value as u64)
    }

    /// `System.UInt32`
    #[must_use]
    pub fn u4(value: u32) -> Self {
        Self::new(PrimitiveKind::U4, u64::from(value))
    }

    /// `System.Int64`
    #[must_use]
    pub fn i8(value: i64) -> Self {
        Self::new(PrimitiveKind::I8, value as u64)
    }

    /// `System.UInt64`
    #[must_use]
    pub fn u8(value: u64) -> Self {
        Self::new(PrimitiveKind::U8, value)
    }

    /// `System.Single`
    #[must_use]
    pub fn r4(value: f32) -> Self {
        Self::new(PrimitiveKind::R4, u64::from(value.to_bits()))
    }

    /// `System.Double`
    #[must_use]
    pub fn r8(value: f64) -> Self {
        Self::new(PrimitiveKind::R8, value.to_bits())
    }

    /// `System.IntPtr`
    #[must_use]
    pub fn native_int(value: i64) -> Self {
        Self::new(PrimitiveKind::I, value as u64)
    }

    /// `System.UIntPtr`
    #[must_use]
    pub fn native_uint(value: u64) -> Self {
        Self::new(PrimitiveKind::U, value)
    }

    /// The value as a sign- or zero-extended integer. Floats are truncated toward zero.
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        match self.kind {
            PrimitiveKind::I1 => i64::from(self.bits as u8 as i8),
            PrimitiveKind::I2 => i64::from(self.bits as u16 as i16),
            PrimitiveKind::I4 => i64::from(self.bits as u32 as i32),
            PrimitiveKind::R4 => f32::from_bits(self.bits as u32) as i64,
            PrimitiveKind::R8 => f64::from_bits(self.bits) as i64,
            _ => self.bits as i64,
        }
    }

    /// The value as a double.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self.kind {
            PrimitiveKind::R4 => f64::from(f32::from_bits(self.bits as u32)),
            PrimitiveKind::R8 => f64::from_bits(self.bits),
            kind if kind.is_signed() => self.as_i64() as f64,
            _ => self.bits as f64,
        }
    }

    /// True unless all bits are zero.
    #[must_use]
    pub fn as_bool(&self) -> bool {
        self.bits != 0
    }
}

/// An enumeration value: the enum type plus its underlying integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    /// The enum type
    pub ty: TypeSig,
    /// Underlying integer, sign-extended for signed underlying types
    pub value: i64,
}

/// Bounds of one array dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    /// Number of elements along this dimension
    pub length: u32,
    /// Index of the first element
    #[serde(default)]
    pub lower_bound: i32,
}

impl Dimension {
    /// A zero-based dimension.
    #[must_use]
    pub fn new(length: u32) -> Self {
        Dimension {
            length,
            lower_bound: 0,
        }
    }

    /// A dimension starting at `lower_bound`.
    #[must_use]
    pub fn with_lower_bound(length: u32, lower_bound: i32) -> Self {
        Dimension {
            length,
            lower_bound,
        }
    }
}

/// Element storage of an [`ArrayValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayStorage {
    /// Every element in row-major enumeration order
    Dense(Vec<Value>),
    /// One default for every slot plus explicit overrides
    Sparse {
        /// Value of every slot without an override
        default: Box<Value>,
        /// Absolute index tuples (lower bounds included) and their values; later entries win
        overrides: Vec<(Vec<i64>, Value)>,
    },
}

/// An array of any rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    /// Element type
    pub element: TypeSig,
    /// One entry per dimension
    pub dims: Vec<Dimension>,
    /// Element values
    pub storage: ArrayStorage,
}

impl ArrayValue {
    /// A zero-based single-dimension array.
    #[must_use]
    pub fn vector(element: TypeSig, values: Vec<Value>) -> Self {
        ArrayValue {
            element,
            dims: vec![Dimension::new(values.len() as u32)],
            storage: ArrayStorage::Dense(values),
        }
    }

    /// A dense array of arbitrary shape.
    #[must_use]
    pub fn dense(element: TypeSig, dims: Vec<Dimension>, values: Vec<Value>) -> Self {
        ArrayValue {
            element,
            dims,
            storage: ArrayStorage::Dense(values),
        }
    }

    /// A sparse array of arbitrary shape.
    #[must_use]
    pub fn sparse(
        element: TypeSig,
        dims: Vec<Dimension>,
        default: Value,
        overrides: Vec<(Vec<i64>, Value)>,
    ) -> Self {
        ArrayValue {
            element,
            dims,
            storage: ArrayStorage::Sparse {
                default: Box::new(default),
                overrides,
            },
        }
    }

    /// Number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dims
            .iter()
            .map(|dim| dim.length as usize)
            .product::<usize>()
    }

    /// True if the array has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The runtime type: `T[]` for zero-based vectors, `T[*]` / `T[,]` otherwise.
    #[must_use]
    pub fn runtime_type(&self) -> TypeSig {
        match self.dims.as_slice() {
            [dim] if dim.lower_bound == 0 => TypeSig::sz_array(self.element.clone()),
            dims => TypeSig::array(self.element.clone(), dims.len() as u32),
        }
    }

    /// Row-major position of an absolute index tuple.
    #[must_use]
    pub fn flat_index(&self, index: &[i64]) -> Option<usize> {
        if index.len() != self.dims.len() {
            return None;
        }

        let mut flat = 0_usize;
        for (dim, &position) in self.dims.iter().zip(index) {
            let relative = position.checked_sub(i64::from(dim.lower_bound))?;
            if relative < 0 || relative >= i64::from(dim.length) {
                return None;
            }
            flat = flat * dim.length as usize + relative as usize;
        }
        Some(flat)
    }

    /// Effective values in row-major enumeration order, sparse storage expanded.
    #[must_use]
    pub fn iter(&self) -> ArrayIter<'_> {
        match &self.storage {
            ArrayStorage::Dense(values) => ArrayIter::Dense(values.iter()),
            ArrayStorage::Sparse { default, overrides } => {
                let mut explicit = HashMap::with_capacity(overrides.len());
                for (index, value) in overrides {
                    if let Some(flat) = self.flat_index(index) {
                        explicit.insert(flat, value);
                    }
                }
                ArrayIter::Sparse {
                    explicit,
                    default,
                    next: 0,
                    len: self.len(),
                }
            }
        }
    }

    /// The same array with every element stored explicitly.
    #[must_use]
    pub fn to_dense(&self) -> ArrayValue {
        ArrayValue {
            element: self.element.clone(),
            dims: self.dims.clone(),
            storage: ArrayStorage::Dense(self.iter().cloned().collect()),
        }
    }

    /// Check that the storage agrees with the declared shape.
    ///
    /// # Errors
    /// Returns [`Error::InvalidValue`] for a dense element count that differs from the shape
    /// or a sparse index outside the bounds.
    pub fn validate(&self) -> Result<()> {
        if self.dims.is_empty() {
            return Err(Error::InvalidValue(format!(
                "{}[] array without dimensions",
                self.element
            )));
        }

        match &self.storage {
            ArrayStorage::Dense(values) if values.len() != self.len() => {
                Err(Error::InvalidValue(format!(
                    "{} has {} elements, shape requires {}",
                    self.runtime_type(),
                    values.len(),
                    self.len()
                )))
            }
            ArrayStorage::Sparse { overrides, .. } => {
                for (index, _) in overrides {
                    if self.flat_index(index).is_none() {
                        return Err(Error::InvalidValue(format!(
                            "index {:?} outside the bounds of {}",
                            index,
                            self.runtime_type()
                        )));
                    }
                }
                Ok(())
            }
            ArrayStorage::Dense(_) => Ok(()),
        }
    }
}

/// Iterator over the effective elements of an [`ArrayValue`].
pub enum ArrayIter<'a> {
    /// Dense storage
    Dense(std::slice::Iter<'a, Value>),
    /// Sparse storage expanded on the fly
    Sparse {
        /// Overrides by flat index
        explicit: HashMap<usize, &'a Value>,
        /// Value of every other slot
        default: &'a Value,
        /// Next flat index
        next: usize,
        /// Total number of slots
        len: usize,
    },
}

impl<'a> Iterator for ArrayIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<&'a Value> {
        match self {
            ArrayIter::Dense(values) => values.next(),
            ArrayIter::Sparse {
                explicit,
                default,
                next,
                len,
            } => {
                if *next >= *len {
                    return None;
                }
                let value = explicit.get(next).copied().unwrap_or(*default);
                *next += 1;
                Some(value)
            }
        }
    }
}

/// A value type instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructValue {
    /// The struct type
    pub ty: TypeSig,
    /// Field values by name
    #[serde(default)]
    pub fields: FieldMap<Value>,
}

/// A reference type instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectValue {
    /// The runtime type of the instance
    pub ty: TypeSig,
    /// Capture identity
    pub identity: Identity,
    /// Field values by name; empty for repeated occurrences of the identity
    #[serde(default)]
    pub fields: FieldMap<Value>,
}

/// Recorded behaviour of one method of a mock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockMethod {
    /// Method name
    pub name: String,
    /// Values returned by successive calls
    #[serde(default)]
    pub returns: Vec<Value>,
    /// Arguments received by successive calls
    #[serde(default)]
    pub arguments: Vec<Vec<Value>>,
}

/// A stand-in for an instance of an interface or abstract type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockValue {
    /// The mocked type
    pub ty: TypeSig,
    /// Per-method recordings
    #[serde(default)]
    pub methods: Vec<MockMethod>,
}

/// A recorded runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// The null reference
    Null,
    /// A primitive
    Primitive(Primitive),
    /// A `System.String`
    Text(String),
    /// An enumeration value
    Enum(EnumValue),
    /// An array
    Array(ArrayValue),
    /// A value type instance
    Struct(StructValue),
    /// A reference type instance
    Object(ObjectValue),
    /// A mock instance
    Mock(MockValue),
}

impl Value {
    /// `System.Boolean` value
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Value::Primitive(Primitive::boolean(value))
    }

    /// `System.Int32` value
    #[must_use]
    pub fn i4(value: i32) -> Self {
        Value::Primitive(Primitive::i4(value))
    }

    /// `System.Int64` value
    #[must_use]
    pub fn i8(value: i64) -> Self {
        Value::Primitive(Primitive::i8(value))
    }

    /// `System.Double` value
    #[must_use]
    pub fn r8(value: f64) -> Self {
        Value::Primitive(Primitive::r8(value))
    }

    /// `System.String` value
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    /// A repeated occurrence of an already described object.
    #[must_use]
    pub fn alias(ty: TypeSig, identity: Identity) -> Self {
        Value::Object(ObjectValue {
            ty,
            identity,
            fields: FieldMap::new(),
        })
    }

    /// True for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The runtime type of the value, `None` for null.
    #[must_use]
    pub fn runtime_type(&self) -> Option<TypeSig> {
        match self {
            Value::Null => None,
            Value::Primitive(primitive) => Some(TypeSig::Primitive(primitive.kind)),
            Value::Text(_) => Some(TypeSig::String),
            Value::Enum(value) => Some(value.ty.clone()),
            Value::Array(array) => Some(array.runtime_type()),
            Value::Struct(value) => Some(value.ty.clone()),
            Value::Object(value) => Some(value.ty.clone()),
            Value::Mock(value) => Some(value.ty.clone()),
        }
    }

    /// The default value of `sig`: zero, null, or a struct of defaults.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] for unknown types and [`Error::Malformed`] for generic
    /// parameters and value types that contain themselves.
    pub fn default_of(registry: &TypeRegistry, sig: &TypeSig) -> Result<Value> {
        default_with_depth(registry, sig, 0)
    }
}

fn default_with_depth(registry: &TypeRegistry, sig: &TypeSig, depth: usize) -> Result<Value> {
    if depth > MAX_DEFAULT_DEPTH {
        return Err(malformed_error!("{} contains itself by value", sig));
    }

    match sig {
        TypeSig::Primitive(kind) => Ok(Value::Primitive(Primitive::zero(*kind))),
        TypeSig::String | TypeSig::Object | TypeSig::SzArray(_) | TypeSig::Array { .. } => {
            Ok(Value::Null)
        }
        TypeSig::GenericParam(index) => Err(malformed_error!(
            "No default for unsubstituted generic parameter !{}",
            index
        )),
        TypeSig::Named { name, .. } => match registry.expect(name)?.kind {
            TypeKind::Class | TypeKind::Delegate | TypeKind::Interface => Ok(Value::Null),
            TypeKind::Enum(_) => Ok(Value::Enum(EnumValue {
                ty: sig.clone(),
                value: 0,
            })),
            TypeKind::Struct => {
                let mut fields = FieldMap::new();
                for field in registry.instance_fields(sig)? {
                    let value = default_with_depth(registry, &field.sig, depth + 1)?;
                    fields.insert(field.name, value);
                }
                Ok(Value::Struct(StructValue {
                    ty: sig.clone(),
                    fields,
                }))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::sample_registry;

    #[test]
    fn primitive_bits() {
        assert_eq!(Primitive::i4(-1).bits, 0xFFFF_FFFF);
        assert_eq!(Primitive::i4(-1).as_i64(), -1);
        assert_eq!(Primitive::u4(u32::MAX).as_i64(), i64::from(u32::MAX));
        assert_eq!(Primitive::i1(-128).as_i64(), -128);
        assert_eq!(Primitive::new(PrimitiveKind::U1, 0x1FF).bits, 0xFF);

        assert_ne!(Primitive::r8(0.0), Primitive::r8(-0.0));
        assert_eq!(Primitive::r8(f64::NAN), Primitive::r8(f64::NAN));
        assert_ne!(
            Primitive::r8(f64::NAN),
            Primitive::new(PrimitiveKind::R8, f64::NAN.to_bits() | 1)
        );
        assert_eq!(Primitive::r4(1.5).as_f64(), 1.5);
        assert_ne!(Primitive::i4(1), Primitive::u4(1));
    }

    #[test]
    fn sparse_iteration() {
        let array = ArrayValue::sparse(
            PrimitiveKind::I4.into(),
            vec![Dimension::with_lower_bound(5, 10)],
            Value::i4(7),
            vec![(vec![11], Value::i4(1)), (vec![14], Value::i4(4)), (vec![11], Value::i4(2))],
        );

        let values: Vec<_> = array.iter().cloned().collect();
        assert_eq!(
            values,
            [Value::i4(7), Value::i4(2), Value::i4(7), Value::i4(7), Value::i4(4)]
        );
        assert!(array.validate().is_ok());
        assert_eq!(array.to_dense().iter().count(), 5);
        assert_eq!(array.runtime_type(), TypeSig::array(PrimitiveKind::I4.into(), 1));
    }

    #[test]
    fn multi_dimensional_index() {
        let array = ArrayValue::dense(
            TypeSig::String,
            vec![Dimension::new(2), Dimension::with_lower_bound(3, 1)],
            (0..6).map(|i| Value::text(i.to_string())).collect(),
        );

        assert_eq!(array.len(), 6);
        assert_eq!(array.flat_index(&[0, 1]), Some(0));
        assert_eq!(array.flat_index(&[1, 3]), Some(5));
        assert_eq!(array.flat_index(&[1, 0]), None);
        assert_eq!(array.flat_index(&[2, 1]), None);
        assert_eq!(array.flat_index(&[1]), None);
        assert_eq!(array.runtime_type(), TypeSig::array(TypeSig::String, 2));
    }

    #[test]
    fn validation() {
        let short = ArrayValue::dense(
            PrimitiveKind::I4.into(),
            vec![Dimension::new(3)],
            vec![Value::i4(1)],
        );
        assert!(matches!(short.validate(), Err(Error::InvalidValue(_))));

        let outside = ArrayValue::sparse(
            PrimitiveKind::I4.into(),
            vec![Dimension::new(3)],
            Value::i4(0),
            vec![(vec![3], Value::i4(1))],
        );
        assert!(matches!(outside.validate(), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn defaults() {
        let registry = sample_registry();

        assert_eq!(
            Value::default_of(&registry, &PrimitiveKind::R8.into()).unwrap(),
            Value::r8(0.0)
        );
        assert_eq!(
            Value::default_of(&registry, &TypeSig::named("Tests", "Tests.Base")).unwrap(),
            Value::Null
        );

        let Value::Struct(pair) =
            Value::default_of(&registry, &TypeSig::named("Tests", "Tests.Pair")).unwrap()
        else {
            panic!("struct default expected");
        };
        assert_eq!(pair.fields.get("key"), Some(&Value::i4(0)));
        assert_eq!(pair.fields.get("value"), Some(&Value::Null));

        assert!(matches!(
            Value::default_of(&registry, &TypeSig::named("Tests", "Tests.Color")).unwrap(),
            Value::Enum(EnumValue { value: 0, .. })
        ));
    }

    #[test]
    fn json_shape() {
        let value = Value::Array(ArrayValue::vector(
            PrimitiveKind::I4.into(),
            vec![Value::i4(1), Value::Null],
        ));

        let json = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
        assert!(json.starts_with("{\"array\":"));
    }
}
