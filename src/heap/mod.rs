//! Live instances of replayed values.
//!
//! This module provides [`ManagedHeap`], an arena holding the instances a replayed method
//! operates on. Recorded [`crate::value::Value`] graphs are turned into heap instances by the
//! [`Materializer`] and read back by the [`Capturer`] after the call.
//!
//! # Object References
//!
//! Instances are referenced via [`HeapRef`], an opaque handle around an arena id. References
//! stay valid for the lifetime of the heap; nothing is ever collected.
//!
//! # Interior Mutability
//!
//! All accessors take `&self` and synchronize through an `RwLock`, so method bodies can hold
//! a shared reference to the heap while mutating instances and invoking mocks.

mod capture;
mod materialize;

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

pub use capture::{capture, Capturer};
pub use materialize::Materializer;

use crate::{
    typesystem::TypeSig,
    value::{Dimension, FieldMap, Primitive},
    Error, Result,
};

/// Opaque handle to an instance on a [`ManagedHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapRef(u64);

impl HeapRef {
    /// Creates a reference from an arena id.
    #[must_use]
    pub fn new(id: u64) -> Self {
        HeapRef(id)
    }

    /// Returns the arena id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapRef({})", self.0)
    }
}

/// A value stored in a field, array slot, argument or return slot.
#[derive(Debug, Clone, PartialEq)]
pub enum HeapValue {
    /// The null reference
    Null,
    /// A primitive
    Primitive(Primitive),
    /// An enumeration value
    Enum {
        /// The enum type
        ty: TypeSig,
        /// Underlying integer
        value: i64,
    },
    /// A value type instance stored inline
    Struct {
        /// The struct type
        ty: TypeSig,
        /// Field values in declaration order
        fields: FieldMap<HeapValue>,
    },
    /// A reference to a heap instance
    Ref(HeapRef),
}

impl HeapValue {
    /// `System.Int32` value
    #[must_use]
    pub fn i4(value: i32) -> Self {
        HeapValue::Primitive(Primitive::i4(value))
    }

    /// The referenced instance, if any.
    #[must_use]
    pub fn as_ref(&self) -> Option<HeapRef> {
        match self {
            HeapValue::Ref(heap_ref) => Some(*heap_ref),
            _ => None,
        }
    }

    /// The value as an integer, for primitives and enums.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeapValue::Primitive(primitive) => Some(primitive.as_i64()),
            HeapValue::Enum { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// True for [`HeapValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, HeapValue::Null)
    }
}

/// Recorded behaviour and received calls of one mocked method.
#[derive(Debug, Clone, PartialEq)]
pub struct MockState {
    /// Method name
    pub name: String,
    /// Results handed out by successive calls
    pub returns: Vec<HeapValue>,
    /// Number of calls served so far
    pub calls: usize,
    /// Arguments of every call, in call order
    pub received: Vec<Vec<HeapValue>>,
}

/// Instance stored on the managed heap.
#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    /// A `System.String`
    String(Arc<str>),
    /// An array of any rank; elements in row-major order
    Array {
        /// Element type
        element: TypeSig,
        /// Dimension lengths and lower bounds
        dims: Vec<Dimension>,
        /// Elements
        elements: Vec<HeapValue>,
    },
    /// A class instance
    Object {
        /// Runtime type
        ty: TypeSig,
        /// Instance fields in declaration order
        fields: FieldMap<HeapValue>,
    },
    /// A mock standing in for an interface or abstract class
    Mock {
        /// Mocked type
        ty: TypeSig,
        /// Per-method state
        methods: Vec<MockState>,
    },
}

impl HeapObject {
    /// The runtime type of the instance.
    #[must_use]
    pub fn runtime_type(&self) -> TypeSig {
        match self {
            HeapObject::String(_) => TypeSig::String,
            HeapObject::Array { element, dims, .. } => match dims.as_slice() {
                [dim] if dim.lower_bound == 0 => TypeSig::sz_array(element.clone()),
                dims => TypeSig::array(element.clone(), dims.len() as u32),
            },
            HeapObject::Object { ty, .. } | HeapObject::Mock { ty, .. } => ty.clone(),
        }
    }

    /// Short name of the variant, for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            HeapObject::String(_) => "string",
            HeapObject::Array { .. } => "array",
            HeapObject::Object { .. } => "object",
            HeapObject::Mock { .. } => "mock",
        }
    }
}

/// Arena of live instances.
///
/// # Examples
///
/// ```rust
/// use clrbridge::heap::{HeapValue, ManagedHeap};
/// use clrbridge::typesystem::TypeSig;
///
/// let heap = ManagedHeap::new();
/// let text = heap.alloc_string("Hello");
/// assert_eq!(&*heap.get_string(text).unwrap(), "Hello");
///
/// let array = heap.alloc_vector(TypeSig::String, vec![HeapValue::Ref(text)]);
/// assert_eq!(heap.array_length(array).unwrap(), 1);
/// ```
#[derive(Debug)]
pub struct ManagedHeap {
    objects: RwLock<HashMap<u64, HeapObject>>,
    next_id: AtomicU64,
}

impl Default for ManagedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagedHeap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        ManagedHeap {
            objects: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<u64, HeapObject>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u64, HeapObject>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn invalid(heap_ref: HeapRef) -> Error {
        Error::InvalidValue(format!("{} is not a live instance", heap_ref))
    }

    /// Places `object` on the heap.
    pub fn alloc(&self, object: HeapObject) -> HeapRef {
        let heap_ref = HeapRef::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.write().insert(heap_ref.id(), object);
        heap_ref
    }

    /// Allocates a string.
    pub fn alloc_string(&self, value: &str) -> HeapRef {
        self.alloc(HeapObject::String(value.into()))
    }

    /// Allocates a zero-based single-dimension array.
    pub fn alloc_vector(&self, element: TypeSig, elements: Vec<HeapValue>) -> HeapRef {
        let dims = vec![Dimension::new(elements.len() as u32)];
        self.alloc(HeapObject::Array {
            element,
            dims,
            elements,
        })
    }

    /// Allocates a class instance with the given fields.
    pub fn alloc_object(&self, ty: TypeSig, fields: FieldMap<HeapValue>) -> HeapRef {
        self.alloc(HeapObject::Object { ty, fields })
    }

    /// A copy of the instance behind `heap_ref`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidValue`] if the reference is not live.
    pub fn get(&self, heap_ref: HeapRef) -> Result<HeapObject> {
        self.read()
            .get(&heap_ref.id())
            .cloned()
            .ok_or_else(|| Self::invalid(heap_ref))
    }

    /// Applies `f` to the instance behind `heap_ref`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidValue`] if the reference is not live, or whatever `f` returns.
    pub fn with_object_mut<F, R>(&self, heap_ref: HeapRef, f: F) -> Result<R>
    where
        F: FnOnce(&mut HeapObject) -> Result<R>,
    {
        let mut objects = self.write();
        let object = objects
            .get_mut(&heap_ref.id())
            .ok_or_else(|| Self::invalid(heap_ref))?;
        f(object)
    }

    /// The runtime type of the instance behind `heap_ref`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidValue`] if the reference is not live.
    pub fn type_of(&self, heap_ref: HeapRef) -> Result<TypeSig> {
        self.read()
            .get(&heap_ref.id())
            .map(HeapObject::runtime_type)
            .ok_or_else(|| Self::invalid(heap_ref))
    }

    /// The contents of a string instance.
    ///
    /// # Errors
    /// Returns [`Error::InvalidValue`] if the reference is not a live string.
    pub fn get_string(&self, heap_ref: HeapRef) -> Result<Arc<str>> {
        match self.read().get(&heap_ref.id()) {
            Some(HeapObject::String(value)) => Ok(value.clone()),
            Some(other) => Err(Error::InvalidValue(format!(
                "{} is a {}, not a string",
                heap_ref,
                other.kind()
            ))),
            None => Err(Self::invalid(heap_ref)),
        }
    }

    /// A field of a class instance.
    ///
    /// # Errors
    /// Returns [`Error::InvalidValue`] if the reference is not a live object or has no such field.
    pub fn get_field(&self, heap_ref: HeapRef, name: &str) -> Result<HeapValue> {
        match self.read().get(&heap_ref.id()) {
            Some(HeapObject::Object { ty, fields }) => fields.get(name).cloned().ok_or_else(|| {
                Error::InvalidValue(format!("{} has no instance field {}", ty, name))
            }),
            Some(other) => Err(Error::InvalidValue(format!(
                "{} is a {}, not an object",
                heap_ref,
                other.kind()
            ))),
            None => Err(Self::invalid(heap_ref)),
        }
    }

    /// Overwrite a field of a class instance.
    ///
    /// # Errors
    /// Returns [`Error::InvalidValue`] if the reference is not a live object or has no such field.
    pub fn set_field(&self, heap_ref: HeapRef, name: &str, value: HeapValue) -> Result<()> {
        self.with_object_mut(heap_ref, |object| match object {
            HeapObject::Object { ty, fields } => match fields.get_mut(name) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(Error::InvalidValue(format!(
                    "{} has no instance field {}",
                    ty, name
                ))),
            },
            other => Err(Error::InvalidValue(format!(
                "{} is a {}, not an object",
                heap_ref,
                other.kind()
            ))),
        })
    }

    /// Total element count of an array instance.
    ///
    /// # Errors
    /// Returns [`Error::InvalidValue`] if the reference is not a live array.
    pub fn array_length(&self, heap_ref: HeapRef) -> Result<usize> {
        match self.read().get(&heap_ref.id()) {
            Some(HeapObject::Array { elements, .. }) => Ok(elements.len()),
            Some(other) => Err(Error::InvalidValue(format!(
                "{} is a {}, not an array",
                heap_ref,
                other.kind()
            ))),
            None => Err(Self::invalid(heap_ref)),
        }
    }

    /// Element `index` of an array instance, in row-major order.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] for an index past the end and [`Error::InvalidValue`] if
    /// the reference is not a live array.
    pub fn get_element(&self, heap_ref: HeapRef, index: usize) -> Result<HeapValue> {
        match self.read().get(&heap_ref.id()) {
            Some(HeapObject::Array { elements, .. }) => elements
                .get(index)
                .cloned()
                .ok_or(out_of_bounds_error!()),
            Some(other) => Err(Error::InvalidValue(format!(
                "{} is a {}, not an array",
                heap_ref,
                other.kind()
            ))),
            None => Err(Self::invalid(heap_ref)),
        }
    }

    /// Overwrite element `index` of an array instance.
    ///
    /// # Errors
    /// Same as [`ManagedHeap::get_element`].
    pub fn set_element(&self, heap_ref: HeapRef, index: usize, value: HeapValue) -> Result<()> {
        self.with_object_mut(heap_ref, |object| match object {
            HeapObject::Array { elements, .. } => match elements.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(out_of_bounds_error!()),
            },
            other => Err(Error::InvalidValue(format!(
                "{} is a {}, not an array",
                heap_ref,
                other.kind()
            ))),
        })
    }

    /// Call `method` on a mock instance.
    ///
    /// Returns the recorded results in order and keeps returning the last one once they are
    /// used up; `fallback` is returned when nothing was recorded. The arguments are appended
    /// to the method's received calls.
    ///
    /// # Errors
    /// Returns [`Error::InvalidValue`] if the reference is not a live mock.
    pub fn call_mock(
        &self,
        heap_ref: HeapRef,
        method: &str,
        args: Vec<HeapValue>,
        fallback: HeapValue,
    ) -> Result<HeapValue> {
        self.with_object_mut(heap_ref, |object| {
            let methods = match object {
                HeapObject::Mock { methods, .. } => methods,
                other => {
                    return Err(Error::InvalidValue(format!(
                        "{} is a {}, not a mock",
                        heap_ref,
                        other.kind()
                    )))
                }
            };

            let index = match methods.iter().position(|state| state.name == method) {
                Some(index) => index,
                None => {
                    methods.push(MockState {
                        name: method.to_string(),
                        returns: Vec::new(),
                        calls: 0,
                        received: Vec::new(),
                    });
                    methods.len() - 1
                }
            };

            let state = &mut methods[index];
            state.received.push(args);
            let result = state
                .returns
                .get(state.calls)
                .or_else(|| state.returns.last())
                .cloned()
                .unwrap_or(fallback);
            state.calls += 1;
            Ok(result)
        })
    }

    /// True if `heap_ref` refers to a live instance.
    #[must_use]
    pub fn contains(&self, heap_ref: HeapRef) -> bool {
        self.read().contains_key(&heap_ref.id())
    }

    /// Number of live instances.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typesystem::PrimitiveKind;

    #[test]
    fn fields_and_elements() {
        let heap = ManagedHeap::new();
        let node = heap.alloc_object(
            TypeSig::named("Tests", "Tests.Node"),
            [("value", HeapValue::i4(1)), ("next", HeapValue::Null)]
                .into_iter()
                .collect(),
        );

        heap.set_field(node, "next", HeapValue::Ref(node)).unwrap();
        assert_eq!(heap.get_field(node, "next").unwrap(), HeapValue::Ref(node));
        assert!(matches!(
            heap.set_field(node, "missing", HeapValue::Null),
            Err(Error::InvalidValue(_))
        ));

        let array = heap.alloc_vector(PrimitiveKind::I4.into(), vec![HeapValue::i4(0); 3]);
        heap.set_element(array, 2, HeapValue::i4(9)).unwrap();
        assert_eq!(heap.get_element(array, 2).unwrap().as_i64(), Some(9));
        assert!(matches!(heap.get_element(array, 3), Err(Error::OutOfBounds)));
        assert!(matches!(heap.get_field(array, "value"), Err(Error::InvalidValue(_))));

        assert_eq!(heap.object_count(), 2);
        assert!(!heap.contains(HeapRef::new(99)));
        assert_eq!(
            heap.type_of(array).unwrap(),
            TypeSig::sz_array(PrimitiveKind::I4.into())
        );
    }

    #[test]
    fn mock_results_repeat_last() {
        let heap = ManagedHeap::new();
        let mock = heap.alloc(HeapObject::Mock {
            ty: TypeSig::named("Tests", "Tests.IClock"),
            methods: vec![MockState {
                name: "Now".to_string(),
                returns: vec![HeapValue::i4(1), HeapValue::i4(2)],
                calls: 0,
                received: Vec::new(),
            }],
        });

        let call = |method: &str| {
            heap.call_mock(mock, method, vec![HeapValue::i4(7)], HeapValue::i4(0))
                .unwrap()
                .as_i64()
        };
        assert_eq!(call("Now"), Some(1));
        assert_eq!(call("Now"), Some(2));
        assert_eq!(call("Now"), Some(2));
        assert_eq!(call("Today"), Some(0));

        let HeapObject::Mock { methods, .. } = heap.get(mock).unwrap() else {
            panic!("mock expected");
        };
        assert_eq!(methods[0].received.len(), 3);
        assert_eq!(methods[1].name, "Today");
    }
}
