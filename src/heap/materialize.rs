//! Recorded values to live instances.
//!
//! Object graphs are rebuilt in two phases. Meeting an object identity for the first time
//! allocates an empty instance, registers it under the identity and queues it; the queue is
//! drained afterwards, filling in fields. A field that points back to an ancestor therefore
//! resolves to the already registered instance, and every identity yields exactly one
//! instance no matter how often it occurs.

use std::collections::{HashMap, VecDeque};

use crate::{
    heap::{HeapObject, HeapRef, HeapValue, ManagedHeap, MockState},
    typesystem::{TypeKind, TypeRegistry, TypeSig},
    value::{compare::index_objects, FieldMap, Identity, ObjectValue, Value},
    Error, Result,
};

type Pending<'v> = VecDeque<(HeapRef, &'v ObjectValue)>;

/// Builds live instances on a [`ManagedHeap`] from recorded [`Value`]s.
///
/// Identities are remembered across calls. Graphs that only reference an identity whose
/// fields are recorded elsewhere must go through one [`Materializer::materialize_all`] or
/// [`Materializer::materialize_slots`] call together with the defining graph.
pub struct Materializer<'a> {
    registry: &'a TypeRegistry,
    heap: &'a ManagedHeap,
    instances: HashMap<Identity, HeapRef>,
}

impl<'a> Materializer<'a> {
    /// Create a materializer allocating on `heap`.
    #[must_use]
    pub fn new(registry: &'a TypeRegistry, heap: &'a ManagedHeap) -> Self {
        Materializer {
            registry,
            heap,
            instances: HashMap::new(),
        }
    }

    /// The instance created for `identity`, if any.
    #[must_use]
    pub fn instance(&self, identity: Identity) -> Option<HeapRef> {
        self.instances.get(&identity).copied()
    }

    /// Materialize one value graph.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] for unregistered types and [`Error::InvalidValue`] when
    /// a value does not fit its type.
    pub fn materialize(&mut self, value: &Value) -> Result<HeapValue> {
        let mut values = self.materialize_all(&[value])?;
        Ok(values.pop().unwrap_or(HeapValue::Null))
    }

    /// Materialize `value` into a slot declared as `sig`.
    ///
    /// # Errors
    /// As [`Materializer::materialize`], plus [`Error::InvalidValue`] for a null value type or
    /// a primitive of the wrong kind.
    pub fn materialize_as(&mut self, value: &Value, sig: &TypeSig) -> Result<HeapValue> {
        self.check_slot(value, sig)?;
        self.materialize(value)
    }

    /// Materialize several graphs that share identities, each into a slot of the paired
    /// type.
    ///
    /// # Errors
    /// See [`Materializer::materialize_as`].
    pub fn materialize_slots<'v>(
        &mut self,
        slots: &[(&'v Value, &TypeSig)],
    ) -> Result<Vec<HeapValue>> {
        for (value, sig) in slots {
            self.check_slot(value, sig)?;
        }
        let roots: Vec<&'v Value> = slots.iter().map(|(value, _)| *value).collect();
        self.materialize_all(&roots)
    }

    /// Materialize several graphs that share identities.
    ///
    /// # Errors
    /// See [`Materializer::materialize`].
    pub fn materialize_all<'v>(&mut self, roots: &[&'v Value]) -> Result<Vec<HeapValue>> {
        let mut defs: HashMap<Identity, &'v ObjectValue> = HashMap::new();
        for root in roots {
            for (identity, object) in index_objects(*root) {
                let entry = defs.entry(identity).or_insert(object);
                if entry.fields.is_empty() && !object.fields.is_empty() {
                    *entry = object;
                }
            }
        }

        let mut pending = Pending::new();
        let mut values = Vec::with_capacity(roots.len());
        for root in roots {
            values.push(self.convert(*root, &defs, &mut pending)?);
        }

        while let Some((heap_ref, def)) = pending.pop_front() {
            let fields = self.fields_of(&def.ty, &def.fields, &defs, &mut pending)?;
            self.heap.with_object_mut(heap_ref, |object| {
                if let HeapObject::Object { fields: slot, .. } = object {
                    *slot = fields;
                }
                Ok(())
            })?;
        }

        Ok(values)
    }

    /// The default value of `sig`.
    ///
    /// # Errors
    /// See [`Value::default_of`].
    pub fn default_value(&mut self, sig: &TypeSig) -> Result<HeapValue> {
        let value = Value::default_of(self.registry, sig)?;
        self.convert(&value, &HashMap::new(), &mut Pending::new())
    }

    /// A fresh default-initialized instance of `sig`.
    ///
    /// Classes are allocated with every instance field at its default value; value types
    /// yield their default value.
    ///
    /// # Errors
    /// Returns [`Error::InvalidValue`] for interfaces, delegates and arrays, and
    /// [`Error::TypeNotFound`] for unregistered types.
    pub fn create_instance(&mut self, sig: &TypeSig) -> Result<HeapValue> {
        if *sig == TypeSig::Object {
            let object = self.heap.alloc_object(TypeSig::Object, FieldMap::new());
            return Ok(HeapValue::Ref(object));
        }

        match self.registry.kind_of(sig)? {
            Some(TypeKind::Class) => {
                let recorded = FieldMap::new();
                let fields =
                    self.fields_of(sig, &recorded, &HashMap::new(), &mut Pending::new())?;
                Ok(HeapValue::Ref(self.heap.alloc_object(sig.clone(), fields)))
            }
            Some(TypeKind::Interface | TypeKind::Delegate) => Err(Error::InvalidValue(format!(
                "cannot create an instance of {}",
                sig
            ))),
            _ if sig.is_array() || *sig == TypeSig::String => Err(Error::InvalidValue(format!(
                "cannot create an instance of {}",
                sig
            ))),
            _ => self.default_value(sig),
        }
    }

    fn check_slot(&self, value: &Value, sig: &TypeSig) -> Result<()> {
        match (value, sig) {
            (Value::Null, sig) if self.registry.is_value_type(sig)? => Err(Error::InvalidValue(
                format!("null stored in a {} slot", sig),
            )),
            (Value::Primitive(primitive), TypeSig::Primitive(kind)) if primitive.kind != *kind => {
                Err(Error::InvalidValue(format!(
                    "{} stored in a {} slot",
                    primitive.kind, kind
                )))
            }
            _ => Ok(()),
        }
    }

    fn expect_kind(&self, ty: &TypeSig, accepts: fn(TypeKind) -> bool, what: &str) -> Result<()> {
        match self.registry.kind_of(ty)? {
            Some(kind) if accepts(kind) => Ok(()),
            _ => Err(Error::InvalidValue(format!("{} is not {}", ty, what))),
        }
    }

    fn convert<'v>(
        &mut self,
        value: &'v Value,
        defs: &HashMap<Identity, &'v ObjectValue>,
        pending: &mut Pending<'v>,
    ) -> Result<HeapValue> {
        match value {
            Value::Null => Ok(HeapValue::Null),
            Value::Primitive(primitive) => Ok(HeapValue::Primitive(*primitive)),
            Value::Text(text) => Ok(HeapValue::Ref(self.heap.alloc_string(text))),
            Value::Enum(value) => {
                self.expect_kind(&value.ty, |kind| matches!(kind, TypeKind::Enum(_)), "an enum")?;
                Ok(HeapValue::Enum {
                    ty: value.ty.clone(),
                    value: value.value,
                })
            }
            Value::Struct(value) => {
                self.expect_kind(&value.ty, |kind| kind == TypeKind::Struct, "a struct")?;
                let fields = self.fields_of(&value.ty, &value.fields, defs, pending)?;
                Ok(HeapValue::Struct {
                    ty: value.ty.clone(),
                    fields,
                })
            }
            Value::Array(array) => {
                array.validate()?;
                self.registry.resolve(&array.element)?;

                let mut elements = Vec::with_capacity(array.len());
                for element in array.iter() {
                    self.check_slot(element, &array.element)?;
                    elements.push(self.convert(element, defs, pending)?);
                }
                Ok(HeapValue::Ref(self.heap.alloc(HeapObject::Array {
                    element: array.element.clone(),
                    dims: array.dims.clone(),
                    elements,
                })))
            }
            Value::Object(object) => {
                if let Some(&heap_ref) = self.instances.get(&object.identity) {
                    return Ok(HeapValue::Ref(heap_ref));
                }

                let def = defs.get(&object.identity).copied().unwrap_or(object);
                if def.ty != TypeSig::Object {
                    self.expect_kind(
                        &def.ty,
                        |kind| matches!(kind, TypeKind::Class | TypeKind::Delegate),
                        "a class",
                    )?;
                }

                let heap_ref = self.heap.alloc_object(def.ty.clone(), FieldMap::new());
                self.instances.insert(object.identity, heap_ref);
                pending.push_back((heap_ref, def));
                Ok(HeapValue::Ref(heap_ref))
            }
            Value::Mock(mock) => {
                self.expect_kind(
                    &mock.ty,
                    |kind| matches!(kind, TypeKind::Interface | TypeKind::Class),
                    "an interface or class",
                )?;

                let mut methods = Vec::with_capacity(mock.methods.len());
                for method in &mock.methods {
                    let mut returns = Vec::with_capacity(method.returns.len());
                    for value in &method.returns {
                        returns.push(self.convert(value, defs, pending)?);
                    }
                    methods.push(MockState {
                        name: method.name.clone(),
                        returns,
                        calls: 0,
                        received: Vec::new(),
                    });
                }
                Ok(HeapValue::Ref(self.heap.alloc(HeapObject::Mock {
                    ty: mock.ty.clone(),
                    methods,
                })))
            }
        }
    }

    fn fields_of<'v>(
        &mut self,
        ty: &TypeSig,
        recorded: &'v FieldMap<Value>,
        defs: &HashMap<Identity, &'v ObjectValue>,
        pending: &mut Pending<'v>,
    ) -> Result<FieldMap<HeapValue>> {
        let declared = self.registry.instance_fields(ty)?;
        if let Some(name) = recorded
            .names()
            .find(|name| !declared.iter().any(|field| field.name == *name))
        {
            return Err(Error::InvalidValue(format!(
                "{} has no instance field {}",
                ty, name
            )));
        }

        let mut fields = FieldMap::new();
        for field in declared {
            let value = match recorded.get(&field.name) {
                Some(value) => {
                    self.check_slot(value, &field.sig)?;
                    self.convert(value, defs, pending)?
                }
                None => self.default_value(&field.sig)?,
            };
            fields.insert(field.name, value);
        }
        Ok(fields)
    }
}
