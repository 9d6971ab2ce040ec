//! Live instances back to recorded values.

use std::{collections::HashMap, vec};

use crate::{
    heap::{HeapObject, HeapRef, HeapValue, ManagedHeap},
    typesystem::TypeSig,
    value::{
        ArrayValue, Dimension, EnumValue, FieldMap, Identity, MockMethod, MockValue,
        ObjectValue, StructValue, Value,
    },
    Result,
};

/// Capture a single heap value.
///
/// # Errors
/// Returns [`crate::Error::InvalidValue`] if the value references a dead instance.
pub fn capture(heap: &ManagedHeap, value: &HeapValue) -> Result<Value> {
    Capturer::new(heap).capture(value)
}

/// Turns heap values into [`Value`] graphs.
///
/// Identities are numbered from 1 in the order instances are first reached and stay stable
/// across calls on the same capturer. An instance reached a second time is emitted as an
/// alias without fields.
///
/// Composite values are built on an explicit stack of pending frames, so arbitrarily long
/// linked structures are captured without deep recursion.
pub struct Capturer<'a> {
    heap: &'a ManagedHeap,
    identities: HashMap<HeapRef, Identity>,
}

/// How the captured children of a [`Frame`] are assembled.
enum Shape {
    Array {
        element: TypeSig,
        dims: Vec<Dimension>,
    },
    Struct {
        ty: TypeSig,
        names: Vec<String>,
    },
    Object {
        ty: TypeSig,
        identity: Identity,
        names: Vec<String>,
    },
    /// Per method: name, number of return values and the argument count of each call
    Mock {
        ty: TypeSig,
        methods: Vec<(String, usize, Vec<usize>)>,
    },
}

/// A composite value whose children are still being captured.
struct Frame {
    shape: Shape,
    pending: vec::IntoIter<HeapValue>,
    captured: Vec<Value>,
}

impl Frame {
    fn new(shape: Shape, children: Vec<HeapValue>) -> Self {
        Frame {
            shape,
            captured: Vec::with_capacity(children.len()),
            pending: children.into_iter(),
        }
    }

    fn finish(self) -> Value {
        let mut values = self.captured.into_iter();
        match self.shape {
            Shape::Array { element, dims } => {
                Value::Array(ArrayValue::dense(element, dims, values.collect()))
            }
            Shape::Struct { ty, names } => Value::Struct(StructValue {
                ty,
                fields: names.into_iter().zip(values).collect(),
            }),
            Shape::Object {
                ty,
                identity,
                names,
            } => Value::Object(ObjectValue {
                ty,
                identity,
                fields: names.into_iter().zip(values).collect(),
            }),
            Shape::Mock { ty, methods } => {
                let mut captured = Vec::with_capacity(methods.len());
                for (name, returns, calls) in methods {
                    let returns = values.by_ref().take(returns).collect();
                    let mut arguments = Vec::with_capacity(calls.len());
                    for count in calls {
                        arguments.push(values.by_ref().take(count).collect());
                    }
                    captured.push(MockMethod {
                        name,
                        returns,
                        arguments,
                    });
                }
                Value::Mock(MockValue {
                    ty,
                    methods: captured,
                })
            }
        }
    }
}

fn split_fields(fields: &FieldMap<HeapValue>) -> (Vec<String>, Vec<HeapValue>) {
    fields
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .unzip()
}

impl<'a> Capturer<'a> {
    /// Create a capturer reading from `heap`.
    #[must_use]
    pub fn new(heap: &'a ManagedHeap) -> Self {
        Capturer {
            heap,
            identities: HashMap::new(),
        }
    }

    /// Capture `value`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidValue`] if the value references a dead instance.
    pub fn capture(&mut self, value: &HeapValue) -> Result<Value> {
        let mut frames: Vec<Frame> = Vec::new();
        let mut done = self.visit(value, &mut frames)?;

        loop {
            let Some(frame) = frames.last_mut() else {
                return Ok(done.unwrap_or(Value::Null));
            };
            if let Some(value) = done.take() {
                frame.captured.push(value);
            }

            done = match frame.pending.next() {
                Some(child) => self.visit(&child, &mut frames)?,
                None => frames.pop().map(Frame::finish),
            };
        }
    }

    /// The captured value if `value` is a leaf, otherwise pushes a frame for its children.
    fn visit(&mut self, value: &HeapValue, frames: &mut Vec<Frame>) -> Result<Option<Value>> {
        match value {
            HeapValue::Null => Ok(Some(Value::Null)),
            HeapValue::Primitive(primitive) => Ok(Some(Value::Primitive(*primitive))),
            HeapValue::Enum { ty, value } => Ok(Some(Value::Enum(EnumValue {
                ty: ty.clone(),
                value: *value,
            }))),
            HeapValue::Struct { ty, fields } => {
                let (names, children) = split_fields(fields);
                let shape = Shape::Struct {
                    ty: ty.clone(),
                    names,
                };
                frames.push(Frame::new(shape, children));
                Ok(None)
            }
            HeapValue::Ref(heap_ref) => self.instance(*heap_ref, frames),
        }
    }

    fn instance(&mut self, heap_ref: HeapRef, frames: &mut Vec<Frame>) -> Result<Option<Value>> {
        let (shape, children) = match self.heap.get(heap_ref)? {
            HeapObject::String(text) => return Ok(Some(Value::Text(text.to_string()))),
            HeapObject::Array {
                element,
                dims,
                elements,
            } => (Shape::Array { element, dims }, elements),
            HeapObject::Object { ty, fields } => {
                if let Some(&identity) = self.identities.get(&heap_ref) {
                    return Ok(Some(Value::alias(ty, identity)));
                }

                let identity = Identity(self.identities.len() as u64 + 1);
                self.identities.insert(heap_ref, identity);
                let (names, children) = split_fields(&fields);
                (
                    Shape::Object {
                        ty,
                        identity,
                        names,
                    },
                    children,
                )
            }
            HeapObject::Mock { ty, methods } => {
                let mut shape = Vec::with_capacity(methods.len());
                let mut children = Vec::new();
                for method in methods {
                    let calls = method.received.iter().map(Vec::len).collect();
                    shape.push((method.name, method.returns.len(), calls));
                    children.extend(method.returns);
                    children.extend(method.received.into_iter().flatten());
                }
                (Shape::Mock { ty, methods: shape }, children)
            }
        };

        frames.push(Frame::new(shape, children));
        Ok(None)
    }
}
