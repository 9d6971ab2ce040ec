//! Structural outcome comparison.
//!
//! [`equal`] decides whether a replayed result matches a recorded one. Primitives compare
//! bit-exactly, arrays by shape then element-wise in enumeration order (sparse storage
//! expanded), structs and objects field by field over the declared instance fields of the
//! expected value's type.
//!
//! Fields whose declared type is a delegate, and fields whose name contains `threadid` in
//! any case, are ignored: both hold identities that differ between runs.
//!
//! Object graphs may be cyclic. Every object is first resolved to the occurrence of its
//! identity that carries the fields, and an (expected, actual) identity pair already being
//! compared further up the stack is taken as equal. An expected identity that reappears
//! against a *different* actual identity is a difference in aliasing and compares unequal,
//! so the comparison always terminates.
//!
//! # Examples
//!
//! ```rust
//! use clrbridge::{typesystem::TypeRegistry, value::{equal, Value}};
//!
//! let registry = TypeRegistry::new();
//! assert!(equal(&registry, &Value::i4(8), &Value::i4(8)));
//! assert!(!equal(&registry, &Value::i4(8), &Value::i8(8)));
//! assert!(!equal(&registry, &Value::r8(0.0), &Value::r8(-0.0)));
//! ```

use std::collections::{HashMap, HashSet};

use crate::{
    typesystem::{TypeRegistry, TypeSig},
    value::{ArrayStorage, ArrayValue, FieldMap, Identity, MockValue, ObjectValue, Value},
};

/// Remaining stack below which another segment is allocated before descending.
const STACK_RED_ZONE: usize = 64 * 1024;
/// Size of each additional stack segment.
const STACK_SEGMENT: usize = 1024 * 1024;

/// Compare `expected` with `actual` using the instance fields declared in `registry`.
#[must_use]
pub fn equal(registry: &TypeRegistry, expected: &Value, actual: &Value) -> bool {
    Comparator::new(registry).equal(expected, actual)
}

/// True if a field with this name and type is left out of comparisons.
fn is_ignored(registry: &TypeRegistry, name: &str, sig: Option<&TypeSig>) -> bool {
    name.to_ascii_lowercase().contains("threadid")
        || sig.is_some_and(|sig| registry.is_delegate(sig))
}

/// Map every identity to the occurrence that carries its fields.
pub(crate) fn index_objects<'v>(root: &'v Value) -> HashMap<Identity, &'v ObjectValue> {
    let mut defining: HashMap<Identity, &'v ObjectValue> = HashMap::new();
    let mut pending = vec![root];

    while let Some(value) = pending.pop() {
        match value {
            Value::Object(object) => {
                let entry = defining.entry(object.identity).or_insert(object);
                if entry.fields.is_empty() && !object.fields.is_empty() {
                    *entry = object;
                }
                pending.extend(object.fields.iter().rev().map(|(_, field)| field));
            }
            Value::Struct(value) => {
                pending.extend(value.fields.iter().rev().map(|(_, field)| field));
            }
            Value::Array(array) => match &array.storage {
                ArrayStorage::Dense(values) => pending.extend(values.iter().rev()),
                ArrayStorage::Sparse { default, overrides } => {
                    pending.extend(overrides.iter().rev().map(|(_, value)| value));
                    pending.push(default);
                }
            },
            Value::Mock(mock) => {
                for method in mock.methods.iter().rev() {
                    pending.extend(method.arguments.iter().rev().flatten());
                    pending.extend(method.returns.iter().rev());
                }
            }
            Value::Null | Value::Primitive(_) | Value::Text(_) | Value::Enum(_) => {}
        }
    }

    defining
}

/// Reusable comparator bound to a type registry.
pub struct Comparator<'r> {
    registry: &'r TypeRegistry,
}

impl<'r> Comparator<'r> {
    /// Create a comparator resolving declared fields through `registry`.
    #[must_use]
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Comparator { registry }
    }

    /// Compare two value graphs.
    #[must_use]
    pub fn equal(&self, expected: &Value, actual: &Value) -> bool {
        let mut session = Session {
            registry: self.registry,
            expected_defs: index_objects(expected),
            actual_defs: index_objects(actual),
            in_progress: HashMap::new(),
            proven: HashSet::new(),
        };
        session.equal(expected, actual)
    }
}

struct Session<'r, 'v> {
    registry: &'r TypeRegistry,
    expected_defs: HashMap<Identity, &'v ObjectValue>,
    actual_defs: HashMap<Identity, &'v ObjectValue>,
    /// Expected identity to the actual identity it is being compared against
    in_progress: HashMap<Identity, Identity>,
    proven: HashSet<(Identity, Identity)>,
}

impl<'v> Session<'_, 'v> {
    // Long recorded lists nest one level per node
    fn equal(&mut self, expected: &Value, actual: &Value) -> bool {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || self.compare(expected, actual))
    }

    fn compare(&mut self, expected: &Value, actual: &Value) -> bool {
        match (expected, actual) {
            (Value::Null, Value::Null) => return true,
            (Value::Null, _) | (_, Value::Null) => return false,
            _ => {}
        }

        if expected.runtime_type() != actual.runtime_type() {
            return false;
        }

        match (expected, actual) {
            (Value::Primitive(e), Value::Primitive(a)) => e == a,
            (Value::Text(e), Value::Text(a)) => e == a,
            (Value::Enum(e), Value::Enum(a)) => e.value == a.value,
            (Value::Array(e), Value::Array(a)) => self.arrays(e, a),
            (Value::Struct(e), Value::Struct(a)) => self.fields(&e.ty, &e.fields, &a.fields),
            (Value::Object(e), Value::Object(a)) => self.objects(e, a),
            (Value::Mock(e), Value::Mock(a)) => self.mocks(e, a),
            _ => false,
        }
    }

    fn arrays(&mut self, expected: &ArrayValue, actual: &ArrayValue) -> bool {
        if expected.dims != actual.dims {
            return false;
        }

        let mut expected_items = expected.iter();
        let mut actual_items = actual.iter();
        loop {
            match (expected_items.next(), actual_items.next()) {
                (Some(e), Some(a)) => {
                    if !self.equal(e, a) {
                        return false;
                    }
                }
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    fn objects<'a>(&mut self, expected: &'a ObjectValue, actual: &'a ObjectValue) -> bool
    where
        'v: 'a,
    {
        let pair = (expected.identity, actual.identity);
        if let Some(&paired) = self.in_progress.get(&pair.0) {
            return paired == pair.1;
        }
        if self.proven.contains(&pair) {
            return true;
        }

        let expected_def: Option<&'a ObjectValue> = self.expected_defs.get(&pair.0).copied();
        let actual_def: Option<&'a ObjectValue> = self.actual_defs.get(&pair.1).copied();
        let expected = expected_def.unwrap_or(expected);
        let actual = actual_def.unwrap_or(actual);

        self.in_progress.insert(pair.0, pair.1);
        let result = self.fields(&expected.ty, &expected.fields, &actual.fields);
        self.in_progress.remove(&pair.0);

        if result {
            self.proven.insert(pair);
        }
        result
    }

    fn fields(
        &mut self,
        ty: &TypeSig,
        expected: &FieldMap<Value>,
        actual: &FieldMap<Value>,
    ) -> bool {
        let registry = self.registry;
        match registry.instance_fields(ty) {
            Ok(declared) => declared.iter().all(|field| {
                if is_ignored(registry, &field.name, Some(&field.sig)) {
                    return true;
                }
                match (expected.get(&field.name), actual.get(&field.name)) {
                    (Some(e), Some(a)) => self.equal(e, a),
                    (None, None) => true,
                    (Some(present), None) | (None, Some(present)) => {
                        let default =
                            Value::default_of(registry, &field.sig).unwrap_or(Value::Null);
                        match expected.get(&field.name) {
                            Some(_) => self.equal(present, &default),
                            None => self.equal(&default, present),
                        }
                    }
                }
            }),
            Err(_) => {
                let names = expected
                    .names()
                    .chain(actual.names().filter(|name| !expected.contains(name)));
                let names: Vec<&str> = names.collect();
                names.into_iter().all(|name| {
                    if is_ignored(registry, name, None) {
                        return true;
                    }
                    let e = expected.get(name).unwrap_or(&Value::Null);
                    let a = actual.get(name).unwrap_or(&Value::Null);
                    self.equal(e, a)
                })
            }
        }
    }

    fn mocks(&mut self, expected: &MockValue, actual: &MockValue) -> bool {
        if expected.methods.len() != actual.methods.len() {
            return false;
        }

        expected.methods.iter().zip(&actual.methods).all(|(e, a)| {
            e.name == a.name
                && self.sequences(&e.returns, &a.returns)
                && e.arguments.len() == a.arguments.len()
                && e
                    .arguments
                    .iter()
                    .zip(&a.arguments)
                    .all(|(e, a)| self.sequences(e, a))
        })
    }

    fn sequences(&mut self, expected: &[Value], actual: &[Value]) -> bool {
        expected.len() == actual.len()
            && expected.iter().zip(actual).all(|(e, a)| self.equal(e, a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test::{cyclic_pair, linked_nodes, sample_registry},
        typesystem::PrimitiveKind,
        value::{ArrayValue, Dimension, MockMethod, Primitive, StructValue},
    };

    fn mixed(name: &str, tag: Value) -> Value {
        Value::Object(ObjectValue {
            ty: TypeSig::named("Tests", "Tests.Mixed"),
            identity: Identity(1),
            fields: [
                ("flag", Value::Primitive(Primitive::u1(1))),
                ("name", Value::text(name)),
                ("tag", tag),
            ]
            .into_iter()
            .collect(),
        })
    }

    #[test]
    fn primitives_are_bit_exact() {
        let registry = sample_registry();

        assert!(equal(&registry, &Value::Null, &Value::Null));
        assert!(!equal(&registry, &Value::Null, &Value::i4(0)));
        assert!(!equal(&registry, &Value::i4(0), &Value::Null));
        assert!(equal(&registry, &Value::r8(f64::NAN), &Value::r8(f64::NAN)));
        assert!(!equal(&registry, &Value::r8(0.0), &Value::r8(-0.0)));
        assert!(equal(
            &registry,
            &Value::Primitive(Primitive::r4(f32::EPSILON)),
            &Value::Primitive(Primitive::r4(f32::EPSILON))
        ));
        assert!(!equal(&registry, &Value::r8(0.1 + 0.2), &Value::r8(0.3)));
        assert!(!equal(&registry, &Value::i4(1), &Value::Primitive(Primitive::u4(1))));
        assert!(!equal(&registry, &Value::text("1"), &Value::i4(1)));
    }

    #[test]
    fn arrays_compare_shape_then_elements() {
        let registry = sample_registry();
        let int = TypeSig::from(PrimitiveKind::I4);
        let values = |v: &[i32]| v.iter().copied().map(Value::i4).collect::<Vec<_>>();

        let expected = Value::Array(ArrayValue::vector(int.clone(), values(&[1, 2, 3, 4, 5])));
        let actual = Value::Array(ArrayValue::vector(int.clone(), values(&[1, 2, 3, 9, 5])));
        assert!(!equal(&registry, &expected, &actual));
        assert!(equal(&registry, &expected, &expected.clone()));

        let square = Value::Array(ArrayValue::dense(
            int.clone(),
            vec![Dimension::new(2), Dimension::new(3)],
            values(&[1, 2, 3, 4, 5, 6]),
        ));
        let transposed = Value::Array(ArrayValue::dense(
            int.clone(),
            vec![Dimension::new(3), Dimension::new(2)],
            values(&[1, 2, 3, 4, 5, 6]),
        ));
        let flat = Value::Array(ArrayValue::vector(int.clone(), values(&[1, 2, 3, 4, 5, 6])));
        assert!(!equal(&registry, &square, &transposed));
        assert!(!equal(&registry, &square, &flat));

        let shifted = Value::Array(ArrayValue::dense(
            int.clone(),
            vec![Dimension::with_lower_bound(6, 1)],
            values(&[1, 2, 3, 4, 5, 6]),
        ));
        assert!(!equal(&registry, &flat, &shifted));
    }

    #[test]
    fn sparse_matches_dense() {
        let registry = sample_registry();
        let int = TypeSig::from(PrimitiveKind::I4);

        let dense = Value::Array(ArrayValue::vector(
            int.clone(),
            vec![Value::i4(0), Value::i4(0), Value::i4(7), Value::i4(0)],
        ));
        let sparse = Value::Array(ArrayValue::sparse(
            int.clone(),
            vec![Dimension::new(4)],
            Value::i4(0),
            vec![(vec![2], Value::i4(7))],
        ));
        let other = Value::Array(ArrayValue::sparse(
            int,
            vec![Dimension::new(4)],
            Value::i4(0),
            vec![(vec![1], Value::i4(7))],
        ));

        assert!(equal(&registry, &dense, &sparse));
        assert!(equal(&registry, &sparse, &dense));
        assert!(!equal(&registry, &dense, &other));
    }

    #[test]
    fn ignored_fields() {
        let registry = sample_registry();
        let watcher = |callback: Value, thread: i32, value: i32| {
            Value::Object(ObjectValue {
                ty: TypeSig::named("Tests", "Tests.Watcher"),
                identity: Identity(1),
                fields: [
                    ("onChange", callback),
                    ("myThreadId", Value::i4(thread)),
                    ("value", Value::i4(value)),
                ]
                .into_iter()
                .collect(),
            })
        };
        let callback = Value::Object(ObjectValue {
            ty: TypeSig::named("Tests", "Tests.Callback"),
            identity: Identity(2),
            fields: FieldMap::new(),
        });

        assert!(equal(
            &registry,
            &watcher(Value::Null, 1, 5),
            &watcher(callback.clone(), 2, 5)
        ));
        assert!(!equal(&registry, &watcher(Value::Null, 1, 5), &watcher(callback, 1, 6)));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let registry = sample_registry();

        let explicit = mixed("a", Value::Null);
        let Value::Object(mut partial) = explicit.clone() else {
            unreachable!()
        };
        partial.fields = [("flag", Value::Primitive(Primitive::u1(1))), ("name", Value::text("a"))]
            .into_iter()
            .collect();

        assert!(equal(&registry, &explicit, &Value::Object(partial.clone())));
        assert!(equal(&registry, &Value::Object(partial), &explicit));
        assert!(!equal(&registry, &explicit, &mixed("a", Value::text("t"))));
    }

    #[test]
    fn unknown_types_use_recorded_fields() {
        let registry = sample_registry();
        let record = |x: i32| {
            Value::Struct(StructValue {
                ty: TypeSig::named("Elsewhere", "Elsewhere.Point"),
                fields: [("x", Value::i4(x)), ("threadId", Value::i4(x))]
                    .into_iter()
                    .collect(),
            })
        };

        assert!(equal(&registry, &record(1), &record(1)));
        assert!(!equal(&registry, &record(1), &record(2)));
    }

    #[test]
    fn cycles_terminate() {
        let registry = sample_registry();

        let cycle = cyclic_pair(1, 2, 10, 20);
        assert!(equal(&registry, &cycle, &cycle.clone()));
        assert!(equal(&registry, &cycle, &cyclic_pair(7, 8, 10, 20)));
        assert!(!equal(&registry, &cycle, &cyclic_pair(1, 2, 10, 21)));

        let list = linked_nodes(&[1, 2, 3]);
        assert!(equal(&registry, &list, &list.clone()));
        assert!(!equal(&registry, &list, &linked_nodes(&[1, 2, 4])));
    }

    #[test]
    fn aliasing_mismatch() {
        let registry = sample_registry();
        let node = TypeSig::named("Tests", "Tests.Node");
        let self_loop = |id: u64, next: Value| {
            Value::Object(ObjectValue {
                ty: node.clone(),
                identity: Identity(id),
                fields: [("value", Value::i4(1)), ("next", next)].into_iter().collect(),
            })
        };

        // a -> a versus b -> c -> b
        let expected = self_loop(1, Value::alias(node.clone(), Identity(1)));
        let actual = self_loop(
            2,
            self_loop(3, Value::alias(node.clone(), Identity(2))),
        );
        assert!(!equal(&registry, &expected, &actual));
    }

    #[test]
    fn mocks() {
        let registry = sample_registry();
        let clock = |returns: Vec<Value>| {
            Value::Mock(MockValue {
                ty: TypeSig::named("Tests", "Tests.IClock"),
                methods: vec![MockMethod {
                    name: "Now".to_string(),
                    returns,
                    arguments: vec![vec![], vec![]],
                }],
            })
        };

        let twice = || clock(vec![Value::i8(1), Value::i8(2)]);
        assert!(equal(&registry, &twice(), &twice()));
        assert!(!equal(&registry, &clock(vec![Value::i8(1)]), &twice()));

        let object = Value::Object(ObjectValue {
            ty: TypeSig::named("Tests", "Tests.IClock"),
            identity: Identity(1),
            fields: FieldMap::new(),
        });
        assert!(!equal(&registry, &clock(vec![]), &object));
    }
}
