//! Shared fixtures for unit tests.

use crate::{
    typesystem::{PrimitiveKind, TypeDefBuilder, TypeRegistry, TypeSig},
    value::{Identity, ObjectValue, Value},
};

// Registry with the types the unit tests lay out, compare and materialize
pub(crate) fn sample_registry() -> TypeRegistry {
    let registry = TypeRegistry::new();
    let named = |name: &str| TypeSig::named("Tests", name);

    registry.register(
        TypeDefBuilder::class("Tests", "Tests.Base")
            .field("baseValue", PrimitiveKind::I4.into())
            .field("baseName", TypeSig::String)
            .build(),
    );
    registry.register(
        TypeDefBuilder::class("Tests", "Tests.Derived")
            .base(named("Tests.Base"))
            .field("extra", PrimitiveKind::I8.into())
            .build(),
    );
    registry.register(
        TypeDefBuilder::class("Tests", "Tests.Stack`1")
            .generic_params(1)
            .field("items", TypeSig::sz_array(TypeSig::GenericParam(0)))
            .field("count", PrimitiveKind::I4.into())
            .build(),
    );
    registry.register(
        TypeDefBuilder::structure("Tests", "Tests.Cell`1")
            .generic_params(1)
            .field("value", TypeSig::GenericParam(0))
            .build(),
    );
    registry.register(
        TypeDefBuilder::structure("Tests", "Tests.Pair")
            .field("key", PrimitiveKind::I4.into())
            .field("value", TypeSig::String)
            .build(),
    );
    registry.register(TypeDefBuilder::delegate("Tests", "Tests.Callback").build());
    registry.register(
        TypeDefBuilder::class("Tests", "Tests.Mixed")
            .field("flag", PrimitiveKind::U1.into())
            .field("name", TypeSig::String)
            .field("id", PrimitiveKind::I8.into())
            .field("tag", TypeSig::Object)
            .field("code", PrimitiveKind::I2.into())
            .build(),
    );
    registry.register(
        TypeDefBuilder::class("Tests", "Tests.Holder")
            .field("ready", PrimitiveKind::Boolean.into())
            .field("pair", named("Tests.Pair"))
            .field("pairs", TypeSig::sz_array(named("Tests.Pair")))
            .build(),
    );
    registry.register(
        TypeDefBuilder::enumeration("Tests", "Tests.Color", PrimitiveKind::U1).build(),
    );
    registry.register(
        TypeDefBuilder::class("Tests", "Tests.Node")
            .field("value", PrimitiveKind::I4.into())
            .field("next", named("Tests.Node"))
            .static_field("created", PrimitiveKind::I4.into())
            .build(),
    );
    registry.register(
        TypeDefBuilder::class("Tests", "Tests.Watcher")
            .field("onChange", named("Tests.Callback"))
            .field("myThreadId", PrimitiveKind::I4.into())
            .field("value", PrimitiveKind::I4.into())
            .build(),
    );
    registry.register(TypeDefBuilder::interface("Tests", "Tests.IClock").build());

    registry
}

fn node(identity: u64, value: i32, next: Value) -> Value {
    Value::Object(ObjectValue {
        ty: TypeSig::named("Tests", "Tests.Node"),
        identity: Identity(identity),
        fields: [("value", Value::i4(value)), ("next", next)]
            .into_iter()
            .collect(),
    })
}

// Two Tests.Node instances pointing at each other: a.next == b, b.next == a
pub(crate) fn cyclic_pair(a: u64, b: u64, a_value: i32, b_value: i32) -> Value {
    let back = Value::alias(TypeSig::named("Tests", "Tests.Node"), Identity(a));
    node(a, a_value, node(b, b_value, back))
}

// A null-terminated Tests.Node list with identities 1..=n
pub(crate) fn linked_nodes(values: &[i32]) -> Value {
    values
        .iter()
        .enumerate()
        .rev()
        .fold(Value::Null, |next, (index, &value)| {
            node(index as u64 + 1, value, next)
        })
}
