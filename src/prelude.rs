//! # clrbridge Prelude
//!
//! The types most code working with the bridge or the replay engine needs.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all clrbridge operations
pub use crate::Error;

/// The result type used throughout clrbridge
pub use crate::Result;

// ================================================================================================
// Type System
// ================================================================================================

pub use crate::typesystem::{
    PrimitiveKind, TypeDef, TypeDefBuilder, TypeDescriptor, TypeKind, TypeLayout, TypeName,
    TypeRegistry, TypeSig,
};

// ================================================================================================
// Values and Comparison
// ================================================================================================

pub use crate::value::{
    equal, ArrayValue, Comparator, Dimension, EnumValue, FieldMap, Identity, MockMethod,
    MockValue, ObjectValue, Primitive, StructValue, Value,
};

// ================================================================================================
// Live Instances
// ================================================================================================

pub use crate::heap::{capture, HeapRef, HeapValue, ManagedHeap, Materializer};

// ================================================================================================
// Native Bridge
// ================================================================================================

pub use crate::interop::{BridgeContext, BridgeSession, InstrumentationPolicy, NativeEngine};
pub use crate::method::{
    ExceptionHandler, ExceptionHandlerFlags, InstrumentedMethodBody, RawMethodBody,
    SignatureTokens,
};

// ================================================================================================
// Replay
// ================================================================================================

pub use crate::replay::{
    Completion, ManagedException, ManagedHost, MethodCatalog, MethodIdentity, Outcome,
    ReplayDriver, ReplayOptions, TargetMethod, TestDescriptor,
};
