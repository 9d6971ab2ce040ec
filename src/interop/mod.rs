//! The bridge between the native analysis engine and the managed type model.
//!
//! The native engine calls back into this crate whenever it needs to know where references
//! live inside an instance, or when it is about to compile a method and wants its IL
//! instrumented. Everything those callbacks need is carried by a [`BridgeContext`] created
//! once at startup and handed to the engine as an opaque pointer, so no process-wide state is
//! involved.
//!
//! # Key Components
//!
//! - [`crate::interop::BridgeContext`] - registry, instrumentation policy and attach state
//! - [`crate::interop::InstrumentationPolicy`] - the pluggable IL rewriting step
//! - [`crate::interop::NativeEngine`] - the receiving end of the callback registration
//! - [`crate::interop::shims`] - the `extern "C"` entry points handed to the engine
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use clrbridge::interop::BridgeContext;
//! use clrbridge::typesystem::{descriptor, PrimitiveKind, TypeRegistry, TypeSig};
//!
//! let registry = Arc::new(TypeRegistry::new());
//! let context = BridgeContext::new(registry.clone());
//!
//! let sig = TypeSig::sz_array(TypeSig::String);
//! let info = context.array_info(&descriptor::encode(&registry, &sig)?)?;
//! assert_eq!(info.element_size, 8);
//! assert_eq!(info.ref_offsets, [0]);
//!
//! let ints = descriptor::encode(&registry, &TypeSig::Primitive(PrimitiveKind::I4))?;
//! assert!(context.object_info(&ints)?.is_empty());
//! # Ok::<(), clrbridge::Error>(())
//! ```

mod context;
mod introspect;
mod native;
pub mod shims;

pub use context::{BridgeContext, BridgeSession, InstrumentationPolicy};
pub use introspect::{array_info, object_info, ArrayInfo};
#[cfg(feature = "native")]
pub use native::LinkedEngine;
pub use native::{
    ArrayInfoCallback, CallbackRegistration, InstrumentCallback, NativeEngine,
    ObjectInfoCallback,
};
