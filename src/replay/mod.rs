//! Deterministic replay of recorded tests.
//!
//! A [`TestDescriptor`] names a method, the receiver and arguments it was called with and the
//! outcome that was observed: a return value or an exception type. The [`ReplayDriver`]
//! rebuilds the inputs on a fresh [`crate::heap::ManagedHeap`], invokes the method through a
//! [`ManagedHost`] and judges the result with the structural comparator.
//!
//! # Key Components
//!
//! - [`crate::replay::TestDescriptor`] / [`crate::replay::MethodIdentity`] - the persisted `.vst` form
//! - [`crate::replay::ManagedHost`] - method resolution and reflective invocation
//! - [`crate::replay::MethodCatalog`] - in-process host with search-path assembly probing
//! - [`crate::replay::ReplayDriver`] - per-descriptor state machine and fail-fast batches
//!
//! # Outcomes
//!
//! | Observed | Expected exception | Result |
//! |---|---|---|
//! | returned, equal value | none | pass |
//! | returned, different value | none | fail with both values |
//! | returned | `E` | fail, `E` was not thrown |
//! | threw `E` | `E` | pass |
//! | threw `F` | `E` or none | [`crate::Error::UnexpectedException`] |

mod descriptor;
mod driver;
mod host;

pub use descriptor::{MethodIdentity, TestDescriptor};
pub use driver::{Outcome, ReplayDriver, ReplayOptions};
pub use host::{
    AssemblyImage, AssemblyLoader, Completion, Invocation, ManagedException, ManagedHost,
    MethodCatalog, TargetMethod, TARGET_INVOCATION_EXCEPTION,
};
