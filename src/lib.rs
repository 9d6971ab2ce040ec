// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
// - 'file/physical.rs' uses mmap to map a file into memory
// - 'interop/shims.rs' reads and writes through pointers handed over by the native engine

//! # clrbridge
//!
//! The runtime bridge between a native concolic execution engine and a managed program under
//! test, together with the engine that replays recorded tests and judges their outcome.
//!
//! ## Features
//!
//! - **Layout introspection** - byte offsets of every reference inside an instance or array
//!   element, answered from a concurrent, memoized layout cache
//! - **Method body transport** - IL, exception handler tables and the versioned probe token
//!   block, validated on every call
//! - **Structural comparison** - identity-aware equality over cyclic value graphs
//! - **Deterministic replay** - recorded `.vst` descriptors rebuilt, invoked and judged
//!
//! ## Quick Start
//!
//! ```rust
//! use clrbridge::prelude::*;
//!
//! let registry = TypeRegistry::new();
//! registry.register(
//!     TypeDefBuilder::class("Tests", "Tests.Node")
//!         .field("value", PrimitiveKind::I4.into())
//!         .field("next", TypeSig::named("Tests", "Tests.Node"))
//!         .build(),
//! );
//!
//! let list = Value::Object(ObjectValue {
//!     ty: TypeSig::named("Tests", "Tests.Node"),
//!     identity: Identity(1),
//!     fields: [
//!         ("value", Value::i4(1)),
//!         ("next", Value::alias(TypeSig::named("Tests", "Tests.Node"), Identity(1))),
//!     ]
//!     .into_iter()
//!     .collect(),
//! });
//!
//! assert!(equal(&registry, &list, &list.clone()));
//! assert_eq!(list.to_string(), "Tests.Node#1 { value: 1, next: Tests.Node#1 }");
//! ```
//!
//! ## Architecture
//!
//! - [`typesystem`] - runtime types, the binary type descriptor and instance layouts
//! - [`value`] - recorded value graphs and the structural comparator
//! - [`heap`] - live instances, built from and captured back into value graphs
//! - [`method`] - method bodies exchanged for instrumentation
//! - [`interop`] - the context, callbacks and `extern "C"` shims of the native bridge
//! - [`replay`] - descriptors, the managed host and the replay driver
//! - [`file`] - byte-level input handling
//! - [`Error`] and [`Result`] - error handling
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`] facade. Replay progress is reported at `info`,
//! failures at `error`, layout and probing details at `debug` and `trace`. No logger is
//! installed by the library.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Byte-level input handling: little-endian primitives, a cursor parser and memory-mapped
/// files.
pub mod file;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use clrbridge::prelude::*;
///
/// let registry = TypeRegistry::new();
/// assert!(equal(&registry, &Value::i4(8), &Value::i4(8)));
/// ```
pub mod prelude;

pub mod typesystem;

pub mod value;

pub mod heap;

pub mod method;

pub mod interop;

pub mod replay;

/// `clrbridge` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `clrbridge` Error type
///
/// Every fallible operation of the crate reports one of its variants.
pub use error::Error;
