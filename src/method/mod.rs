//! Method bodies exchanged with the native engine for instrumentation.
//!
//! The native engine hands over the IL of every method it is about to compile together with
//! its exception handler table, its maximum stack depth and the probe
//! [`SignatureTokens`] of the declaring module. An instrumentation policy rewrites the body
//! and the result travels back as an [`InstrumentedMethodBody`].
//!
//! # Key Components
//!
//! - [`crate::method::RawMethodBody`] - the decoded request
//! - [`crate::method::InstrumentedMethodBody`] - the policy's answer
//! - [`crate::method::SignatureTokens`] - fixed-size, versioned token block
//! - [`crate::method::ExceptionHandler`] - 24-byte handler records
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4.6 - Exception Handling

mod body;
mod exceptions;

pub use body::{
    InstrumentedMethodBody, RawMethodBody, SignatureTokens, SIGNATURE_TOKENS_VERSION,
    SIGNATURE_TOKEN_COUNT,
};
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags, EXCEPTION_HANDLER_SIZE};
