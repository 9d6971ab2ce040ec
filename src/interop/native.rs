use std::ffi::c_void;

use crate::Result;

/// Array layout callback.
///
/// Arguments: context, array instance, out instance id, out element size, out reference
/// offset count, out reference offsets, type descriptor, descriptor byte length.
pub type ArrayInfoCallback = unsafe extern "C" fn(
    *const c_void,
    *const c_void,
    *mut usize,
    *mut i32,
    *mut i32,
    *mut *const i32,
    *const u8,
    u64,
);

/// Object layout callback.
///
/// Arguments: context, instance, out instance id, out reference offset count, out
/// reference offsets, type descriptor, descriptor byte length.
pub type ObjectInfoCallback = unsafe extern "C" fn(
    *const c_void,
    *const c_void,
    *mut usize,
    *mut i32,
    *mut *const i32,
    *const u8,
    u64,
);

/// Instrumentation callback.
///
/// Arguments: context, method token, code size, assembly name byte length, module name byte
/// length, max stack, exception handler table size, signature token block size, signature
/// tokens, assembly name (UTF-16LE), module name (UTF-16LE), code, exception handlers, then
/// the outputs: code, code length, max stack, exception handlers, handler table length.
pub type InstrumentCallback = unsafe extern "C" fn(
    *const c_void,
    u32,
    u32,
    u32,
    u32,
    u32,
    u32,
    u32,
    *const u8,
    *const u8,
    *const u8,
    *const u8,
    *const u8,
    *mut *const u8,
    *mut i32,
    *mut i32,
    *mut *const u8,
    *mut i32,
);

/// The callbacks handed to the native engine at startup.
///
/// `context` must be passed back unchanged as the first argument of every callback.
#[derive(Debug, Clone, Copy)]
pub struct CallbackRegistration {
    /// Opaque pointer to the [`crate::interop::BridgeContext`]
    pub context: *const c_void,
    /// Array layout queries
    pub array_info: ArrayInfoCallback,
    /// Object layout queries
    pub object_info: ObjectInfoCallback,
    /// Instrumentation requests, absent when the engine should not instrument
    pub instrument: Option<InstrumentCallback>,
}

/// The native side of the bridge.
pub trait NativeEngine {
    /// Store the callbacks. Called once per [`crate::interop::BridgeContext`].
    ///
    /// # Errors
    /// Implementations report a failed registration through the returned error.
    fn register(&self, callbacks: CallbackRegistration) -> Result<()>;
}

#[cfg(feature = "native")]
mod linked {
    use std::ffi::c_void;

    use super::{
        ArrayInfoCallback, CallbackRegistration, InstrumentCallback, NativeEngine,
        ObjectInfoCallback,
    };
    use crate::Result;

    extern "C" {
        fn SyncInfoGettersPointers(
            context: *const c_void,
            array_info: ArrayInfoCallback,
            object_info: ObjectInfoCallback,
            instrument: Option<InstrumentCallback>,
        );
    }

    /// The engine library linked into the process.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct LinkedEngine;

    impl NativeEngine for LinkedEngine {
        fn register(&self, callbacks: CallbackRegistration) -> Result<()> {
            // SAFETY: the callbacks match the engine's declared signatures and the context
            // is kept alive by the caller's BridgeSession.
            unsafe {
                SyncInfoGettersPointers(
                    callbacks.context,
                    callbacks.array_info,
                    callbacks.object_info,
                    callbacks.instrument,
                );
            }
            Ok(())
        }
    }
}

#[cfg(feature = "native")]
pub use linked::LinkedEngine;
