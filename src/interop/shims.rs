//! `extern "C"` entry points registered with the native engine.
//!
//! Each shim recovers the [`BridgeContext`] from the context pointer, answers the query and
//! writes its results through the caller's out pointers. Output buffers live in a per-thread
//! scratch area and stay valid until the next call on the same thread. Empty outputs are
//! dangling, never null.
//!
//! The native engine dereferences the outputs as soon as the call returns, so there is no
//! way to report a failure. Every error and every panic is logged and the process aborts.

use std::{
    cell::RefCell,
    ffi::c_void,
    panic::{self, AssertUnwindSafe},
    process, slice,
};

use crate::{interop::BridgeContext, method::RawMethodBody, Result};

#[derive(Default)]
struct Scratch {
    ref_offsets: Vec<i32>,
    code: Vec<u8>,
    ehs: Vec<u8>,
}

thread_local! {
    static SCRATCH: RefCell<Scratch> = RefCell::new(Scratch::default());
}

fn guarded<F>(entry: &str, f: F)
where
    F: FnOnce() -> Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            log::error!("{} failed: {}", entry, error);
            process::abort();
        }
        Err(_) => {
            log::error!("{} panicked", entry);
            process::abort();
        }
    }
}

unsafe fn context<'a>(ctx: *const c_void) -> Result<&'a BridgeContext> {
    ctx.cast::<BridgeContext>()
        .as_ref()
        .ok_or_else(|| protocol_error!("Null bridge context"))
}

unsafe fn input<'a, T>(ptr: *const T, len: usize, what: &str) -> Result<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(protocol_error!("{} is null but has length {}", what, len));
    }
    Ok(slice::from_raw_parts(ptr, len))
}

unsafe fn output<T>(ptr: *mut T, value: T, what: &str) -> Result<()> {
    if ptr.is_null() {
        return Err(protocol_error!("Output pointer for {} is null", what));
    }
    ptr.write(value);
    Ok(())
}

fn to_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| protocol_error!("{} of {} does not fit an i32", what, value))
}

fn to_len(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| protocol_error!("{} of {} is too large", what, value))
}

fn to_offsets(offsets: &[u32]) -> Result<Vec<i32>> {
    offsets
        .iter()
        .map(|&offset| to_i32(offset as usize, "Reference offset"))
        .collect()
}

// Stores the offsets in the thread's scratch area and publishes them
unsafe fn publish_offsets(
    offsets: Vec<i32>,
    len_out: *mut i32,
    offsets_out: *mut *const i32,
) -> Result<()> {
    let len = to_i32(offsets.len(), "Reference offset count")?;
    let ptr = SCRATCH.with(|scratch| {
        let mut scratch = scratch.borrow_mut();
        scratch.ref_offsets = offsets;
        scratch.ref_offsets.as_ptr()
    });

    output(len_out, len, "reference offset count")?;
    output(offsets_out, ptr, "reference offsets")
}

/// Array layout query.
///
/// # Safety
/// `ctx` must be the context pointer of a live [`crate::interop::BridgeSession`], `typ` must
/// point to `type_len` readable bytes, and every out pointer must be valid for writes.
pub unsafe extern "C" fn clrbridge_array_info(
    ctx: *const c_void,
    array: *const c_void,
    obj_id: *mut usize,
    elem_size: *mut i32,
    ref_offsets_len: *mut i32,
    ref_offsets: *mut *const i32,
    typ: *const u8,
    type_len: u64,
) {
    guarded("Array info", || {
        let context = context(ctx)?;
        let type_len = to_len(type_len, "Type descriptor length")?;
        let descriptor = input(typ, type_len, "Type descriptor")?;
        let info = context.array_info(descriptor)?;

        output(obj_id, array as usize, "instance id")?;
        output(elem_size, to_i32(info.element_size as usize, "Element size")?, "element size")?;
        publish_offsets(to_offsets(&info.ref_offsets)?, ref_offsets_len, ref_offsets)
    });
}

/// Object layout query.
///
/// # Safety
/// `ctx` must be the context pointer of a live [`crate::interop::BridgeSession`], `typ` must
/// point to `type_len` readable bytes, and every out pointer must be valid for writes.
pub unsafe extern "C" fn clrbridge_object_info(
    ctx: *const c_void,
    object: *const c_void,
    obj_id: *mut usize,
    ref_offsets_len: *mut i32,
    ref_offsets: *mut *const i32,
    typ: *const u8,
    type_len: u64,
) {
    guarded("Object info", || {
        let context = context(ctx)?;
        let type_len = to_len(type_len, "Type descriptor length")?;
        let descriptor = input(typ, type_len, "Type descriptor")?;
        let offsets = context.object_info(descriptor)?;

        output(obj_id, object as usize, "instance id")?;
        publish_offsets(to_offsets(&offsets)?, ref_offsets_len, ref_offsets)
    });
}

/// Instrumentation request.
///
/// # Safety
/// `ctx` must be the context pointer of a live [`crate::interop::BridgeSession`], every input
/// pointer must point to as many readable bytes as its length argument says, and every out
/// pointer must be valid for writes.
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn clrbridge_instrument(
    ctx: *const c_void,
    token: u32,
    code_size: u32,
    assembly_name_len: u32,
    module_name_len: u32,
    max_stack: u32,
    ehs_size: u32,
    signature_tokens_len: u32,
    signature_tokens: *const u8,
    assembly_name: *const u8,
    module_name: *const u8,
    code: *const u8,
    ehs: *const u8,
    body_out: *mut *const u8,
    body_len_out: *mut i32,
    max_stack_out: *mut i32,
    ehs_out: *mut *const u8,
    ehs_len_out: *mut i32,
) {
    guarded("Instrumentation", || {
        let context = context(ctx)?;
        let body = RawMethodBody::from_parts(
            token,
            input(assembly_name, assembly_name_len as usize, "Assembly name")?,
            input(module_name, module_name_len as usize, "Module name")?,
            input(code, code_size as usize, "Code")?,
            input(ehs, ehs_size as usize, "Exception handlers")?,
            max_stack,
            input(signature_tokens, signature_tokens_len as usize, "Signature tokens")?,
        )?;

        let instrumented = context.instrument(&body)?;
        let code_len = to_i32(instrumented.code.len(), "Code length")?;
        let result_max_stack = to_i32(instrumented.max_stack as usize, "Max stack")?;
        let ehs_bytes = instrumented.ehs_bytes();
        let ehs_len = to_i32(ehs_bytes.len(), "Exception handler table length")?;

        let (code_ptr, ehs_ptr) = SCRATCH.with(|scratch| {
            let mut scratch = scratch.borrow_mut();
            scratch.code = instrumented.code;
            scratch.ehs = ehs_bytes;
            (scratch.code.as_ptr(), scratch.ehs.as_ptr())
        });

        output(body_out, code_ptr, "code")?;
        output(body_len_out, code_len, "code length")?;
        output(max_stack_out, result_max_stack, "max stack")?;
        output(ehs_out, ehs_ptr, "exception handlers")?;
        output(ehs_len_out, ehs_len, "exception handler table length")
    });
}
