//! Native bridge tests.
//!
//! The callbacks are driven the way the native engine drives them: through the function
//! pointers and the opaque context pointer handed over at registration.

use std::{
    cell::Cell,
    ffi::c_void,
    ptr, slice,
    sync::Arc,
    thread,
};

use clrbridge::{
    interop::{self, shims, CallbackRegistration},
    prelude::*,
    typesystem::descriptor::encode,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Keeps whatever the bridge registers.
#[derive(Default)]
struct RecordingEngine {
    registration: Cell<Option<CallbackRegistration>>,
}

impl NativeEngine for RecordingEngine {
    fn register(&self, callbacks: CallbackRegistration) -> Result<()> {
        self.registration.set(Some(callbacks));
        Ok(())
    }
}

struct RefusingEngine;

impl NativeEngine for RefusingEngine {
    fn register(&self, _: CallbackRegistration) -> Result<()> {
        Err(Error::Protocol("engine is shutting down".to_string()))
    }
}

/// Replaces every body with a single `ret` and raises the stack depth by one.
struct ReturnImmediately;

impl InstrumentationPolicy for ReturnImmediately {
    fn instrument(&self, body: &RawMethodBody) -> Result<InstrumentedMethodBody> {
        Ok(InstrumentedMethodBody {
            code: vec![0x2A],
            exception_handlers: Vec::new(),
            max_stack: body.max_stack + 1,
        })
    }
}

fn registry() -> TypeRegistry {
    let registry = TypeRegistry::new();
    registry.register(
        TypeDefBuilder::class("Tests", "Tests.Node")
            .field("value", PrimitiveKind::I4.into())
            .field("next", TypeSig::named("Tests", "Tests.Node"))
            .field("label", TypeSig::String)
            .build(),
    );
    registry.register(
        TypeDefBuilder::enumeration("Tests", "Tests.Color", PrimitiveKind::U1).build(),
    );
    registry
}

fn node() -> TypeSig {
    TypeSig::named("Tests", "Tests.Node")
}

fn utf16(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn attach(context: BridgeContext) -> Result<(BridgeSession, CallbackRegistration)> {
    let engine = RecordingEngine::default();
    let session = Arc::new(context).attach(&engine)?;
    let registration = engine
        .registration
        .take()
        .ok_or_else(|| Error::Protocol("nothing registered".to_string()))?;
    Ok((session, registration))
}

unsafe fn query_object(
    registration: &CallbackRegistration,
    instance: usize,
    descriptor: &[u8],
) -> (usize, Vec<i32>) {
    let mut obj_id = 0_usize;
    let mut len = -1_i32;
    let mut offsets: *const i32 = ptr::null();
    (registration.object_info)(
        registration.context,
        instance as *const c_void,
        &mut obj_id,
        &mut len,
        &mut offsets,
        descriptor.as_ptr(),
        descriptor.len() as u64,
    );
    (obj_id, slice::from_raw_parts(offsets, len as usize).to_vec())
}

/// The registered context pointer leads back to the attached context.
#[test]
fn test_registration_points_at_the_context() -> Result<()> {
    init();
    let (session, registration) = attach(BridgeContext::new(Arc::new(registry())))?;

    assert_eq!(
        registration.context,
        Arc::as_ptr(session.context()).cast::<c_void>()
    );
    assert!(registration.instrument.is_some());
    assert!(session.context().is_attached());
    Ok(())
}

/// A context attaches once, even when the first attempt failed.
#[test]
fn test_single_attachment() {
    init();
    let context = Arc::new(BridgeContext::new(Arc::new(registry())));

    assert!(matches!(
        context.attach(&RefusingEngine),
        Err(Error::Protocol(_))
    ));
    assert!(matches!(
        context.attach(&RecordingEngine::default()),
        Err(Error::AlreadyAttached)
    ));
}

/// Layout queries through the registered function pointers.
#[test]
fn test_layout_queries_through_callbacks() -> Result<()> {
    init();
    let (session, registration) = attach(BridgeContext::new(Arc::new(registry())))?;
    let types = session.context().registry();

    let strings = encode(types, &TypeSig::sz_array(TypeSig::String))?;
    let mut obj_id = 0_usize;
    let mut elem_size = 0_i32;
    let mut len = -1_i32;
    let mut offsets: *const i32 = ptr::null();
    unsafe {
        (registration.array_info)(
            registration.context,
            0x2000 as *const c_void,
            &mut obj_id,
            &mut elem_size,
            &mut len,
            &mut offsets,
            strings.as_ptr(),
            strings.len() as u64,
        );
        assert_eq!(slice::from_raw_parts(offsets, len as usize), [0]);
    }
    assert_eq!(obj_id, 0x2000);
    assert_eq!(elem_size, 8);

    let descriptor = encode(types, &node())?;
    let expected: Vec<i32> = interop::object_info(types, &descriptor)?
        .into_iter()
        .map(|offset| offset as i32)
        .collect();
    let (obj_id, offsets) = unsafe { query_object(&registration, 0x3000, &descriptor) };
    assert_eq!(obj_id, 0x3000);
    assert_eq!(offsets.len(), 2);
    assert_eq!(offsets, expected);

    let color = encode(types, &TypeSig::named("Tests", "Tests.Color"))?;
    let (_, offsets) = unsafe { query_object(&registration, 0x4000, &color) };
    assert!(offsets.is_empty());
    Ok(())
}

/// Object queries from many threads at once, each reading its own output buffer.
#[test]
fn test_concurrent_object_queries() -> Result<()> {
    init();
    let context = BridgeContext::new(Arc::new(registry()));
    let descriptor = encode(context.registry(), &node())?;
    let expected = context.registry().layout(&node())?.ref_offsets.clone();

    thread::scope(|scope| {
        for worker in 0..8_usize {
            let context = &context;
            let descriptor = &descriptor;
            let expected = &expected;
            scope.spawn(move || {
                for round in 0..100_usize {
                    let instance = (worker << 16) | (round + 1);
                    let mut obj_id = 0_usize;
                    let mut len = -1_i32;
                    let mut offsets: *const i32 = ptr::null();
                    unsafe {
                        shims::clrbridge_object_info(
                            ptr::from_ref(context).cast(),
                            instance as *const c_void,
                            &mut obj_id,
                            &mut len,
                            &mut offsets,
                            descriptor.as_ptr(),
                            descriptor.len() as u64,
                        );
                        let offsets: Vec<u32> = slice::from_raw_parts(offsets, len as usize)
                            .iter()
                            .map(|&offset| offset as u32)
                            .collect();
                        assert_eq!(&offsets, expected);
                    }
                    assert_eq!(obj_id, instance);
                }
            });
        }
    });

    assert_eq!(context.registry().cached_layouts(), 1);
    Ok(())
}

/// Instrumentation requests go through the configured policy.
#[test]
fn test_instrumentation_policy_through_callback() -> Result<()> {
    init();
    let context =
        BridgeContext::new(Arc::new(registry())).with_policy(Arc::new(ReturnImmediately));
    let (_session, registration) = attach(context)?;
    let instrument = registration
        .instrument
        .ok_or_else(|| Error::Protocol("no instrumentation callback".to_string()))?;

    let tokens = SignatureTokens::default().to_bytes();
    let assembly = utf16("Tests");
    let module = utf16("Tests.dll");
    let code = [0x00_u8, 0x00, 0x2A];
    let ehs = ExceptionHandler::write_table(&[ExceptionHandler {
        flags: ExceptionHandlerFlags::FAULT,
        try_offset: 0,
        try_length: 1,
        handler_offset: 1,
        handler_length: 1,
        class_token_or_filter: 0,
    }]);

    let mut body: *const u8 = ptr::null();
    let mut body_len = 0_i32;
    let mut max_stack = 0_i32;
    let mut ehs_out: *const u8 = ptr::null();
    let mut ehs_len = -1_i32;
    unsafe {
        instrument(
            registration.context,
            0x0600_0001,
            code.len() as u32,
            assembly.len() as u32,
            module.len() as u32,
            2,
            ehs.len() as u32,
            tokens.len() as u32,
            tokens.as_ptr(),
            assembly.as_ptr(),
            module.as_ptr(),
            code.as_ptr(),
            ehs.as_ptr(),
            &mut body,
            &mut body_len,
            &mut max_stack,
            &mut ehs_out,
            &mut ehs_len,
        );
        assert_eq!(slice::from_raw_parts(body, body_len as usize), [0x2A]);
    }
    assert_eq!(max_stack, 3);
    assert_eq!(ehs_len, 0);
    assert!(!ehs_out.is_null());
    Ok(())
}

/// Both sides must agree on the size of the probe signature token block.
#[test]
fn test_signature_token_size_mismatch() {
    init();
    let tokens = SignatureTokens::default().to_bytes();

    let short = RawMethodBody::from_parts(
        0x0600_0001,
        &utf16("Tests"),
        &utf16("Tests.dll"),
        &[0x2A],
        &[],
        1,
        &tokens[..tokens.len() - 4],
    );
    assert!(matches!(short, Err(Error::Protocol(_))));

    let exact = RawMethodBody::from_parts(
        0x0600_0001,
        &utf16("Tests"),
        &utf16("Tests.dll"),
        &[0x2A],
        &[],
        1,
        &tokens,
    );
    assert!(matches!(exact, Ok(body) if body.module_name == "Tests.dll"));
}
