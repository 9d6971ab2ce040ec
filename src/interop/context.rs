use std::{
    ffi::c_void,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    interop::{
        introspect::{self, ArrayInfo},
        native::{CallbackRegistration, NativeEngine},
        shims,
    },
    method::{InstrumentedMethodBody, RawMethodBody},
    typesystem::TypeRegistry,
    Error, Result,
};

/// Rewrites method bodies before the runtime compiles them.
///
/// Called concurrently from every thread the native engine compiles on.
pub trait InstrumentationPolicy: Send + Sync {
    /// Produce the instrumented form of `body`.
    ///
    /// # Errors
    /// Any error aborts the native call that requested the instrumentation.
    fn instrument(&self, body: &RawMethodBody) -> Result<InstrumentedMethodBody>;
}

/// Everything the native callbacks need, created once per process.
pub struct BridgeContext {
    registry: Arc<TypeRegistry>,
    policy: Option<Arc<dyn InstrumentationPolicy>>,
    attached: AtomicBool,
}

impl BridgeContext {
    /// Create a context over `registry` that leaves method bodies unchanged.
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        BridgeContext {
            registry,
            policy: None,
            attached: AtomicBool::new(false),
        }
    }

    /// Route instrumentation requests through `policy`.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn InstrumentationPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// The type registry queries are answered from.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Whether the callbacks have been handed to an engine.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Element size and reference offsets of the array type in `descriptor`.
    ///
    /// # Errors
    /// See [`introspect::array_info`].
    pub fn array_info(&self, descriptor: &[u8]) -> Result<ArrayInfo> {
        introspect::array_info(&self.registry, descriptor)
    }

    /// Reference offsets of an instance of the type in `descriptor`.
    ///
    /// # Errors
    /// See [`introspect::object_info`].
    pub fn object_info(&self, descriptor: &[u8]) -> Result<Vec<u32>> {
        introspect::object_info(&self.registry, descriptor)
    }

    /// Run `body` through the instrumentation policy.
    ///
    /// # Errors
    /// Returns whatever the policy returns.
    pub fn instrument(&self, body: &RawMethodBody) -> Result<InstrumentedMethodBody> {
        let instrumented = match &self.policy {
            Some(policy) => policy.instrument(body)?,
            None => body.unchanged(),
        };

        log::debug!(
            "Instrumented {:#010x} in {}: {} -> {} bytes, {} handlers, max stack {}",
            body.token,
            body.module_name,
            body.code.len(),
            instrumented.code.len(),
            instrumented.exception_handlers.len(),
            instrumented.max_stack
        );
        Ok(instrumented)
    }

    /// Hand the callbacks to `engine`.
    ///
    /// The returned session owns a reference to the context; keep it alive for as long as
    /// the engine may call back.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyAttached`] on the second call for the same context, and the
    /// engine's error if registration fails. A failed registration still counts as the
    /// context's one attempt.
    pub fn attach(self: &Arc<Self>, engine: &dyn NativeEngine) -> Result<BridgeSession> {
        if self.attached.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyAttached);
        }

        let registration = CallbackRegistration {
            context: Arc::as_ptr(self).cast::<c_void>(),
            array_info: shims::clrbridge_array_info,
            object_info: shims::clrbridge_object_info,
            instrument: Some(shims::clrbridge_instrument),
        };
        engine.register(registration)?;

        Ok(BridgeSession {
            context: Arc::clone(self),
        })
    }
}

/// A context whose callbacks are registered with a native engine.
pub struct BridgeSession {
    context: Arc<BridgeContext>,
}

impl BridgeSession {
    /// The attached context.
    #[must_use]
    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::method::SignatureTokens;

    struct Recorder(Mutex<Vec<*const c_void>>);

    impl NativeEngine for Recorder {
        fn register(&self, callbacks: CallbackRegistration) -> Result<()> {
            self.0.lock().unwrap().push(callbacks.context);
            Ok(())
        }
    }

    struct Nop;

    impl InstrumentationPolicy for Nop {
        fn instrument(&self, body: &RawMethodBody) -> Result<InstrumentedMethodBody> {
            let mut code = vec![0x00];
            code.extend_from_slice(&body.code);
            Ok(InstrumentedMethodBody {
                code,
                exception_handlers: Vec::new(),
                max_stack: body.max_stack + 1,
            })
        }
    }

    fn body() -> RawMethodBody {
        RawMethodBody {
            token: 0x0600_0001,
            assembly_name: "Tests".to_string(),
            module_name: "Tests.dll".to_string(),
            code: vec![0x16, 0x2A],
            exception_handlers: Vec::new(),
            max_stack: 1,
            signature_tokens: SignatureTokens::default(),
        }
    }

    #[test]
    fn attaches_once() {
        let context = Arc::new(BridgeContext::new(Arc::new(TypeRegistry::new())));
        let engine = Recorder(Mutex::new(Vec::new()));

        let session = context.attach(&engine).unwrap();
        assert!(context.is_attached());
        assert!(Arc::ptr_eq(session.context(), &context));
        assert!(matches!(context.attach(&engine), Err(Error::AlreadyAttached)));

        let registered = engine.0.lock().unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0], Arc::as_ptr(&context).cast::<c_void>());
    }

    #[test]
    fn instrumentation_policy() {
        let plain = BridgeContext::new(Arc::new(TypeRegistry::new()));
        assert_eq!(plain.instrument(&body()).unwrap(), body().unchanged());

        let rewriting = plain.with_policy(Arc::new(Nop));
        let instrumented = rewriting.instrument(&body()).unwrap();
        assert_eq!(instrumented.code, [0x00, 0x16, 0x2A]);
        assert_eq!(instrumented.max_stack, 2);
    }
}
