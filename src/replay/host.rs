use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;

use crate::{
    heap::{HeapValue, ManagedHeap},
    replay::MethodIdentity,
    typesystem::{TypeRegistry, TypeSig},
    Error, Result,
};

/// Exception type wrapping everything thrown by a reflectively invoked method.
pub const TARGET_INVOCATION_EXCEPTION: &str = "System.Reflection.TargetInvocationException";

/// An exception thrown by managed code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedException {
    /// Full name of the exception type
    pub type_name: String,
    /// Exception message
    pub message: String,
    /// The exception that caused this one
    pub inner: Option<Box<ManagedException>>,
}

impl ManagedException {
    /// An exception of `type_name` without a cause.
    #[must_use]
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        ManagedException {
            type_name: type_name.into(),
            message: message.into(),
            inner: None,
        }
    }

    /// Wrap the exception the way a reflective invocation reports it.
    #[must_use]
    pub fn into_invocation_exception(self) -> Self {
        ManagedException {
            type_name: TARGET_INVOCATION_EXCEPTION.to_string(),
            message: "Exception has been thrown by the target of an invocation.".to_string(),
            inner: Some(Box::new(self)),
        }
    }

    /// The exception behind the single wrapper added by reflective invocation.
    ///
    /// Only one layer is removed, so a method that itself throws a
    /// `TargetInvocationException` is still reported as such.
    #[must_use]
    pub fn unwrap_invocation(&self) -> &ManagedException {
        match &self.inner {
            Some(inner) if self.type_name == TARGET_INVOCATION_EXCEPTION => inner,
            _ => self,
        }
    }
}

impl fmt::Display for ManagedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)?;
        if let Some(inner) = &self.inner {
            write!(f, " ---> {inner}")?;
        }
        Ok(())
    }
}

/// How a managed call finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The call returned; [`HeapValue::Null`] for `void` methods
    Returned(HeapValue),
    /// The call threw
    Threw(ManagedException),
}

impl Completion {
    /// Throw a new exception of `type_name`.
    #[must_use]
    pub fn throw(type_name: &str, message: &str) -> Self {
        Completion::Threw(ManagedException::new(type_name, message))
    }
}

/// The state a method body runs against.
pub struct Invocation<'a> {
    /// Heap holding the receiver and the arguments
    pub heap: &'a ManagedHeap,
    /// Type definitions of the host
    pub registry: &'a TypeRegistry,
    /// `this`, [`HeapValue::Null`] for static methods
    pub receiver: HeapValue,
    /// Arguments in parameter order
    pub args: Vec<HeapValue>,
}

impl Invocation<'_> {
    /// Argument `index`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidValue`] if there is no such argument.
    pub fn arg(&self, index: usize) -> Result<&HeapValue> {
        self.args.get(index).ok_or_else(|| {
            Error::InvalidValue(format!(
                "argument {} requested, {} passed",
                index,
                self.args.len()
            ))
        })
    }
}

type MethodImpl = dyn Fn(&Invocation<'_>) -> Result<Completion> + Send + Sync;

/// A resolved, invocable method.
#[derive(Clone)]
pub struct TargetMethod {
    /// The method's identity
    pub identity: MethodIdentity,
    /// The declaring type
    pub declaring_type: TypeSig,
    /// Whether the method takes no receiver
    pub is_static: bool,
    /// Parameter types
    pub parameters: Vec<TypeSig>,
    /// Return type, `None` for `void`
    pub return_type: Option<TypeSig>,
    body: Arc<MethodImpl>,
}

impl TargetMethod {
    fn new<F>(identity: MethodIdentity, is_static: bool, body: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<Completion> + Send + Sync + 'static,
    {
        TargetMethod {
            declaring_type: TypeSig::named(&identity.assembly, &identity.declaring_type),
            parameters: identity.parameters.clone(),
            identity,
            is_static,
            return_type: None,
            body: Arc::new(body),
        }
    }

    /// A static method running `body`.
    #[must_use]
    pub fn static_method<F>(identity: MethodIdentity, body: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<Completion> + Send + Sync + 'static,
    {
        Self::new(identity, true, body)
    }

    /// An instance method running `body`.
    #[must_use]
    pub fn instance_method<F>(identity: MethodIdentity, body: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<Completion> + Send + Sync + 'static,
    {
        Self::new(identity, false, body)
    }

    /// Set the return type.
    #[must_use]
    pub fn returns(mut self, return_type: TypeSig) -> Self {
        self.return_type = Some(return_type);
        self
    }

    /// Set the declaring type, for methods of generic instantiations.
    #[must_use]
    pub fn declared_by(mut self, declaring_type: TypeSig) -> Self {
        self.declaring_type = declaring_type;
        self
    }

    /// Run the body.
    ///
    /// # Errors
    /// Returns the body's host-side errors; managed exceptions are a [`Completion::Threw`].
    pub fn call(&self, invocation: &Invocation<'_>) -> Result<Completion> {
        (self.body)(invocation)
    }
}

impl fmt::Debug for TargetMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetMethod")
            .field("identity", &self.identity)
            .field("declaring_type", &self.declaring_type)
            .field("is_static", &self.is_static)
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}

/// The methods of one loaded assembly.
#[derive(Debug, Clone, Default)]
pub struct AssemblyImage {
    name: String,
    methods: Vec<TargetMethod>,
}

impl AssemblyImage {
    /// An assembly without methods.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        AssemblyImage {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Add `method`.
    #[must_use]
    pub fn with_method(mut self, method: TargetMethod) -> Self {
        self.methods.push(method);
        self
    }

    /// The assembly name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The method with exactly this identity.
    #[must_use]
    pub fn method(&self, identity: &MethodIdentity) -> Option<&TargetMethod> {
        self.methods.iter().find(|method| method.identity == *identity)
    }
}

/// Loads an assembly image from a file found while probing the search paths.
pub trait AssemblyLoader: Send + Sync {
    /// Load the assembly stored at `path`.
    ///
    /// # Errors
    /// Implementations report unreadable or invalid images.
    fn load(&self, path: &Path) -> Result<AssemblyImage>;
}

impl<F> AssemblyLoader for F
where
    F: Fn(&Path) -> Result<AssemblyImage> + Send + Sync,
{
    fn load(&self, path: &Path) -> Result<AssemblyImage> {
        self(path)
    }
}

/// The runtime replayed methods execute in.
pub trait ManagedHost {
    /// Type definitions known to the host.
    fn registry(&self) -> &TypeRegistry;

    /// Find `method`, loading its assembly from `search_paths` if needed.
    ///
    /// # Errors
    /// Returns [`Error::AssemblyNotFound`] or [`Error::MethodNotFound`].
    fn resolve_method(&self, method: &MethodIdentity, search_paths: &[PathBuf])
        -> Result<TargetMethod>;

    /// Call `method` reflectively; a thrown exception arrives wrapped in a
    /// [`TARGET_INVOCATION_EXCEPTION`].
    ///
    /// # Errors
    /// Returns host-side failures; managed exceptions are a [`Completion::Threw`].
    fn invoke(
        &self,
        method: &TargetMethod,
        receiver: HeapValue,
        args: Vec<HeapValue>,
        heap: &ManagedHeap,
    ) -> Result<Completion> {
        let invocation = Invocation {
            heap,
            registry: self.registry(),
            receiver,
            args,
        };

        Ok(match method.call(&invocation)? {
            Completion::Threw(exception) => {
                Completion::Threw(exception.into_invocation_exception())
            }
            returned => returned,
        })
    }
}

/// An in-process [`ManagedHost`] over registered and on-demand loaded assemblies.
pub struct MethodCatalog {
    registry: Arc<TypeRegistry>,
    assemblies: DashMap<String, Arc<AssemblyImage>>,
    loader: Option<Box<dyn AssemblyLoader>>,
}

impl MethodCatalog {
    /// An empty catalog over `registry`.
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        MethodCatalog {
            registry,
            assemblies: DashMap::new(),
            loader: None,
        }
    }

    /// Load missing assemblies through `loader`.
    #[must_use]
    pub fn with_loader(mut self, loader: impl AssemblyLoader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    /// Register an assembly up front.
    pub fn add_assembly(&self, image: AssemblyImage) {
        self.assemblies
            .insert(image.name().to_string(), Arc::new(image));
    }

    /// The assembly called `name`, probing `<dir>/<name>.dll` in every search path in order
    /// when it is not registered yet.
    ///
    /// # Errors
    /// Returns [`Error::AssemblyNotFound`] when no search path holds the file, and the
    /// loader's error when the file is found but cannot be loaded.
    pub fn assembly(&self, name: &str, search_paths: &[PathBuf]) -> Result<Arc<AssemblyImage>> {
        if let Some(image) = self.assemblies.get(name) {
            return Ok(image.value().clone());
        }

        let Some(loader) = &self.loader else {
            return Err(Error::AssemblyNotFound(name.to_string()));
        };

        let file_name = format!("{name}.dll");
        for dir in search_paths {
            let candidate = dir.join(&file_name);
            if !candidate.is_file() {
                log::trace!("{} not found in {}", file_name, dir.display());
                continue;
            }

            log::debug!("Loading assembly {} from {}", name, candidate.display());
            let image = Arc::new(loader.load(&candidate)?);
            self.assemblies.insert(name.to_string(), image.clone());
            return Ok(image);
        }

        Err(Error::AssemblyNotFound(name.to_string()))
    }
}

impl ManagedHost for MethodCatalog {
    fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    fn resolve_method(
        &self,
        method: &MethodIdentity,
        search_paths: &[PathBuf],
    ) -> Result<TargetMethod> {
        self.assembly(&method.assembly, search_paths)?
            .method(method)
            .cloned()
            .ok_or_else(|| Error::MethodNotFound(method.to_string()))
    }
}
