use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    heap::{capture, HeapValue, ManagedHeap, Materializer},
    replay::{Completion, ManagedHost, TargetMethod, TestDescriptor},
    value::{Comparator, Value},
    Error, Result,
};

/// Switches for a replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Invoke descriptors flagged as intentional error cases
    pub reproduce_errors: bool,
    /// Compare the returned value with the expected one
    pub check_result: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        ReplayOptions {
            reproduce_errors: false,
            check_result: true,
        }
    }
}

impl ReplayOptions {
    /// Options for replaying one file on request.
    #[must_use]
    pub fn single(check_result: bool) -> Self {
        ReplayOptions {
            reproduce_errors: true,
            check_result,
        }
    }
}

/// Result of replaying one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The replay matched the recording
    Pass,
    /// The replay diverged
    Fail(String),
}

impl Outcome {
    /// True for [`Outcome::Pass`].
    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }
}

/// Replays recorded descriptors against a [`ManagedHost`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use clrbridge::heap::HeapValue;
/// use clrbridge::replay::{
///     AssemblyImage, Completion, MethodCatalog, MethodIdentity, Outcome, ReplayDriver,
///     ReplayOptions, TargetMethod, TestDescriptor,
/// };
/// use clrbridge::typesystem::{PrimitiveKind, TypeRegistry};
/// use clrbridge::value::Value;
///
/// let negate = MethodIdentity::new("Demo", "Demo.Math", "Negate", vec![PrimitiveKind::I4.into()]);
/// let catalog = MethodCatalog::new(Arc::new(TypeRegistry::new()));
/// catalog.add_assembly(AssemblyImage::new("Demo").with_method(
///     TargetMethod::static_method(negate.clone(), |call| {
///         let value = call.arg(0)?.as_i64().unwrap_or_default() as i32;
///         Ok(Completion::Returned(HeapValue::i4(value.wrapping_neg())))
///     }),
/// ));
///
/// let driver = ReplayDriver::new(&catalog, ReplayOptions::default());
/// let descriptor = TestDescriptor::new(negate, vec![Value::i4(5)], Value::i4(-5));
/// assert_eq!(driver.replay("Negate.vst", &descriptor)?, Outcome::Pass);
/// # Ok::<(), clrbridge::Error>(())
/// ```
pub struct ReplayDriver<'h> {
    host: &'h dyn ManagedHost,
    options: ReplayOptions,
}

impl<'h> ReplayDriver<'h> {
    /// A driver invoking methods through `host`.
    #[must_use]
    pub fn new(host: &'h dyn ManagedHost, options: ReplayOptions) -> Self {
        ReplayDriver { host, options }
    }

    /// The active options.
    #[must_use]
    pub fn options(&self) -> ReplayOptions {
        self.options
    }

    /// Replay one descriptor; `name` identifies it in diagnostics.
    ///
    /// # Errors
    /// Returns [`Error::UnexpectedException`] when the method throws something other than the
    /// expected exception, and resolution or materialization errors when the descriptor
    /// cannot be set up.
    pub fn replay(&self, name: &str, descriptor: &TestDescriptor) -> Result<Outcome> {
        log::info!("Starting test reproducing for method {}", descriptor.method);
        if !self.options.check_result {
            log::info!("Result check is disabled");
        }

        let method = self
            .host
            .resolve_method(&descriptor.method, &descriptor.search_paths)?;
        let heap = ManagedHeap::new();
        let (receiver, args) = self.prepare(&method, descriptor, &heap)?;
        let expected_exception = descriptor.exception.as_deref();

        if descriptor.is_error && !self.options.reproduce_errors {
            log::debug!("{} is an error case, not invoking {}", name, descriptor.method);
            return Ok(match expected_exception {
                Some(exception) => self.missing_exception(name, exception),
                None => self.check_result(name, &descriptor.expected, &Value::Null),
            });
        }

        match self.host.invoke(&method, receiver, args, &heap)? {
            Completion::Returned(returned) => {
                if let Some(exception) = expected_exception {
                    return Ok(self.missing_exception(name, exception));
                }
                if !self.options.check_result {
                    return Ok(Outcome::Pass);
                }

                let actual = capture(&heap, &returned)?;
                Ok(self.check_result(name, &descriptor.expected, &actual))
            }
            Completion::Threw(thrown) => {
                let cause = thrown.unwrap_invocation();
                match expected_exception {
                    Some(expected) if cause.type_name == expected => {
                        log::info!("Test {} throws the expected exception!", name);
                        Ok(Outcome::Pass)
                    }
                    _ => Err(Error::UnexpectedException {
                        test: name.to_string(),
                        thrown: cause.clone(),
                        expected: expected_exception.map(str::to_string),
                    }),
                }
            }
        }
    }

    // A suppressed error case produced nothing, so it is checked as if it returned null
    fn check_result(&self, name: &str, expected: &Value, actual: &Value) -> Outcome {
        if !self.options.check_result
            || Comparator::new(self.host.registry()).equal(expected, actual)
        {
            return Outcome::Pass;
        }

        log::error!(
            "Test {} failed! Expected {}, but got {}",
            name,
            expected,
            actual
        );
        Outcome::Fail(format!("Expected {expected}, but got {actual}"))
    }

    fn missing_exception(&self, name: &str, exception: &str) -> Outcome {
        log::error!(
            "Test {} failed! The expected exception {} was not thrown",
            name,
            exception
        );
        Outcome::Fail(format!("The expected exception {exception} was not thrown"))
    }

    // Receiver and arguments are materialized together so they share identities
    fn prepare(
        &self,
        method: &TargetMethod,
        descriptor: &TestDescriptor,
        heap: &ManagedHeap,
    ) -> Result<(HeapValue, Vec<HeapValue>)> {
        if descriptor.args.len() > method.parameters.len() {
            return Err(Error::InvalidValue(format!(
                "{} takes {} arguments, the descriptor passes {}",
                descriptor.method,
                method.parameters.len(),
                descriptor.args.len()
            )));
        }

        let receiver_value = match &descriptor.this {
            Some(this) if !method.is_static && !this.is_null() => Some(this),
            _ => None,
        };

        let mut slots = Vec::with_capacity(descriptor.args.len() + 1);
        if let Some(this) = receiver_value {
            slots.push((this, &method.declaring_type));
        }
        slots.extend(descriptor.args.iter().zip(&method.parameters));

        let mut materializer = Materializer::new(self.host.registry(), heap);
        let mut recorded = materializer.materialize_slots(&slots)?.into_iter();

        let receiver = match (method.is_static, receiver_value) {
            (true, _) => HeapValue::Null,
            (false, Some(_)) => recorded.next().unwrap_or(HeapValue::Null),
            (false, None) => materializer.create_instance(&method.declaring_type)?,
        };

        let mut args: Vec<HeapValue> = recorded.collect();
        for parameter in &method.parameters[args.len()..] {
            args.push(materializer.default_value(parameter)?);
        }

        Ok((receiver, args))
    }

    /// Replay `(name, descriptor)` pairs in order, halting at the first failure.
    ///
    /// Errors of any descriptor are reported and count as a failure. Returns true when every
    /// descriptor passed.
    pub fn replay_batch<I>(&self, descriptors: I) -> bool
    where
        I: IntoIterator<Item = (String, Result<TestDescriptor>)>,
    {
        for (name, descriptor) in descriptors {
            let outcome = descriptor.and_then(|descriptor| self.replay(&name, &descriptor));
            match outcome {
                Ok(Outcome::Pass) => log::info!("{} passed!", name),
                Ok(Outcome::Fail(_)) => return false,
                Err(error) => {
                    log::error!("Error ({}): {}", name, error);
                    return false;
                }
            }
        }
        true
    }

    /// Replay a single `.vst` file.
    pub fn replay_file(&self, path: &Path) -> bool {
        self.replay_batch([(file_name(path), TestDescriptor::from_file(path))])
    }

    /// Replay every `*.vst` file in `dir`, ordered by file name.
    ///
    /// Returns false when the directory holds no descriptors or cannot be read.
    pub fn replay_dir(&self, dir: &Path) -> bool {
        let tests = match descriptor_files(dir) {
            Ok(tests) => tests,
            Err(error) => {
                log::error!("Error ({}): {}", dir.display(), error);
                return false;
            }
        };

        if tests.is_empty() {
            log::error!("No *.vst tests found in {}", dir.display());
            return false;
        }

        self.replay_batch(
            tests
                .into_iter()
                .map(|path| (file_name(&path), TestDescriptor::from_file(&path))),
        )
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

fn descriptor_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut tests = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "vst") {
            tests.push(path);
        }
    }
    tests.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(tests)
}
