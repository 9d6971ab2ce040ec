use std::{
    fmt,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{file::File, typesystem::TypeSig, value::Value, Result};

/// The method a descriptor replays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodIdentity {
    /// Declaring assembly
    pub assembly: String,
    /// Namespace-qualified name of the declaring type
    pub declaring_type: String,
    /// Method name
    pub name: String,
    /// Parameter types, used to tell overloads apart
    #[serde(default)]
    pub parameters: Vec<TypeSig>,
}

impl MethodIdentity {
    /// Identify `declaring_type::name(parameters)` in `assembly`.
    #[must_use]
    pub fn new(
        assembly: impl Into<String>,
        declaring_type: impl Into<String>,
        name: impl Into<String>,
        parameters: Vec<TypeSig>,
    ) -> Self {
        MethodIdentity {
            assembly: assembly.into(),
            declaring_type: declaring_type.into(),
            name: name.into(),
            parameters,
        }
    }
}

impl fmt::Display for MethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.declaring_type, self.name)?;
        for (index, parameter) in self.parameters.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{parameter}")?;
        }
        write!(f, ")")
    }
}

fn null() -> Value {
    Value::Null
}

/// A recorded test: the call to replay and the outcome to expect.
///
/// Persisted as JSON in `.vst` files.
///
/// # Examples
///
/// ```rust
/// use clrbridge::replay::TestDescriptor;
/// use clrbridge::value::Value;
///
/// let json = r#"{
///     "method": {
///         "assembly": "Tests",
///         "declaring_type": "Tests.BitOps",
///         "name": "Log2Floor",
///         "parameters": [{ "Primitive": "I4" }]
///     },
///     "args": [{ "primitive": { "kind": "I4", "bits": 256 } }],
///     "expected": { "primitive": { "kind": "I4", "bits": 8 } }
/// }"#;
///
/// let descriptor = TestDescriptor::from_json(json.as_bytes())?;
/// assert_eq!(descriptor.method.to_string(), "Tests.BitOps.Log2Floor(System.Int32)");
/// assert_eq!(descriptor.expected, Value::i4(8));
/// assert!(descriptor.exception.is_none());
/// # Ok::<(), clrbridge::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDescriptor {
    /// Target method
    pub method: MethodIdentity,
    /// Receiver; a default instance of the declaring type is created when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub this: Option<Value>,
    /// Arguments; omitted trailing parameters take their default values
    #[serde(default)]
    pub args: Vec<Value>,
    /// Expected return value
    #[serde(default = "null")]
    pub expected: Value,
    /// Full name of the exception type the call must throw
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    /// The recording marks the call as an intentional error case
    #[serde(default)]
    pub is_error: bool,
    /// Extra directories to probe for the declaring assembly
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

impl TestDescriptor {
    /// A descriptor calling `method` with `args` and expecting `expected`.
    #[must_use]
    pub fn new(method: MethodIdentity, args: Vec<Value>, expected: Value) -> Self {
        TestDescriptor {
            method,
            this: None,
            args,
            expected,
            exception: None,
            is_error: false,
            search_paths: Vec::new(),
        }
    }

    /// Expect the call to throw `exception` instead of returning.
    #[must_use]
    pub fn throws(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    /// Parse a descriptor from JSON.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `data` is not a valid descriptor.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let invalid =
            |error: serde_json::Error| malformed_error!("Invalid test descriptor - {}", error);

        // Object graphs nest several JSON levels per node, far past serde_json's default
        // limit, so the recursion guard is replaced by on-demand stack growth.
        let mut deserializer = serde_json::Deserializer::from_slice(data);
        deserializer.disable_recursion_limit();
        let descriptor = Self::deserialize(serde_stacker::Deserializer::new(&mut deserializer))
            .map_err(invalid)?;
        deserializer.end().map_err(invalid)?;
        Ok(descriptor)
    }

    /// Load a `.vst` file.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read and
    /// [`crate::Error::Malformed`] if it is empty or not a valid descriptor.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::from_file(path)?;
        Self::from_json(file.data())
    }

    /// Write the descriptor as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns [`crate::Error::Json`] if writing fails.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}
