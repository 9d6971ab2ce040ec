use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! protocol_error {
    ($msg:expr) => {
        crate::Error::Protocol($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Protocol(format!($fmt, $($arg)*))
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Decoding Errors
/// - [`Error::Malformed`] - A type descriptor, method body or persisted document could not be decoded
/// - [`Error::OutOfBounds`] - A read would have run past the end of a buffer
///
/// ## Protocol Errors
/// - [`Error::Protocol`] - The native and managed sides disagree on a structure layout or a request
///   shape. Raised through the `extern "C"` entry points these abort the process, the safe API
///   returns them so they can be asserted on.
/// - [`Error::AlreadyAttached`] - A bridge context was registered with a native engine twice
///
/// ## Resolution Errors
/// - [`Error::TypeNotFound`], [`Error::AssemblyNotFound`], [`Error::MethodNotFound`]
/// - [`Error::InvalidValue`] - A recorded value does not fit the type it is materialized into
///
/// ## Replay Errors
/// - [`Error::UnexpectedException`] - An exception escaped a replayed method that was not the one
///   the descriptor expected
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::Json`] - Descriptor (de)serialization errors
///
/// # Examples
///
/// ```rust,no_run
/// use clrbridge::{Error, replay::TestDescriptor};
/// use std::path::Path;
///
/// match TestDescriptor::from_file(Path::new("Log2Floor.vst")) {
///     Ok(descriptor) => println!("replaying {}", descriptor.method),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed descriptor: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input is damaged and could not be decoded.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while decoding a buffer.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The native caller violated the bridge protocol.
    ///
    /// Signals that the native engine and this crate were built against incompatible
    /// structure layouts, or that a request was routed to the wrong entry point (an array
    /// type in the object query, a multi-dimensional array in the array query). These are
    /// never tolerated or partially handled.
    #[error("Protocol violation - {0}")]
    Protocol(String),

    /// The callbacks of a bridge context have already been handed to a native engine.
    #[error("Bridge context is already attached to a native engine")]
    AlreadyAttached,

    /// A type could not be found in the type registry.
    #[error("Failed to find type - {0}")]
    TypeNotFound(String),

    /// An assembly could not be found in the catalog or any of the search paths.
    #[error("Failed to resolve assembly - {0}")]
    AssemblyNotFound(String),

    /// A method could not be found in its declaring assembly.
    #[error("Failed to resolve method - {0}")]
    MethodNotFound(String),

    /// A recorded value can not be materialized as the requested type.
    #[error("Invalid value - {0}")]
    InvalidValue(String),

    /// A replayed method threw an exception that the descriptor did not expect.
    ///
    /// This is the observed exception re-raised to the caller of the replay driver. It
    /// is treated as evidence of a genuine defect in the code under test.
    #[error("Test {test} throws {thrown}{}", expected_suffix(.expected))]
    UnexpectedException {
        /// Name of the replayed descriptor
        test: String,
        /// The unwrapped exception thrown by the target method
        thrown: crate::replay::ManagedException,
        /// The exception type the descriptor expected, if any
        expected: Option<String>,
    },

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Descriptor (de)serialization error.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

fn expected_suffix(expected: &Option<String>) -> String {
    match expected {
        Some(name) => format!(" when the expected exception was {name}"),
        None => String::new(),
    }
}
