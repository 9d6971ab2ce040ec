//! Byte-level access for everything the bridge decodes.
//!
//! - [`crate::file::io`] - bounds-checked little-endian primitives
//! - [`crate::file::parser`] - cursor parser with compressed integers and prefixed strings
//! - [`crate::file::File`] - an immutable input buffer, either memory-mapped from disk or
//!   owned in memory
//!
//! # Examples
//!
//! ```rust,no_run
//! use clrbridge::file::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("tests/Log2Floor.vst"))?;
//! println!("{} bytes", file.len());
//! # Ok::<(), clrbridge::Error>(())
//! ```

pub mod io;
pub mod parser;
mod physical;

use std::path::{Path, PathBuf};

use crate::Result;
use physical::Physical;

/// Storage behind a [`File`].
pub trait Backend: Send + Sync {
    /// The full contents.
    fn data(&self) -> &[u8];

    /// Length of the contents in bytes.
    fn len(&self) -> usize {
        self.data().len()
    }
}

struct Memory {
    data: Vec<u8>,
}

impl Backend for Memory {
    fn data(&self) -> &[u8] {
        &self.data
    }
}

/// An immutable input buffer with an optional on-disk origin.
pub struct File {
    path: Option<PathBuf>,
    data: Box<dyn Backend>,
}

impl File {
    /// Memory-map `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped, and
    /// [`crate::Error::Malformed`] if it is empty.
    pub fn from_file(path: &Path) -> Result<File> {
        let physical = Physical::new(path)?;

        Ok(File {
            path: Some(path.to_path_buf()),
            data: Box::new(physical),
        })
    }

    /// Wrap an in-memory buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `data` is empty.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        if data.is_empty() {
            return Err(malformed_error!("Provided input was empty"));
        }

        Ok(File {
            path: None,
            data: Box::new(Memory { data }),
        })
    }

    /// The file's contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false; empty inputs are rejected on construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// The path this file was mapped from, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn from_mem() {
        let file = File::from_mem(vec![1, 2, 3]).unwrap();
        assert_eq!(file.len(), 3);
        assert_eq!(file.data(), &[1, 2, 3]);
        assert!(file.path().is_none());

        assert!(matches!(
            File::from_mem(Vec::new()),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn from_file_rejects_empty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            File::from_file(file.path()),
            Err(Error::Malformed { .. })
        ));
    }
}
