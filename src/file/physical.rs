//! Memory-mapped file backend.

use super::Backend;
use crate::{Error::FileError, Result};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A backend that maps a file on disk read-only into the address space.
///
/// Descriptor files are read once per replay and never modified, so a shared
/// read-only mapping avoids copying them into a heap buffer before parsing.
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Map the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped, and
    /// [`crate::Error::Malformed`] if it is empty.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(FileError)?;
        if file.metadata().map_err(FileError)?.len() == 0 {
            return Err(malformed_error!("File is empty - {}", path.display()));
        }

        // SAFETY: the mapping is read-only and the descriptor files are not expected to be
        // truncated while a replay is reading them.
        let mmap = unsafe { Mmap::map(&file) }.map_err(FileError)?;

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }
}
