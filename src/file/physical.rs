//! Memory-mapped file backend.

use super::Backend;
use crate::{Error, Result};

use memmap2::Mmap;
use std::{fs, path::Path};

/// Read-only memory map of a file on disk.
#[derive(Debug)]
pub struct Physical {
    data: Option<Mmap>,
}

impl Physical {
    /// Map `path` into memory.
    ///
    /// Zero-length files cannot be mapped on every platform, so they are represented without a
    /// mapping and rejected later by [`super::File`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] if the file cannot be opened, [`Error::Error`] if mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Physical { data: None });
        }

        // The image files are produced by the toolchain and not modified while mapped
        let mmap = unsafe { Mmap::map(&file) }.map_err(|error| Error::Error(error.to_string()))?;

        Ok(Physical { data: Some(mmap) })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };

        if offset_end > self.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(&self.data()[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        match &self.data {
            Some(mmap) => mmap.as_ref(),
            None => &[],
        }
    }

    fn len(&self) -> usize {
        self.data().len()
    }
}
