//! Raw byte access for compiled module images and their companion symbol files.
//!
//! [`File`] wraps a [`Backend`], either a read-only memory map of a file on disk
//! ([`physical::Physical`]) or an owned buffer ([`memory::Memory`]). The image reader only
//! ever sees a `&[u8]`, so both backends behave identically for parsing.
//!
//! # Key Components
//!
//! - [`File`] - The entry point, with [`File::from_file`] and [`File::from_mem`]
//! - [`parser::Parser`] - Cursor for decoding binary structures
//! - [`writer::BlobWriter`] - Append-only encoder used by all writers in this crate
//! - [`io`] - Little-endian primitive helpers shared by both directions
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::File;
//!
//! let file = File::from_mem(vec![b'D', b'P', b'M', b'I'])?;
//! assert_eq!(file.len(), 4);
//! assert_eq!(file.data_slice(1, 2)?, b"PM");
//! # Ok::<(), dotpatch::Error>(())
//! ```

pub mod io;
mod memory;
pub mod parser;
mod physical;
pub mod writer;

use std::path::Path;

use sha1::{Digest, Sha1};

use crate::{Error, Result};
use memory::Memory;
use physical::Physical;

/// Abstraction over the storage behind a [`File`].
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// A loaded module image or symbol file.
pub struct File {
    data: Box<dyn Backend>,
}

impl File {
    /// Memory-map a file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] if the file cannot be opened or mapped, and
    /// [`Error::Empty`] for a zero-length file.
    pub fn from_file(file: &Path) -> Result<File> {
        Self::load(Physical::new(file)?)
    }

    /// Take ownership of an in-memory buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] if `data` is empty.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        Self::load(Memory::new(data))
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Error::Empty);
        }

        Ok(File {
            data: Box::new(data),
        })
    }

    /// Returns the total size of the file.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the file has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// Returns the whole file contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Returns a bounds-checked slice of the file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if the range exceeds the file.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }

    /// SHA-1 digest of the whole file, used to detect byte-identical recompiles.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 20] {
        fingerprint(self.data())
    }
}

/// SHA-1 digest of a byte buffer.
#[must_use]
pub fn fingerprint(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}
