//! Process-wide module cache.
//!
//! A baseline module is loaded, parsed and indexed once, then shared as an
//! `Arc<LoadedModule>` for the lifetime of the engine. Candidates change every cycle and go
//! through [`ModuleCache::load_uncached`] instead.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;

use crate::{
    file::{fingerprint, File},
    metadata::{image::ModuleImage, index::ModuleIndex, symbols::DebugSymbols},
    Error, Result,
};

/// Extension of module images.
pub const MODULE_EXTENSION: &str = "dpmod";
/// Extension of companion symbol files.
pub const SYMBOLS_EXTENSION: &str = "dpdb";

/// Identity of a module file: its canonical path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIdentity {
    path: PathBuf,
}

impl ModuleIdentity {
    /// Identity of the module at `path`. The path is canonicalized when it exists, so two
    /// spellings of the same file share a cache entry.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        ModuleIdentity {
            path: path.canonicalize().unwrap_or_else(|_| path.to_path_buf()),
        }
    }

    /// The module file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The companion symbol file next to the module.
    #[must_use]
    pub fn symbols_path(&self) -> PathBuf {
        self.path.with_extension(SYMBOLS_EXTENSION)
    }
}

/// A parsed and indexed module.
#[derive(Debug)]
pub struct LoadedModule {
    /// The tables
    pub image: ModuleImage,
    /// Source documents and sequence points; empty if the module shipped without symbols
    pub symbols: DebugSymbols,
    /// The symbol index
    pub index: ModuleIndex,
    /// SHA-1 of the module file
    pub fingerprint: [u8; 20],
}

impl LoadedModule {
    /// Index an in-memory image. The fingerprint is taken over its serialized form.
    ///
    /// # Errors
    /// Fails if the image cannot be serialized or indexed.
    pub fn from_parts(image: ModuleImage, symbols: DebugSymbols) -> Result<LoadedModule> {
        let fingerprint = fingerprint(&image.to_bytes()?);
        let index = ModuleIndex::build(&image, &symbols)?;
        Ok(LoadedModule {
            image,
            symbols,
            index,
            fingerprint,
        })
    }

    /// Load the module and its optional symbol file from disk.
    ///
    /// # Errors
    /// Returns [`Error::ModuleLoad`] wrapping the underlying I/O or parse error.
    pub fn load(identity: &ModuleIdentity) -> Result<LoadedModule> {
        Self::load_inner(identity).map_err(|source| Error::ModuleLoad {
            path: identity.path().to_path_buf(),
            source: Box::new(source),
        })
    }

    fn load_inner(identity: &ModuleIdentity) -> Result<LoadedModule> {
        let file = File::from_file(identity.path())?;
        let image = ModuleImage::from_bytes(file.data())?;

        let symbols_path = identity.symbols_path();
        let symbols = if symbols_path.is_file() {
            let symbols_file = File::from_file(&symbols_path)?;
            DebugSymbols::read(symbols_file.data())?
        } else {
            log::debug!(
                "No symbols for {}, documents will be unknown",
                identity.path().display()
            );
            DebugSymbols::default()
        };

        let index = ModuleIndex::build(&image, &symbols)?;
        log::debug!(
            "Loaded {} ({} types, {} hookable functions)",
            identity.path().display(),
            index.types.len(),
            index.methods().count()
        );

        Ok(LoadedModule {
            image,
            symbols,
            index,
            fingerprint: file.fingerprint(),
        })
    }
}

/// Memoizes loaded modules by identity.
///
/// # Thread Safety
///
/// The cache is `Send + Sync`. Concurrent `get` calls for the same uncached identity may
/// both parse the file, but only the first result is stored and every caller receives the
/// stored instance.
#[derive(Debug, Default)]
pub struct ModuleCache {
    modules: DashMap<ModuleIdentity, Arc<LoadedModule>>,
}

impl ModuleCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached module, loading it on first request.
    ///
    /// # Errors
    /// Returns [`Error::ModuleLoad`] if the file is missing or corrupt. Failures are not
    /// cached.
    pub fn get(&self, identity: &ModuleIdentity) -> Result<Arc<LoadedModule>> {
        if let Some(module) = self.modules.get(identity) {
            return Ok(module.clone());
        }

        let loaded = Arc::new(LoadedModule::load(identity)?);
        Ok(self
            .modules
            .entry(identity.clone())
            .or_insert(loaded)
            .clone())
    }

    /// Loads a module without consulting or populating the cache.
    ///
    /// # Errors
    /// Returns [`Error::ModuleLoad`] if the file is missing or corrupt.
    pub fn load_uncached(&self, identity: &ModuleIdentity) -> Result<Arc<LoadedModule>> {
        Ok(Arc::new(LoadedModule::load(identity)?))
    }

    /// Registers an already loaded module. An existing entry wins.
    pub fn insert(&self, identity: ModuleIdentity, module: LoadedModule) -> Arc<LoadedModule> {
        self.modules
            .entry(identity)
            .or_insert_with(|| Arc::new(module))
            .clone()
    }

    /// Returns `true` if `identity` is cached.
    #[must_use]
    pub fn contains(&self, identity: &ModuleIdentity) -> bool {
        self.modules.contains_key(identity)
    }

    /// Number of cached modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Drops every cached module.
    pub fn clear(&self) {
        self.modules.clear();
    }
}
