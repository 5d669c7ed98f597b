//! Installing a generation of hooks.
//!
//! The patch pipeline describes functions symbolically (assembly, owning type, signature
//! key). Only the host runtime can turn such a description into an [`EntryPoint`], so it
//! plugs in a [`MethodResolver`]. [`HookInstaller::install`] resolves both sides of every
//! [`HookPair`] and redirects through a [`HookRegistry`]. A pair that cannot be resolved or
//! redirected is logged and skipped; the rest of the generation is still installed.
//!
//! Baseline functions are resolved once per process: when the installer knows the
//! [`ModuleIndex`] of an assembly (see [`HookInstaller::with_index`]) the entry point is
//! cached on the function's [`crate::metadata::index::MethodRecord`] and reused by every
//! later generation.
//!
//! # Examples
//!
//! ```rust
//! use std::{collections::HashMap, sync::Arc};
//! use dotpatch::{
//!     hook::{EntryPoint, HookInstaller, HookPair, HookRegistry, MethodDescriptor, MethodResolver, SlotPatcher},
//!     Error, Result,
//! };
//!
//! struct Table(HashMap<MethodDescriptor, EntryPoint>);
//!
//! impl MethodResolver for Table {
//!     fn resolve(&self, method: &MethodDescriptor) -> Result<EntryPoint> {
//!         self.0
//!             .get(method)
//!             .copied()
//!             .ok_or_else(|| Error::Error(format!("{method} is not loaded")))
//!     }
//! }
//!
//! let original = MethodDescriptor::new("Game", "Game.T", "System.Int32 M()");
//! let replacement = MethodDescriptor::new("Game_patch_1", "Game.T", "System.Int32 M()");
//! let resolver = Table(HashMap::from([
//!     (original.clone(), EntryPoint(0x1000)),
//!     (replacement.clone(), EntryPoint(0x2000)),
//! ]));
//!
//! let patcher = Arc::new(SlotPatcher::new());
//! let registry = HookRegistry::new(patcher.clone());
//! let summary = HookInstaller::new(&registry, &resolver)
//!     .install(&[HookPair { original, replacement }], "patch-1");
//!
//! assert_eq!(summary.installed.len(), 1);
//! assert_eq!(patcher.dispatch(EntryPoint(0x1000)), EntryPoint(0x2000));
//! ```

use std::fmt;

use crate::{
    hook::{EntryPoint, HookRegistry, PatchToken},
    metadata::index::ModuleIndex,
    Error, Result,
};

/// Symbolic description of one function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodDescriptor {
    /// Simple name of the defining assembly
    pub assembly: String,
    /// Full name of the owning type, `NS.Outer/Inner`
    pub type_name: String,
    /// Signature key of the function
    pub signature: String,
    /// Closed instantiation, owner type arguments followed by function type arguments.
    /// Empty for the definition itself.
    pub type_args: Vec<String>,
}

impl MethodDescriptor {
    /// Describe `signature` on `type_name` in `assembly`.
    pub fn new(
        assembly: impl Into<String>,
        type_name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        MethodDescriptor {
            assembly: assembly.into(),
            type_name: type_name.into(),
            signature: signature.into(),
            type_args: Vec::new(),
        }
    }

    /// The same function, instantiated over `type_args`.
    #[must_use]
    pub fn with_type_args(mut self, type_args: Vec<String>) -> Self {
        self.type_args = type_args;
        self
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}::{}", self.assembly, self.type_name, self.signature)?;
        if !self.type_args.is_empty() {
            write!(f, "<{}>", self.type_args.join(","))?;
        }
        Ok(())
    }
}

/// Maps symbolic descriptions to entry points of loaded code.
pub trait MethodResolver {
    /// Entry point of `method`.
    ///
    /// # Errors
    /// Any error; the installer reports it as a skipped pair.
    fn resolve(&self, method: &MethodDescriptor) -> Result<EntryPoint>;
}

/// Redirect `original` to `replacement`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookPair {
    /// The function currently executing
    pub original: MethodDescriptor,
    /// Its patched body
    pub replacement: MethodDescriptor,
}

/// A pair that was skipped.
#[derive(Debug)]
pub struct HookFailure {
    /// The function that keeps running its previous body
    pub original: MethodDescriptor,
    /// Why it was skipped
    pub error: Error,
}

/// Outcome of installing one generation.
#[derive(Debug, Default)]
pub struct InstallSummary {
    /// Installed hooks, in input order
    pub installed: Vec<(MethodDescriptor, PatchToken)>,
    /// Skipped pairs
    pub failures: Vec<HookFailure>,
}

impl InstallSummary {
    /// Returns `true` if every pair was installed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Installs hook pairs through a registry.
pub struct HookInstaller<'a> {
    registry: &'a HookRegistry,
    resolver: &'a dyn MethodResolver,
    indexes: Vec<(String, &'a ModuleIndex)>,
}

impl<'a> HookInstaller<'a> {
    /// An installer resolving through `resolver` and redirecting through `registry`.
    pub fn new(registry: &'a HookRegistry, resolver: &'a dyn MethodResolver) -> Self {
        HookInstaller {
            registry,
            resolver,
            indexes: Vec::new(),
        }
    }

    /// Cache resolved entry points of `assembly` on the records of `index`.
    #[must_use]
    pub fn with_index(mut self, assembly: impl Into<String>, index: &'a ModuleIndex) -> Self {
        self.indexes.push((assembly.into(), index));
        self
    }

    fn resolve(&self, method: &MethodDescriptor) -> Result<EntryPoint> {
        let record = if method.type_args.is_empty() {
            self.indexes
                .iter()
                .find(|(assembly, _)| *assembly == method.assembly)
                .and_then(|(_, index)| index.find_method(&method.type_name, &method.signature))
        } else {
            None
        };

        match record {
            Some(record) => record.resolve_handle(|_| self.resolve_uncached(method)),
            None => self.resolve_uncached(method),
        }
    }

    fn resolve_uncached(&self, method: &MethodDescriptor) -> Result<EntryPoint> {
        match self.resolver.resolve(method) {
            Ok(entry) if entry.is_null() => Err(Error::HookInstall {
                method: method.to_string(),
                message: "resolved to a null entry point".to_string(),
            }),
            Ok(entry) => Ok(entry),
            Err(error @ (Error::ResolutionFailure { .. } | Error::HookInstall { .. })) => {
                Err(error)
            }
            Err(error) => Err(Error::HookInstall {
                method: method.to_string(),
                message: error.to_string(),
            }),
        }
    }

    fn install_pair(&self, pair: &HookPair, tag: &str) -> Result<PatchToken> {
        let original = self.resolve(&pair.original)?;
        let replacement = self.resolve(&pair.replacement)?;
        self.registry.install(original, replacement, tag)
    }

    /// Install every pair under `tag`.
    ///
    /// Failures never abort the remaining pairs; they are logged and collected in the
    /// returned summary.
    pub fn install(&self, pairs: &[HookPair], tag: &str) -> InstallSummary {
        let mut summary = InstallSummary::default();

        for pair in pairs {
            match self.install_pair(pair, tag) {
                Ok(token) => {
                    log::debug!("Hooked {} -> {}", pair.original, pair.replacement);
                    summary.installed.push((pair.original.clone(), token));
                }
                Err(error) => {
                    log::warn!("Skipping hook for {}: {}", pair.original, error);
                    summary.failures.push(HookFailure {
                        original: pair.original.clone(),
                        error,
                    });
                }
            }
        }

        log::info!(
            "Installed {} of {} hooks under '{}'",
            summary.installed.len(),
            pairs.len(),
            tag
        );
        summary
    }

    /// Remove the generation installed under `tag`.
    ///
    /// # Errors
    /// See [`HookRegistry::uninstall_by_tag`].
    pub fn uninstall(&self, tag: &str) -> Result<usize> {
        self.registry.uninstall_by_tag(tag)
    }
}
