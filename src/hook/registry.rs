//! Process-wide bookkeeping of active hooks.
//!
//! The registry guarantees at most one active redirection per original entry point. A new
//! install for an entry point that is already hooked first restores the old redirection,
//! so the last write wins. Hooks carry a tag (usually the patch generation) so a whole
//! generation can be removed with [`HookRegistry::uninstall_by_tag`] before the next one is
//! installed.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use dotpatch::hook::{EntryPoint, HookRegistry, SlotPatcher};
//!
//! let patcher = Arc::new(SlotPatcher::new());
//! let registry = HookRegistry::new(patcher.clone());
//!
//! registry.install(EntryPoint(0x10), EntryPoint(0x20), "patch-1")?;
//! registry.install(EntryPoint(0x10), EntryPoint(0x30), "patch-2")?;
//! assert_eq!(registry.len(), 1);
//! assert_eq!(patcher.dispatch(EntryPoint(0x10)), EntryPoint(0x30));
//!
//! assert_eq!(registry.uninstall_by_tag("patch-2")?, 1);
//! assert_eq!(patcher.dispatch(EntryPoint(0x10)), EntryPoint(0x10));
//! # Ok::<(), dotpatch::Error>(())
//! ```

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::{
    hook::{EntryPoint, EntryPointPatcher, PatchToken, SlotPatcher},
    Result,
};

/// One active redirection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveHook {
    /// Redirected entry point
    pub original: EntryPoint,
    /// Where callers of `original` end up
    pub replacement: EntryPoint,
    /// Generation tag
    pub tag: String,
    /// Backend handle used to restore the original
    pub token: PatchToken,
}

/// Active hooks keyed by original entry point.
pub struct HookRegistry {
    patcher: Arc<dyn EntryPointPatcher>,
    hooks: DashMap<EntryPoint, ActiveHook>,
}

impl HookRegistry {
    /// A registry redirecting through `patcher`.
    pub fn new(patcher: Arc<dyn EntryPointPatcher>) -> Self {
        HookRegistry {
            patcher,
            hooks: DashMap::new(),
        }
    }

    /// The process-wide registry, backed by [`SlotPatcher::global`].
    pub fn global() -> &'static HookRegistry {
        static GLOBAL: OnceLock<HookRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| HookRegistry::new(SlotPatcher::global().clone()))
    }

    /// Redirect `original` to `replacement` under `tag`, superseding any active hook on
    /// `original`.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookInstall`] if the backend refuses either step. If the old
    /// hook cannot be removed it stays registered and nothing new is installed.
    pub fn install(
        &self,
        original: EntryPoint,
        replacement: EntryPoint,
        tag: &str,
    ) -> Result<PatchToken> {
        if let Some(existing) = self.hooks.get(&original).map(|hook| hook.token) {
            self.patcher.uninstall(existing)?;
            self.hooks.remove(&original);
            log::debug!("Superseding hook on {original}");
        }

        let token = self.patcher.install(original, replacement)?;
        self.hooks.insert(
            original,
            ActiveHook {
                original,
                replacement,
                tag: tag.to_string(),
                token,
            },
        );
        Ok(token)
    }

    /// Remove the hook on `original`. Returns `false` if there was none.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookInstall`] if the backend cannot restore the entry point.
    pub fn uninstall(&self, original: EntryPoint) -> Result<bool> {
        let Some(token) = self.hooks.get(&original).map(|hook| hook.token) else {
            return Ok(false);
        };
        self.patcher.uninstall(token)?;
        self.hooks.remove(&original);
        Ok(true)
    }

    /// Remove every hook carrying `tag`, leaving other tags untouched. Returns the number of
    /// hooks removed.
    ///
    /// # Errors
    /// Every matching hook is attempted; the first backend error is returned afterwards and
    /// the hooks that failed stay registered.
    pub fn uninstall_by_tag(&self, tag: &str) -> Result<usize> {
        let matching: Vec<EntryPoint> = self
            .hooks
            .iter()
            .filter(|hook| hook.tag == tag)
            .map(|hook| hook.original)
            .collect();

        let mut removed = 0;
        let mut first_error = None;
        for original in matching {
            match self.uninstall(original) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(error) => {
                    log::warn!("Failed to remove hook on {original}: {error}");
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(removed),
        }
    }

    /// The active hook on `original`.
    #[must_use]
    pub fn get(&self, original: EntryPoint) -> Option<ActiveHook> {
        self.hooks.get(&original).map(|hook| hook.clone())
    }

    /// Active hooks carrying `tag`.
    #[must_use]
    pub fn hooks_with_tag(&self, tag: &str) -> Vec<ActiveHook> {
        let mut hooks: Vec<_> = self
            .hooks
            .iter()
            .filter(|hook| hook.tag == tag)
            .map(|hook| hook.clone())
            .collect();
        hooks.sort_by_key(|hook| hook.original);
        hooks
    }

    /// Number of active hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Returns `true` if no hook is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
