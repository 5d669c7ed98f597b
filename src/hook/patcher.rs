//! Entry-point redirection backends.
//!
//! [`EntryPointPatcher`] is the only capability the engine needs from the runtime: redirect a
//! function's entry point to another function and later restore it. How that happens
//! (rewriting a machine code prologue, swapping a vtable or precode slot) is backend
//! specific.
//!
//! [`SlotPatcher`] is the portable backend. Every entry point owns one dispatch slot holding
//! the address callers jump through; redirecting is a single atomic swap of that slot, so a
//! concurrent caller observes either the old or the new target, never a torn one.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, OnceLock,
};

use dashmap::DashMap;

use crate::{hook::EntryPoint, Error, Result};

/// Handle of one installed redirection, used to restore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchToken(pub u64);

/// Redirects function entry points.
///
/// Implementations must make `install` atomic with respect to threads calling `original`.
pub trait EntryPointPatcher: Send + Sync {
    /// Redirect `original` to `replacement`, capturing what is needed to undo it.
    ///
    /// # Errors
    /// Returns [`Error::HookInstall`] if the entry point cannot be redirected.
    fn install(&self, original: EntryPoint, replacement: EntryPoint) -> Result<PatchToken>;

    /// Restore the entry point redirected under `token`.
    ///
    /// # Errors
    /// Returns [`Error::HookInstall`] if `token` is unknown.
    fn uninstall(&self, token: PatchToken) -> Result<()>;
}

/// Dispatch-slot backend: one atomic slot per entry point.
#[derive(Debug, Default)]
pub struct SlotPatcher {
    slots: DashMap<EntryPoint, Arc<AtomicUsize>>,
    patches: DashMap<PatchToken, (EntryPoint, usize)>,
    next_token: AtomicU64,
}

impl SlotPatcher {
    /// Creates an empty slot table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide slot table.
    pub fn global() -> &'static Arc<SlotPatcher> {
        static GLOBAL: OnceLock<Arc<SlotPatcher>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(SlotPatcher::new()))
    }

    fn slot(&self, entry: EntryPoint) -> Arc<AtomicUsize> {
        self.slots
            .entry(entry)
            .or_insert_with(|| Arc::new(AtomicUsize::new(entry.0)))
            .clone()
    }

    /// The address a caller of `entry` currently reaches.
    #[must_use]
    pub fn dispatch(&self, entry: EntryPoint) -> EntryPoint {
        match self.slots.get(&entry) {
            Some(slot) => EntryPoint(slot.load(Ordering::Acquire)),
            None => entry,
        }
    }

    /// Number of redirections currently in place.
    #[must_use]
    pub fn active(&self) -> usize {
        self.patches.len()
    }
}

impl EntryPointPatcher for SlotPatcher {
    fn install(&self, original: EntryPoint, replacement: EntryPoint) -> Result<PatchToken> {
        if original.is_null() || replacement.is_null() {
            return Err(Error::HookInstall {
                method: original.to_string(),
                message: "null entry point".to_string(),
            });
        }
        if original == replacement {
            return Err(Error::HookInstall {
                method: original.to_string(),
                message: "entry point redirected to itself".to_string(),
            });
        }

        let previous = self.slot(original).swap(replacement.0, Ordering::AcqRel);
        let token = PatchToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.patches.insert(token, (original, previous));
        Ok(token)
    }

    fn uninstall(&self, token: PatchToken) -> Result<()> {
        let Some((_, (original, previous))) = self.patches.remove(&token) else {
            return Err(Error::HookInstall {
                method: format!("patch #{}", token.0),
                message: "unknown patch token".to_string(),
            });
        };
        self.slot(original).store(previous, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_restore() {
        let patcher = SlotPatcher::new();
        let original = EntryPoint(0x1000);
        let replacement = EntryPoint(0x2000);

        assert_eq!(patcher.dispatch(original), original);
        let token = patcher.install(original, replacement).unwrap();
        assert_eq!(patcher.dispatch(original), replacement);
        assert_eq!(patcher.active(), 1);

        patcher.uninstall(token).unwrap();
        assert_eq!(patcher.dispatch(original), original);
        assert!(patcher.uninstall(token).is_err());
    }

    #[test]
    fn test_invalid_redirects() {
        let patcher = SlotPatcher::new();
        assert!(patcher.install(EntryPoint(0), EntryPoint(1)).is_err());
        let err = patcher.install(EntryPoint(5), EntryPoint(5)).unwrap_err();
        assert!(matches!(err, Error::HookInstall { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_concurrent_callers_never_see_torn_targets() {
        let patcher = Arc::new(SlotPatcher::new());
        let original = EntryPoint(0x1000);
        let replacement = EntryPoint(0x2000);
        patcher.install(original, EntryPoint(0x1001)).unwrap();

        let reader = {
            let patcher = patcher.clone();
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    let target = patcher.dispatch(original);
                    assert!(target == EntryPoint(0x1001) || target == replacement);
                }
            })
        };
        for _ in 0..100 {
            let token = patcher.install(original, replacement).unwrap();
            patcher.uninstall(token).unwrap();
        }
        reader.join().unwrap();
    }
}
