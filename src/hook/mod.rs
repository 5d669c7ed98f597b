//! Entry-point redirection.
//!
//! Hooking a function means that every caller of the original entry point ends up in the
//! replacement instead, while the original can be restored later. The engine only relies
//! on the narrow [`EntryPointPatcher`] capability; [`SlotPatcher`] is the portable
//! dispatch-slot implementation.
//!
//! # Key Components
//!
//! - [`EntryPoint`] - An invocable runtime handle
//! - [`EntryPointPatcher`] / [`SlotPatcher`] - Redirect and restore entry points
//! - [`HookRegistry`] - At most one active hook per entry point, grouped by tag
//! - [`HookInstaller`] - Resolves hook descriptors through the host and installs them
//!
//! # Thread Safety
//!
//! Registry writers are expected to be a single pipeline thread. Reading the current target
//! of an entry point is safe from any thread at any time.

mod installer;
mod patcher;
mod registry;

pub use installer::{
    HookFailure, HookInstaller, HookPair, InstallSummary, MethodDescriptor, MethodResolver,
};
pub use patcher::{EntryPointPatcher, PatchToken, SlotPatcher};
pub use registry::{ActiveHook, HookRegistry};

use std::fmt;

/// Address of an invocable function, as handed out by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EntryPoint(pub usize);

impl EntryPoint {
    /// The null entry point.
    pub const NULL: EntryPoint = EntryPoint(0);

    /// Returns `true` for the null entry point.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}
