//! The patch pipeline.
//!
//! A patch cycle turns a freshly compiled candidate of a running module into a loadable
//! patch module plus the list of functions to redirect into it.
//!
//! # Key Components
//!
//! - [`config`] - Per-cycle configuration
//! - [`layout`] - Rejects candidates whose data layout or virtual tables changed
//! - [`diff`] - Finds changed function bodies and builds the [`plan::HookPlan`]
//! - [`rewrite`] - Redirects candidate references to the baseline's definitions
//! - [`generics`] - Forwarding wrappers for closed instantiations of patched generics
//! - [`cctor`] - Static initializer neutralization
//! - [`compiler`] - The compiler service contract and its process backend
//! - [`prescan`] - Pulls in the other source files of changed partial types
//! - [`report`] - The host facing cycle report
//! - [`pipeline`] - [`PatchEngine`], which runs all of the above
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotpatch::patch::{PatchConfig, PatchEngine};
//!
//! let config = PatchConfig::from_file("cycle.json")?;
//! let outcome = PatchEngine::new().run(&config, None)?;
//! outcome.report.write("report.json")?;
//! # Ok::<(), dotpatch::Error>(())
//! ```

pub mod cctor;
pub mod compiler;
pub mod config;
pub mod diff;
pub mod generics;
pub mod layout;
pub mod pipeline;
pub mod plan;
pub mod prescan;
pub mod report;
pub mod rewrite;

pub use compiler::{CompileOptions, CompileOutput, CompilerService, ProcessCompiler};
pub use config::{CompilerConfig, ModuleConfig, PatchConfig};
pub use pipeline::{install_hooks, CycleOutcome, PatchArtifact, PatchEngine};
pub use plan::{HookEntry, HookPlan};
pub use report::{GenericWrapperInfo, MethodHookInfo, PatchReport};
