// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # dotpatch
//!
//! Live method patching for managed modules. Given the module a process has loaded (the
//! *baseline*) and a fresh compile of edited sources (the *candidate*), `dotpatch` works out
//! which function bodies changed, produces a patch module whose code binds to the baseline's
//! statics and types, and redirects the old entry points to the new bodies while the
//! process keeps running.
//!
//! ## Features
//!
//! - **🔍 Structural diffing** - Bodies are compared symbolically, independent of row numbering
//! - **🧱 Layout safety** - Added fields or virtual functions are rejected before anything runs
//! - **🔗 Reference rewriting** - Patched code reads and writes the live program's state
//! - **🧬 Generic support** - Closed instantiations get forwarding wrappers
//! - **🪝 Tagged hooks** - Atomic entry-point redirection, grouped per assembly for clean replacement
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotpatch::prelude::*;
//!
//! let config = PatchConfig::from_file("cycle.json")?;
//! let outcome = PatchEngine::new().run(&config, None)?;
//! for method in &outcome.report.methods_need_hook {
//!     println!("{}::{}", method.type_name, method.signature);
//! }
//! # Ok::<(), dotpatch::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`file`] - Memory-mapped and in-memory byte access
//! - [`metadata`] - Module images, signatures, debug symbols, the symbol index and module cache
//! - [`assembly`] - CIL instruction decoding, rendering, operand patching and encoding
//! - [`patch`] - Configuration, layout validation, diffing, rewriting and the cycle pipeline
//! - [`hook`] - Entry-point redirection and the hook registry
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Module Format
//!
//! Modules are read and written in the crate's own `.dpmod` container with `.dpdb` debug
//! symbols beside them. Its tables mirror the ECMA-335 rows the engine needs, but the
//! container is not a PE image: a toolchain emitting regular assemblies needs a converter in
//! front of [`patch::ProcessCompiler`], which expects the compiler to write `.dpmod` directly.
//!
//! ## Error Handling
//!
//! Errors are split into fatal ones, which abort the cycle, and recoverable ones, which skip
//! a single function or hook and are collected as warnings:
//!
//! ```rust,no_run
//! use dotpatch::{Error, patch::{PatchConfig, PatchEngine}};
//!
//! let config = PatchConfig::from_file("cycle.json")?;
//! match PatchEngine::new().run(&config, None) {
//!     Ok(outcome) => println!("{} warning(s)", outcome.report.warnings.len()),
//!     Err(Error::StructuralMismatch { type_name, reason, .. }) => {
//!         println!("{type_name} cannot be patched: {reason}")
//!     }
//!     Err(e) => println!("cycle failed: {e}"),
//! }
//! # Ok::<(), dotpatch::Error>(())
//! ```
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Raw byte access, parsing cursor and blob writer.
pub mod file;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust,no_run
/// use dotpatch::prelude::*;
///
/// let cache = ModuleCache::new();
/// let module = cache.get(&ModuleIdentity::from_path("Game.dpmod"))?;
/// println!("{} types", module.index.types.len());
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub mod prelude;

/// CIL instructions: decoding, symbolic rendering, token patching and encoding.
pub mod assembly;

/// Tokens, signatures, module images, debug symbols, the symbol index and module cache.
pub mod metadata;

/// The patch cycle, from configuration to report.
pub mod patch;

/// Entry-point redirection.
pub mod hook;

/// `dotpatch` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotpatch` Error type
///
/// The main error type for all operations in this crate. See [`Error::is_fatal`] for the
/// split between cycle-aborting and recoverable errors.
pub use error::Error;

/// Raw file access, see [`file::File`].
pub use file::{parser::Parser, File};
