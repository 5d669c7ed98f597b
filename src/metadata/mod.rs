//! Metadata of compiled modules.
//!
//! # Key Components
//!
//! - [`token`] - Table row references
//! - [`flags`] - Type, field and method attribute flags
//! - [`signatures`] - ECMA-335 signature blobs, parsed, encoded and rendered to names
//! - [`image`] - The [`image::ModuleImage`] table container with its reader, writer and builder
//! - [`symbols`] - Source documents and sequence points
//! - [`index`] - Signature keyed index of types, functions and fields
//! - [`cache`] - Load-once cache of indexed modules
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::metadata::{image::ModuleBuilder, index::ModuleIndex};
//!
//! let mut builder = ModuleBuilder::new("Game.dll", "Game");
//! builder.type_def("Game", "Player").public().build();
//! let (image, symbols) = builder.finish();
//!
//! let index = ModuleIndex::build(&image, &symbols)?;
//! assert!(index.get_type("Game.Player").is_some());
//! # Ok::<(), dotpatch::Error>(())
//! ```

pub mod cache;
pub mod flags;
pub mod image;
pub mod index;
pub mod signatures;
pub mod symbols;
pub mod token;
