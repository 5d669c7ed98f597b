//! # dotpatch Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the dotpatch library. Import this module to get quick access to everything a host
//! needs to run patch cycles and install their hooks.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotpatch operations
pub use crate::Error;

/// The result type used throughout dotpatch
pub use crate::Result;

/// Low-level file parsing utilities
pub use crate::{File, Parser};

// ================================================================================================
// Patch Cycle
// ================================================================================================

/// Configuration and the pipeline driving one cycle
pub use crate::patch::{
    install_hooks, CompilerConfig, CycleOutcome, ModuleConfig, PatchArtifact, PatchConfig,
    PatchEngine,
};

/// Compiler service contract and the process backend
pub use crate::patch::{CompileOptions, CompileOutput, CompilerService, ProcessCompiler};

/// Diff results and the host facing report
pub use crate::patch::{
    GenericWrapperInfo, HookEntry, HookPlan, MethodHookInfo, PatchReport,
};

// ================================================================================================
// Metadata
// ================================================================================================

/// Metadata tokens
pub use crate::metadata::token::{TableId, Token};

/// Module images and their builder
pub use crate::metadata::image::{ModuleBuilder, ModuleImage};

/// Loaded modules and their cache
pub use crate::metadata::cache::{LoadedModule, ModuleCache, ModuleIdentity};

/// The symbol index
pub use crate::metadata::index::{MethodRecord, ModuleIndex, TypeRecord};

/// Source documents and sequence points
pub use crate::metadata::symbols::DebugSymbols;

/// Type signatures
pub use crate::metadata::signatures::{SignatureMethod, TypeSignature};

// ================================================================================================
// Hooks
// ================================================================================================

/// Entry-point redirection
pub use crate::hook::{
    EntryPoint, EntryPointPatcher, HookInstaller, HookPair, HookRegistry, InstallSummary,
    MethodDescriptor, MethodResolver, SlotPatcher,
};
