use std::path::PathBuf;

use thiserror::Error;

use crate::metadata::token::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into two groups. The parsing variants ([`Error::Malformed`],
/// [`Error::OutOfBounds`], ...) describe damaged module images or signatures. The patch
/// variants follow the failure taxonomy of a patch cycle:
///
/// | Variant | Scope | Effect |
/// |---------|-------|--------|
/// | [`Error::StructuralMismatch`] | module | fatal, the module is rejected |
/// | [`Error::ModuleLoad`] | cycle | fatal |
/// | [`Error::CompileFailure`] | cycle | fatal, no module is produced |
/// | [`Error::ResolutionFailure`] | function | recoverable, the function is skipped |
/// | [`Error::HookInstall`] | function | recoverable, the function is skipped |
///
/// Use [`Error::is_fatal`] to tell them apart.
///
/// # Examples
///
/// ```rust,no_run
/// use dotpatch::{Error, metadata::cache::{ModuleCache, ModuleIdentity}};
///
/// let cache = ModuleCache::new();
/// match cache.get(&ModuleIdentity::from_path("Game.dpmod")) {
///     Ok(module) => println!("{} types", module.index.types.len()),
///     Err(Error::ModuleLoad { path, source }) => {
///         eprintln!("could not load {}: {}", path.display(), source)
///     }
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // File parsing Errors
    /// The image is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing.
    #[error("Out of Bound read would have occurred! - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// JSON (de)serialization failure for the configuration or the report.
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Recursion limit reached while walking a signature.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// The patch configuration is incomplete or inconsistent.
    #[error("Invalid configuration - {0}")]
    Configuration(String),

    /// Failed to lock target.
    #[error("Failed to lock target")]
    LockError,

    /// A compiled module could not be loaded or parsed.
    ///
    /// Aborts the whole patch cycle.
    #[error("Failed to load module '{}' - {source}", path.display())]
    ModuleLoad {
        /// The module file that was requested
        path: PathBuf,
        /// What went wrong while reading or parsing it
        #[source]
        source: Box<Error>,
    },

    /// The candidate module changed something that cannot be applied to live objects.
    ///
    /// Raised for removed types, changed field layouts, added or removed virtual functions,
    /// and functions that vanished from the candidate. Rejects the whole module.
    #[error("Structural mismatch in '{type_name}'{} - {reason}", member.as_ref().map(|m| format!(" ({m})")).unwrap_or_default())]
    StructuralMismatch {
        /// Signature of the offending type
        type_name: String,
        /// The field or function involved, if the mismatch is member-level
        member: Option<String>,
        /// Human readable description
        reason: String,
    },

    /// A symbol could not be mapped to a definition or a loaded runtime handle.
    #[error("Failed to resolve {token} - {message}")]
    ResolutionFailure {
        /// The token that failed to resolve, null if resolution was symbolic
        token: Token,
        /// What was being resolved
        message: String,
    },

    /// The external compiler returned a failure status or ran into the timeout.
    #[error("Compilation of '{module}' failed - {message}")]
    CompileFailure {
        /// Module that was being compiled
        module: String,
        /// Exit status, timeout or spawn error
        message: String,
    },

    /// A resolved function could not be redirected.
    #[error("Failed to install hook for '{method}' - {message}")]
    HookInstall {
        /// The function that should have been redirected
        method: String,
        /// Backend specific reason
        message: String,
    },
}

impl Error {
    /// Returns `true` if the error must abort the current patch cycle.
    ///
    /// Resolution and hook installation failures only affect a single function; everything
    /// else leaves the running process on its previous code.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::ResolutionFailure { .. } | Error::HookInstall { .. }
        )
    }

    pub(crate) fn resolution(token: Token, message: impl Into<String>) -> Self {
        Error::ResolutionFailure {
            token,
            message: message.into(),
        }
    }

    pub(crate) fn mismatch(
        type_name: impl Into<String>,
        member: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::StructuralMismatch {
            type_name: type_name.into(),
            member,
            reason: reason.into(),
        }
    }
}
