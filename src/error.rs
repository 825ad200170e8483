//! Error types for the esmhost runtime host

use std::path::PathBuf;

use thiserror::Error;

/// All errors surfaced by the host: script exceptions normalized from the
/// engine, module resolution/loading failures, and event-loop lifecycle
/// errors (timeouts and cancellation).
#[derive(Error, Debug)]
pub enum Error {
    /// Exception thrown by script code, normalized from the engine's
    /// native representation.
    #[error("{message}{}", if stack.is_empty() { String::new() } else { format!("\n{}", stack) })]
    Script { message: String, stack: String },

    /// A promise was rejected and nothing handled it before the current
    /// drain settled.
    #[error("unhandled promise rejection{}", detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
    UnhandledRejection { detail: Option<String> },

    /// Import specifier was the empty string.
    #[error("empty module specifier")]
    EmptySpecifier,

    /// Import specifier was neither absolute nor relative (`./`, `../`).
    #[error("unsupported bare ESM import specifier {0:?}")]
    BareSpecifier(String),

    /// No candidate file exists for the specifier.
    #[error("cannot resolve ESM import {0:?}")]
    UnresolvedImport(String),

    /// `import()` was called with a null or undefined specifier.
    #[error("dynamic import requires a non-empty specifier")]
    InvalidDynamicImport,

    /// Module source could not be read from disk.
    #[error("failed to read module {path:?}: {source}")]
    ModuleRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Engine rejected the module source.
    #[error("failed to parse module {path:?}: {source}")]
    ModuleParse { path: PathBuf, source: Box<Error> },

    /// Module graph could not be linked (resolution or dependency failure).
    #[error("failed to link module {path:?}: {source}")]
    ModuleLink { path: PathBuf, source: Box<Error> },

    /// Top-level module evaluation produced an already-rejected promise.
    #[error("module evaluation rejected{}", detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
    EvaluationRejected { detail: Option<String> },

    /// `wait_on_registered` hit its wall-clock ceiling with work pending.
    #[error("event loop timeout: {pending} callbacks pending")]
    LoopTimeout { pending: usize },

    /// The host's cancel token fired.
    #[error("event loop canceled")]
    Canceled,

    /// The host's cancel token deadline passed.
    #[error("event loop deadline exceeded")]
    DeadlineExceeded,

    /// Engine-internal failure reported through the embedding seam.
    #[error("{0}")]
    Engine(String),
}

impl Error {
    /// Engine-internal error with the given message.
    pub fn engine(message: impl Into<String>) -> Self {
        Error::Engine(message.into())
    }

    /// Normalized script exception.
    pub fn script(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Error::Script {
            message: message.into(),
            stack: stack.into(),
        }
    }
}

/// Result type for host operations
pub type Result<T> = std::result::Result<T, Error>;
