//! Error taxonomy for the reduction pipelines.

/// Errors raised while driving indexing and integration.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessError {
    /// A backend executable is not installed or not runnable. Recoverable
    /// at the factory level by falling through to the next candidate;
    /// fatal only when the caller pinned this exact backend.
    NotAvailable { backend: String },

    /// Transient indexing heuristic failure (e.g. mosaic-spread estimation
    /// failed). Retried in place with a widened search, bounded.
    Indexing { reason: String },

    /// The asserted lattice is statistically unsupported. Fatal for the
    /// current lattice choice; the caller retries with the next-lower
    /// symmetry solution.
    BadLattice { reason: String },

    /// Refinement produced a non-physical mosaic spread. Retried once with
    /// a doubled seed mosaic; a second occurrence escalates to BadLattice.
    NegativeMosaic { mosaic: f64 },

    /// A backend emitted a line the versioned parser does not understand.
    Parse { line: String, reason: String },

    /// Filesystem failure while handling interchange files.
    Io { path: String, reason: String },
}

impl ProcessError {
    /// Wrap an I/O error together with the path it concerned.
    pub fn io(path: impl Into<String>, err: std::io::Error) -> Self {
        ProcessError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::NotAvailable { backend } => {
                write!(f, "backend not available: {}", backend)
            }
            ProcessError::Indexing { reason } => write!(f, "indexing failed: {}", reason),
            ProcessError::BadLattice { reason } => write!(f, "bad lattice: {}", reason),
            ProcessError::NegativeMosaic { mosaic } => {
                write!(f, "negative mosaic spread: {:.4}", mosaic)
            }
            ProcessError::Parse { line, reason } => {
                write!(f, "unparseable backend output {:?}: {}", line, reason)
            }
            ProcessError::Io { path, reason } => write!(f, "i/o error on {}: {}", path, reason),
        }
    }
}

impl std::error::Error for ProcessError {}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProcessError>;
