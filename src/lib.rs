// hybridtable - skeleton/cell hybrid table benchmark
// Builds very large tables across a graph-structured skeleton store and a
// key-addressed cell store, then joins them back together.

#![warn(rust_2018_idioms)]

pub mod cells;
pub mod config;
pub mod metrics;
pub mod reconstruct;
pub mod runner;
pub mod skeleton;
pub mod view;

// Re-exports for convenience
pub use cells::{CellFiller, CellStore, FillOptions, FillReport, MemoryCellStore};
pub use config::BenchConfig;
pub use reconstruct::{ReconstructOptions, ReconstructedTable, TableReconstructor};
pub use runner::{BenchmarkRunner, RunReport};
pub use skeleton::{MemorySkeletonStore, SkeletonBuilder, SkeletonStore, TableSkeleton, Uid};
pub use view::ViewOrderer;

/// hybridtable error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        /// A structural mutation against the skeleton store failed. The graph may
        /// hold partial state and must be wiped before the run is retried.
        #[error("Structural commit failed during {phase} phase: {reason}")]
        StructuralCommit { phase: String, reason: String },

        #[error("Cell write for row {row} failed after {attempts} attempt(s): {reason}")]
        CellWrite {
            row: String,
            attempts: usize,
            reason: String,
        },

        #[error("Batch read {batch} failed: {reason}")]
        BatchRead { batch: usize, reason: String },

        #[error("Batch of {requested} keys exceeds cell store limit of {limit}")]
        OversizedBatch { requested: usize, limit: usize },

        #[error("Skeleton store error: {0}")]
        Skeleton(String),

        #[error("Cell store error: {0}")]
        CellStore(String),

        #[error("Not found: {0}")]
        NotFound(String),

        #[error("Already exists: {0}")]
        AlreadyExists(String),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Internal error: {0}")]
        Internal(String),

        #[error("Serialization error: {0}")]
        Serialization(String),

        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
    }

    impl Error {
        /// Whether a failed store call may succeed when issued again.
        pub fn is_retryable(&self) -> bool {
            matches!(
                self,
                Error::CellStore(_) | Error::CellWrite { .. } | Error::BatchRead { .. }
            )
        }
    }

    impl From<::config::ConfigError> for Error {
        fn from(err: ::config::ConfigError) -> Self {
            Error::Config(err.to_string())
        }
    }

    impl From<serde_json::Error> for Error {
        fn from(err: serde_json::Error) -> Self {
            Error::Serialization(err.to_string())
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::error::Error;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::CellStore("timeout".into()).is_retryable());
        assert!(Error::BatchRead {
            batch: 0,
            reason: "timeout".into()
        }
        .is_retryable());
        assert!(!Error::OversizedBatch {
            requested: 10,
            limit: 5
        }
        .is_retryable());
        assert!(!Error::AlreadyExists("row".into()).is_retryable());
        assert!(!Error::StructuralCommit {
            phase: "table".into(),
            reason: "boom".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::OversizedBatch {
            requested: 6000,
            limit: 5000,
        };
        assert_eq!(
            err.to_string(),
            "Batch of 6000 keys exceeds cell store limit of 5000"
        );
    }
}
