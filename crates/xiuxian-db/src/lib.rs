//! The durable layer for the cultivation-world simulator.
//!
//! Two stores live here and nothing else in the workspace touches disk
//! for game state:
//!
//! - [`event_log`] -- the append-only SQLite event log, one database
//!   file per save, written in the tick's finalize phase.
//! - [`save_store`] -- human-readable JSON save files with atomic
//!   writes, co-located with their event databases.

pub mod event_log;
pub mod save_store;

pub use event_log::EventLog;
pub use save_store::SaveStore;

/// Errors produced by the durable layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// An underlying SQLite error.
    #[error("sqlite error: {source}")]
    Sqlite {
        /// The underlying sqlx error.
        #[from]
        source: sqlx::Error,
    },

    /// JSON (de)serialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// The underlying serde error.
        #[from]
        source: serde_json::Error,
    },

    /// A filesystem operation failed.
    #[error("io error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A stored row could not be interpreted.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// A save name contained characters outside the allowed set.
    #[error("invalid save name: {0}")]
    InvalidName(String),

    /// The requested save does not exist.
    #[error("no such save: {0}")]
    NoSuchSave(String),
}
