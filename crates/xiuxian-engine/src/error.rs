//! Engine startup errors.
//!
//! Everything here is fatal: the binary logs the error and exits
//! non-zero rather than running with a broken configuration or a
//! half-loaded world.

/// Fatal engine setup errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration failed to load or validate.
    #[error("config error: {source}")]
    Config {
        /// The underlying configuration error.
        #[from]
        source: xiuxian_core::config::ConfigError,
    },

    /// Static game data failed to load.
    #[error("static data error: {source}")]
    WorldData {
        /// The underlying world error.
        #[from]
        source: xiuxian_world::WorldError,
    },

    /// The durable layer failed during startup.
    #[error("persistence error: {source}")]
    Db {
        /// The underlying database error.
        #[from]
        source: xiuxian_db::DbError,
    },

    /// A save could not be restored.
    #[error("load error: {source}")]
    Load {
        /// The underlying persistence error.
        #[from]
        source: xiuxian_core::persist::PersistError,
    },

    /// The API server failed to start.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: xiuxian_server::server::ServerError,
    },

    /// The configured LLM mode could not be interpreted.
    #[error("unknown llm mode: {0}")]
    LlmMode(String),
}
