//! Observer and control API server for the cultivation-world simulator.
//!
//! The server is a read-mostly surface over the engine: REST endpoints
//! serve snapshots refreshed after every tick, the WebSocket streams
//! tick frames, and the control/game endpoints talk back to the engine
//! through operator state and the command channel. Nothing here
//! touches the world directly while a tick runs.
//!
//! # Modules
//!
//! - [`dto`] -- Wire shapes for the REST and WebSocket surface.
//! - [`state`] -- Shared application state and the engine-side
//!   callback.
//! - [`handlers`] -- REST endpoint handlers.
//! - [`ws`] -- The `/ws` tick stream.
//! - [`router`] -- Router assembly.
//! - [`server`] -- TCP bind and serve.

pub mod dto;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

pub use router::build_router;
pub use server::{ServerConfig, start_server};
pub use state::{AppState, ObserverCallback};
