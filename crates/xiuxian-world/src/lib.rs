//! Geography, regions, celestial phenomena, and static game data for the
//! cultivation-world simulator.
//!
//! # Modules
//!
//! - [`map`] -- The tile grid with Manhattan-radius observation scans.
//! - [`region`] -- Named areas (cities, sect headquarters, cultivation
//!   grottos, wilds) with hosts, owners, and prosperity.
//! - [`sect`] -- Live sect state: membership, ranks, leadership.
//! - [`phenomenon`] -- World-wide celestial phenomena (bounded-duration
//!   buffs/debuffs) and random rotation.
//! - [`statics`] -- The immutable [`WorldData`] bundle loaded once at
//!   init from CSV game-config tables.
//!
//! [`WorldData`]: statics::WorldData

pub mod map;
pub mod phenomenon;
pub mod region;
pub mod sect;
pub mod statics;

pub use map::Map;
pub use phenomenon::CelestialPhenomenon;
pub use region::{Region, RegionKind};
pub use sect::Sect;
pub use statics::WorldData;

/// Errors produced by the world crate.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// A tile coordinate fell outside the map bounds.
    #[error("tile ({x}, {y}) is outside the {width}x{height} map")]
    OutOfBounds {
        /// Requested x coordinate.
        x: u32,
        /// Requested y coordinate.
        y: u32,
        /// Map width.
        width: u32,
        /// Map height.
        height: u32,
    },

    /// A region id was not found.
    #[error("unknown region: {0}")]
    UnknownRegion(xiuxian_types::RegionId),

    /// A static-data table failed to load or validate.
    #[error("static data error in {table}: {reason}")]
    StaticData {
        /// The table (file) that failed.
        table: String,
        /// What was wrong.
        reason: String,
    },

    /// An I/O error while reading static data.
    #[error("static data io error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
