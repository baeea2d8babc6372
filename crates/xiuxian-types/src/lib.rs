//! Shared type definitions for the cultivation-world simulator.
//!
//! This crate is the dependency root of the workspace: every other crate
//! builds on the identifiers, temporal types, and enumerations defined
//! here. Nothing in this crate performs I/O.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe identifier wrappers around [`uuid::Uuid`].
//! - [`time`] -- [`MonthStamp`] month counter and [`Month`] decomposition.
//! - [`cultivation`] -- [`Realm`] tiers, level bands, lifespans, sect ranks.
//! - [`enums`] -- Gender, alignment, death causes.
//! - [`relation`] -- [`RelationKind`] labels with reciprocal/innate tables.
//! - [`event`] -- The immutable [`Event`] record.
//!
//! [`MonthStamp`]: time::MonthStamp
//! [`Month`]: time::Month
//! [`Realm`]: cultivation::Realm
//! [`RelationKind`]: relation::RelationKind
//! [`Event`]: event::Event

pub mod cultivation;
pub mod enums;
pub mod event;
pub mod ids;
pub mod relation;
pub mod time;

pub use cultivation::{Realm, SectRank};
pub use enums::{Alignment, DeathCause, Gender, ObjectiveOrigin};
pub use event::Event;
pub use ids::{AvatarId, EventId, MortalId, RegionId, SectId};
pub use relation::RelationKind;
pub use time::{Month, MonthStamp};
