//! Configuration, the world aggregate, and the monthly phase
//! orchestrator for the cultivation-world simulator.
//!
//! This crate owns the tick: one call to
//! [`Simulator::step`](simulator::Simulator::step) advances the world
//! by one month through nineteen strictly ordered phases, fanning out
//! LLM work inside the parallel phases and joining before the next
//! phase begins.
//!
//! # Modules
//!
//! - [`config`] -- Typed configuration loaded from YAML.
//! - [`world`] -- The world aggregate: clock, map, stores, phenomenon,
//!   gatherings, rankings.
//! - [`deciders`] -- Per-task LLM adapters and the scripted stub
//!   oracle.
//! - [`gathering`] -- Scheduled world events (tournaments, auctions,
//!   hidden realms).
//! - [`rankings`] -- The yearly power ranking snapshot.
//! - [`simulator`] -- The 19-phase month step.
//! - [`operator`] -- Shared control state for pause/resume/reset.
//! - [`runner`] -- The engine loop: ticks, controls, commands.
//! - [`persist`] -- Save-file assembly and two-pass world restore.

pub mod config;
pub mod deciders;
pub mod gathering;
pub mod operator;
pub mod persist;
pub mod rankings;
pub mod runner;
pub mod simulator;
pub mod world;

pub use config::SimConfig;
pub use simulator::{Simulator, TickError};
pub use world::World;
