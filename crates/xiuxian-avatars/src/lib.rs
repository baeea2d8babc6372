//! Avatar state, relations, actions, and lifecycle for the
//! cultivation-world simulator.
//!
//! The crate follows a capability-set design: [`Avatar`] is a plain
//! record, and every behavior (inventory, effects, relations, the action
//! runtime, lifecycle transitions, fortune rolls) is a set of functions
//! that take the avatar -- or the whole [`EntityStore`] -- as a
//! parameter. There is no inheritance hierarchy and avatars never hold
//! references to one another; all cross-avatar edges are id-keyed and
//! resolved through the store.
//!
//! # Modules
//!
//! - [`avatar`] -- The avatar record and per-avatar capability functions.
//! - [`mortal`] -- Non-cultivators who may awaken into avatars.
//! - [`store`] -- The entity store: the single owner of all avatars and
//!   mortals, with lifecycle drain sets.
//! - [`relations`] -- The asserted relation graph and the yearly derived
//!   refresh.
//! - [`actions`] -- The action state machine: plans, instances,
//!   enum-dispatched bodies, commit/tick/preemption.
//! - [`lifecycle`] -- Death resolution, ageing, awakening, and births.
//! - [`fortune`] -- Fortune and misfortune rollers over the weighted
//!   catalogues.

pub mod actions;
pub mod avatar;
pub mod fortune;
pub mod lifecycle;
pub mod mortal;
pub mod relations;
pub mod store;

pub use avatar::{Avatar, DeathInfo, Hp, InteractionState, ItemInstance, LongTermObjective};
pub use mortal::Mortal;
pub use store::EntityStore;

use xiuxian_types::AvatarId;

/// Errors produced by avatar operations.
#[derive(Debug, thiserror::Error)]
pub enum AvatarError {
    /// An avatar id could not be resolved in the store.
    #[error("unknown avatar: {0}")]
    UnknownAvatar(AvatarId),

    /// A relation write was rejected.
    #[error("relation rejected between {a} and {b}: {reason}")]
    RelationRejected {
        /// One endpoint.
        a: AvatarId,
        /// The other endpoint.
        b: AvatarId,
        /// Why the write was refused.
        reason: String,
    },

    /// An action could not be created or started.
    #[error("action {name} rejected: {reason}")]
    ActionRejected {
        /// The action name from the plan.
        name: String,
        /// Why it was refused.
        reason: String,
    },
}

/// A request for LLM-generated narrative, produced by settlements that
/// run inside synchronous phases. The orchestrator resolves seeds into
/// story events through the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorySeed {
    /// Terse factual seed the story generator expands.
    pub seed: String,
    /// Avatars involved, in narrative order.
    pub participants: Vec<AvatarId>,
    /// Whether the resulting story event should be flagged major.
    pub is_major: bool,
}
