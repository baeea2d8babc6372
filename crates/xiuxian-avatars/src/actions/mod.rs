//! The action state machine.
//!
//! An avatar's intent moves through three shapes: an [`ActionPlan`]
//! (name + parameter bag) queued by the decide phase, an
//! [`ActionInstance`] (live body + status) seated in the single
//! current-action slot, and finally the events its steps and settlement
//! produce.
//!
//! Action bodies are an enum dispatched by `match` rather than trait
//! objects: settlement can request async story generation, and async
//! methods are not dyn-compatible. Each body variant carries its own
//! running state.
//!
//! # Modules
//!
//! - [`validation`] -- Pure `can_start` checks that build the body.
//! - [`handlers`] -- Commit, step, preemption, and settlement execution.

pub mod handlers;
pub mod validation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xiuxian_types::{AvatarId, RegionId};

/// Terminal and non-terminal action statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Still in progress; `step` runs again next month.
    Running,
    /// Finished normally; settlement runs exactly once.
    Completed,
    /// Aborted by the action itself.
    Failed,
    /// Aborted because preconditions vanished (e.g. target died).
    Cancelled,
    /// Interrupted by an external force (gathering draft, operator).
    Interrupted,
}

impl ActionStatus {
    /// Whether the status ends the action.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A queued intent: an action name plus a parameter bag.
///
/// Parameter bags are string-keyed JSON values; unknown keys are
/// dropped against the action's declared parameter set before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    /// Registry name of the action.
    pub name: String,
    /// Raw parameters from the decide query.
    pub params: BTreeMap<String, serde_json::Value>,
}

impl ActionPlan {
    /// A plan with no parameters.
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }
}

/// The live state of a running action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionBody {
    /// Monthly qi circulation toward slow level gains.
    Cultivate {
        /// Months already spent.
        months_done: u32,
        /// Months planned.
        months_target: u32,
    },
    /// Walk toward a destination region.
    Travel {
        /// Where to go.
        destination: RegionId,
    },
    /// Closed-door seclusion ending in a breakthrough attempt.
    Seclude {
        /// Months already spent.
        months_done: u32,
        /// Months planned.
        months_target: u32,
    },
    /// Fight another avatar; settles kills inline.
    Duel {
        /// The opponent.
        target: AvatarId,
        /// Exchanges fought so far.
        rounds_fought: u32,
    },
    /// Disengage and run from an opponent.
    Flee {
        /// Who is being fled from.
        from: AvatarId,
        /// Months spent running.
        months_done: u32,
    },
    /// Gather herbs and materials in the wilds.
    Forage {
        /// Months already spent.
        months_done: u32,
        /// Months planned.
        months_target: u32,
    },
    /// Rest and recover.
    Idle {
        /// Months already spent.
        months_done: u32,
        /// Months planned.
        months_target: u32,
    },
}

impl ActionBody {
    /// The registry name of this body's action.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Cultivate { .. } => "cultivate",
            Self::Travel { .. } => "travel",
            Self::Seclude { .. } => "seclude",
            Self::Duel { .. } => "duel",
            Self::Flee { .. } => "flee",
            Self::Forage { .. } => "forage",
            Self::Idle { .. } => "idle",
        }
    }

    /// Static metadata for this body's action.
    pub const fn meta(&self) -> &'static ActionMeta {
        match self {
            Self::Cultivate { .. } => &CULTIVATE_META,
            Self::Travel { .. } => &TRAVEL_META,
            Self::Seclude { .. } => &SECLUDE_META,
            Self::Duel { .. } => &DUEL_META,
            Self::Flee { .. } => &FLEE_META,
            Self::Forage { .. } => &FORAGE_META,
            Self::Idle { .. } => &IDLE_META,
        }
    }
}

/// A seated action instance. The sequence number is the instance's
/// identity: preemption replaces the instance and bumps the sequence,
/// which is how the executor tells "same action continuing" from "a new
/// action was seated during `step`".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInstance {
    /// Identity of this instance within its avatar.
    pub seq: u64,
    /// The running body.
    pub body: ActionBody,
    /// Current status.
    pub status: ActionStatus,
}

impl ActionInstance {
    /// Static metadata for the seated action.
    pub const fn meta(&self) -> &'static ActionMeta {
        self.body.meta()
    }
}

/// Static attributes of an action kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMeta {
    /// Registry name.
    pub name: &'static str,
    /// Display string for the UI.
    pub display: &'static str,
    /// Emoji shown on the map.
    pub emoji: &'static str,
    /// Months that must pass after settlement before the action can
    /// start again. 0 disables the cooldown.
    pub cooldown_months: u64,
    /// Whether the holder may be drafted into world gatherings.
    pub allow_gathering: bool,
    /// Whether fortune/misfortune may fire on the holder.
    pub allow_world_events: bool,
    /// Whether start/settlement events are flagged major.
    pub is_major: bool,
    /// Declared parameter names; unknown bag keys are dropped.
    pub params: &'static [&'static str],
}

/// Metadata for `cultivate`.
pub static CULTIVATE_META: ActionMeta = ActionMeta {
    name: "cultivate",
    display: "Cultivating",
    emoji: "\u{1f9d8}",
    cooldown_months: 0,
    allow_gathering: true,
    allow_world_events: true,
    is_major: false,
    params: &["months"],
};

/// Metadata for `travel`.
pub static TRAVEL_META: ActionMeta = ActionMeta {
    name: "travel",
    display: "Traveling",
    emoji: "\u{1f3c3}",
    cooldown_months: 0,
    allow_gathering: true,
    allow_world_events: true,
    is_major: false,
    params: &["region_id"],
};

/// Metadata for `seclude`.
pub static SECLUDE_META: ActionMeta = ActionMeta {
    name: "seclude",
    display: "In Seclusion",
    emoji: "\u{26f0}",
    cooldown_months: 24,
    allow_gathering: false,
    allow_world_events: false,
    is_major: true,
    params: &["months"],
};

/// Metadata for `duel`.
pub static DUEL_META: ActionMeta = ActionMeta {
    name: "duel",
    display: "Dueling",
    emoji: "\u{2694}",
    cooldown_months: 6,
    allow_gathering: false,
    allow_world_events: true,
    is_major: true,
    params: &["target_id"],
};

/// Metadata for `flee`.
pub static FLEE_META: ActionMeta = ActionMeta {
    name: "flee",
    display: "Fleeing",
    emoji: "\u{1f4a8}",
    cooldown_months: 0,
    allow_gathering: false,
    allow_world_events: true,
    is_major: false,
    params: &["from_id"],
};

/// Metadata for `forage`.
pub static FORAGE_META: ActionMeta = ActionMeta {
    name: "forage",
    display: "Foraging",
    emoji: "\u{1f33f}",
    cooldown_months: 0,
    allow_gathering: true,
    allow_world_events: true,
    is_major: false,
    params: &["months"],
};

/// Metadata for `idle`.
pub static IDLE_META: ActionMeta = ActionMeta {
    name: "idle",
    display: "Resting",
    emoji: "\u{1f634}",
    cooldown_months: 0,
    allow_gathering: true,
    allow_world_events: true,
    is_major: false,
    params: &["months"],
};

/// All registered actions, in registry order.
pub static REGISTRY: &[&ActionMeta] = &[
    &CULTIVATE_META,
    &TRAVEL_META,
    &SECLUDE_META,
    &DUEL_META,
    &FLEE_META,
    &FORAGE_META,
    &IDLE_META,
];

/// Look up an action's metadata by registry name.
pub fn meta_for(name: &str) -> Option<&'static ActionMeta> {
    REGISTRY.iter().copied().find(|meta| meta.name == name)
}

/// Drop parameter-bag keys the action does not declare.
pub fn filter_params(
    meta: &ActionMeta,
    params: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, serde_json::Value> {
    params
        .iter()
        .filter(|(key, _)| meta.params.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_body() {
        let bodies = [
            ActionBody::Cultivate { months_done: 0, months_target: 3 },
            ActionBody::Travel { destination: RegionId::new() },
            ActionBody::Seclude { months_done: 0, months_target: 6 },
            ActionBody::Duel { target: AvatarId::new(), rounds_fought: 0 },
            ActionBody::Flee { from: AvatarId::new(), months_done: 0 },
            ActionBody::Forage { months_done: 0, months_target: 2 },
            ActionBody::Idle { months_done: 0, months_target: 1 },
        ];
        for body in bodies {
            let meta = meta_for(body.name()).unwrap();
            assert_eq!(meta.name, body.name());
            assert!(core::ptr::eq(meta, body.meta()));
        }
    }

    #[test]
    fn unknown_name_has_no_meta() {
        assert!(meta_for("transcend").is_none());
    }

    #[test]
    fn filter_drops_undeclared_keys() {
        let mut params = BTreeMap::new();
        params.insert("months".to_owned(), serde_json::json!(3));
        params.insert("hostile".to_owned(), serde_json::json!(true));
        let filtered = filter_params(&CULTIVATE_META, &params);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("months"));
    }

    #[test]
    fn statuses_split_terminal() {
        assert!(!ActionStatus::Running.is_terminal());
        for status in [
            ActionStatus::Completed,
            ActionStatus::Failed,
            ActionStatus::Cancelled,
            ActionStatus::Interrupted,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn seclusion_blocks_gatherings_and_world_events() {
        assert!(!SECLUDE_META.allow_gathering);
        assert!(!SECLUDE_META.allow_world_events);
        assert!(CULTIVATE_META.allow_gathering);
    }
}
