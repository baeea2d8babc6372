//! Small shared enumerations: gender, alignment, death causes, objective
//! origins.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::AvatarId;

/// Biological gender of an avatar or mortal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub enum Gender {
    /// Male.
    Male,
    /// Female.
    Female,
}

impl Gender {
    /// The opposite gender.
    pub const fn opposite(self) -> Self {
        match self {
            Self::Male => Self::Female,
            Self::Female => Self::Male,
        }
    }
}

/// Moral alignment of an avatar, shown in prompts and the UI.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub enum Alignment {
    /// Orthodox, upholds sect law.
    Righteous,
    /// Pragmatic, keeps to themselves.
    Neutral,
    /// Demonic path, feared by others.
    Demonic,
}

/// Why an avatar died.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum DeathCause {
    /// Lifespan exhausted for the avatar's realm.
    OldAge,
    /// Hit points fell to zero outside combat settlement.
    SeriousInjury,
    /// Killed in combat by another avatar.
    Killed {
        /// The avatar who delivered the killing blow.
        by: AvatarId,
    },
}

impl core::fmt::Display for DeathCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OldAge => f.write_str("passed away of old age, lifespan exhausted"),
            Self::SeriousInjury => f.write_str("succumbed to grievous injuries"),
            Self::Killed { .. } => f.write_str("fell in battle"),
        }
    }
}

/// Where a long-term objective came from.
///
/// A user-set objective is never overwritten by the yearly LLM review.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub enum ObjectiveOrigin {
    /// Chosen by the avatar's own yearly review.
    Llm,
    /// Pinned by an operator through the UI.
    User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_opposite_is_involutive() {
        assert_eq!(Gender::Male.opposite(), Gender::Female);
        assert_eq!(Gender::Female.opposite().opposite(), Gender::Female);
    }

    #[test]
    fn death_cause_display_is_narrative() {
        let text = DeathCause::OldAge.to_string();
        assert!(text.contains("old age"));
    }
}
