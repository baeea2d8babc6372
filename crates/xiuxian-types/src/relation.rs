//! Relation labels between avatars.
//!
//! An edge A→B carries a [`RelationKind`] describing what B is *to* A
//! (`Master` means "B is A's master"). Every stored edge has a mirror
//! edge B→A carrying the [reciprocal] label; symmetric labels are their
//! own reciprocal.
//!
//! Labels split three ways:
//!
//! - **innate** (blood) labels may never be cancelled;
//! - **derived** labels are computed from first-order edges during the
//!   yearly refresh and never stored in the asserted graph;
//! - everything else is a social label created and cancelled at runtime.
//!
//! `Kin` is reserved: it participates in the tables but nothing in the
//! simulation currently produces it.
//!
//! [reciprocal]: RelationKind::reciprocal

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A directed relation label from one avatar to another.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub enum RelationKind {
    /// The target is this avatar's parent. Innate.
    Parent,
    /// The target is this avatar's child. Innate.
    Child,
    /// The target is this avatar's sibling. Innate, symmetric.
    Sibling,
    /// The target is a blood relative of unspecified degree. Innate,
    /// symmetric, reserved (no production path).
    Kin,
    /// The target is a sworn sibling. Symmetric.
    SwornSibling,
    /// The target is this avatar's master.
    Master,
    /// The target is this avatar's disciple.
    Disciple,
    /// The target is this avatar's dao companion. Symmetric.
    Lover,
    /// The target is a friend. Symmetric.
    Friend,
    /// The target is an enemy. Symmetric.
    Enemy,
    /// Derived: parent's parent.
    GrandParent,
    /// Derived: child's child.
    GrandChild,
    /// Derived: master's master.
    MartialGrandmaster,
    /// Derived: disciple's disciple.
    MartialGrandchild,
    /// Derived: fellow disciple under a shared master. Symmetric.
    MartialSibling,
}

impl RelationKind {
    /// The label that must be stored on the mirror edge B→A when A→B
    /// carries `self`. Symmetric labels return themselves.
    pub const fn reciprocal(self) -> Self {
        match self {
            Self::Parent => Self::Child,
            Self::Child => Self::Parent,
            Self::Master => Self::Disciple,
            Self::Disciple => Self::Master,
            Self::GrandParent => Self::GrandChild,
            Self::GrandChild => Self::GrandParent,
            Self::MartialGrandmaster => Self::MartialGrandchild,
            Self::MartialGrandchild => Self::MartialGrandmaster,
            Self::Sibling
            | Self::Kin
            | Self::SwornSibling
            | Self::Lover
            | Self::Friend
            | Self::Enemy
            | Self::MartialSibling => self,
        }
    }

    /// Whether this is a blood label that can never be cancelled.
    pub const fn is_innate(self) -> bool {
        matches!(
            self,
            Self::Parent | Self::Child | Self::Sibling | Self::Kin | Self::GrandParent | Self::GrandChild
        )
    }

    /// Whether this label belongs to the derived (computed) set and must
    /// never be written into the asserted graph.
    pub const fn is_derived(self) -> bool {
        matches!(
            self,
            Self::GrandParent
                | Self::GrandChild
                | Self::MartialGrandmaster
                | Self::MartialGrandchild
                | Self::MartialSibling
        )
    }

    /// Stable lowercase name used in prompts, save files, and LLM
    /// decisions.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Child => "child",
            Self::Sibling => "sibling",
            Self::Kin => "kin",
            Self::SwornSibling => "sworn_sibling",
            Self::Master => "master",
            Self::Disciple => "disciple",
            Self::Lover => "lover",
            Self::Friend => "friend",
            Self::Enemy => "enemy",
            Self::GrandParent => "grand_parent",
            Self::GrandChild => "grand_child",
            Self::MartialGrandmaster => "martial_grandmaster",
            Self::MartialGrandchild => "martial_grandchild",
            Self::MartialSibling => "martial_sibling",
        }
    }

    /// Parse a label produced by the LLM or stored in a save file.
    ///
    /// Matching is case-insensitive and tolerates hyphens for
    /// underscores. Returns `None` for unknown labels.
    pub fn parse_label(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "parent" => Some(Self::Parent),
            "child" => Some(Self::Child),
            "sibling" => Some(Self::Sibling),
            "kin" => Some(Self::Kin),
            "sworn_sibling" => Some(Self::SwornSibling),
            "master" => Some(Self::Master),
            "disciple" | "apprentice" => Some(Self::Disciple),
            "lover" | "lovers" | "dao_companion" => Some(Self::Lover),
            "friend" => Some(Self::Friend),
            "enemy" => Some(Self::Enemy),
            "grand_parent" => Some(Self::GrandParent),
            "grand_child" => Some(Self::GrandChild),
            "martial_grandmaster" => Some(Self::MartialGrandmaster),
            "martial_grandchild" => Some(Self::MartialGrandchild),
            "martial_sibling" => Some(Self::MartialSibling),
            _ => None,
        }
    }
}

impl core::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}
