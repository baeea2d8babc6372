//! Live sect state.
//!
//! Sect definitions come from the static tables; this module holds the
//! mutable side -- membership, ranks, and leadership. Members join
//! either through the seeded world or through the master/disciple
//! auto-enroll performed by the relation graph.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xiuxian_types::{Alignment, AvatarId, RegionId, SectId, SectRank};

/// A cultivation sect with members and a headquarters region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sect {
    /// Stable id.
    pub id: SectId,
    /// Display name.
    pub name: String,
    /// The sect's moral alignment.
    pub alignment: Alignment,
    /// Flavor description fed into prompts.
    pub description: String,
    /// Current leader, if any.
    pub leader: Option<AvatarId>,
    /// Members and their ranks.
    pub members: BTreeMap<AvatarId, SectRank>,
    /// Headquarters region.
    pub hq_region: Option<RegionId>,
}

impl Sect {
    /// Create an empty sect.
    pub fn new(name: impl Into<String>, alignment: Alignment, description: impl Into<String>) -> Self {
        Self {
            id: SectId::new(),
            name: name.into(),
            alignment,
            description: description.into(),
            leader: None,
            members: BTreeMap::new(),
            hq_region: None,
        }
    }

    /// Add or re-rank a member.
    pub fn admit(&mut self, avatar: AvatarId, rank: SectRank) {
        self.members.insert(avatar, rank);
    }

    /// Remove a member; clears leadership if the leader leaves.
    pub fn expel(&mut self, avatar: AvatarId) {
        self.members.remove(&avatar);
        if self.leader == Some(avatar) {
            self.leader = None;
        }
    }

    /// Whether an avatar belongs to this sect.
    pub fn has_member(&self, avatar: AvatarId) -> bool {
        self.members.contains_key(&avatar)
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admit_and_expel() {
        let mut sect = Sect::new("Heavenly Sword Sect", Alignment::Righteous, "Blades in the clouds.");
        let member = AvatarId::new();
        sect.admit(member, SectRank::OuterDisciple);
        assert!(sect.has_member(member));
        assert_eq!(sect.member_count(), 1);

        sect.expel(member);
        assert!(!sect.has_member(member));
    }

    #[test]
    fn expelling_the_leader_clears_leadership() {
        let mut sect = Sect::new("Black Lotus Pavilion", Alignment::Demonic, "Whispers in the dark.");
        let leader = AvatarId::new();
        sect.admit(leader, SectRank::GrandElder);
        sect.leader = Some(leader);

        sect.expel(leader);
        assert_eq!(sect.leader, None);
    }
}
