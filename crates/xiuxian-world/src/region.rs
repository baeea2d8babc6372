//! Named regions of the map.
//!
//! A region is a named area with a kind-specific role: cities hold
//! mortals and prosperity, sect headquarters anchor a sect, cultivation
//! grottos can be claimed by a single host avatar, and wilds are
//! featureless. Region ownership obeys a two-way invariant with the
//! host's `owned_regions` set, maintained by the callers that perform
//! claims and releases.

use serde::{Deserialize, Serialize};
use xiuxian_types::{AvatarId, RegionId, SectId};

/// What role a region plays in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionKind {
    /// A mortal city; accrues prosperity.
    City,
    /// Headquarters of a sect.
    SectHq,
    /// A cultivation grotto claimable by one host avatar.
    Grotto,
    /// Untamed wilderness.
    Wild,
}

/// A named area on the map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Stable id.
    pub id: RegionId,
    /// Display name.
    pub name: String,
    /// Role of the region.
    pub kind: RegionKind,
    /// Center tile.
    pub center: (u32, u32),
    /// Half-width of the stamped square extent.
    pub extent: u32,
    /// The avatar hosting this region (grottos only).
    pub host_avatar: Option<AvatarId>,
    /// The sect anchored here (sect headquarters only).
    pub sect: Option<SectId>,
    /// Prosperity score (cities only); drifts upward monthly and moves
    /// with events.
    pub prosperity: i64,
    /// Flavor text describing local resources, fed into prompts.
    pub resources: String,
}

impl Region {
    /// Create a region with no host, no sect, and zero prosperity.
    pub fn new(name: impl Into<String>, kind: RegionKind, center: (u32, u32), extent: u32) -> Self {
        Self {
            id: RegionId::new(),
            name: name.into(),
            kind,
            center,
            extent,
            host_avatar: None,
            sect: None,
            prosperity: 0,
            resources: String::new(),
        }
    }

    /// Whether this region is a grotto without a host.
    pub const fn is_unclaimed_grotto(&self) -> bool {
        matches!(self.kind, RegionKind::Grotto) && self.host_avatar.is_none()
    }

    /// Adjust prosperity, saturating at the i64 bounds.
    pub const fn change_prosperity(&mut self, delta: i64) {
        self.prosperity = self.prosperity.saturating_add(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grotto_claim_state() {
        let mut region = Region::new("Azure Mist Grotto", RegionKind::Grotto, (3, 3), 1);
        assert!(region.is_unclaimed_grotto());
        region.host_avatar = Some(AvatarId::new());
        assert!(!region.is_unclaimed_grotto());
    }

    #[test]
    fn cities_are_never_claimable() {
        let region = Region::new("Riverfall City", RegionKind::City, (5, 5), 2);
        assert!(!region.is_unclaimed_grotto());
    }

    #[test]
    fn prosperity_saturates() {
        let mut region = Region::new("Riverfall City", RegionKind::City, (5, 5), 2);
        region.prosperity = i64::MAX;
        region.change_prosperity(1);
        assert_eq!(region.prosperity, i64::MAX);
        region.change_prosperity(-10);
        assert_eq!(region.prosperity, i64::MAX - 10);
    }
}
