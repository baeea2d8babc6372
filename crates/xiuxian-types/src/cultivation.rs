//! Cultivation realms, level bands, lifespans, and sect ranks.
//!
//! The underlying measure of power is an integer `level`; the realm is
//! always derived from it in bands of 30 levels. Levels only ever
//! increase -- breakthroughs raise them, and nothing lowers them below
//! the realm floor.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::time::MONTHS_PER_YEAR;

/// Width of one realm's level band.
pub const LEVELS_PER_REALM: u32 = 30;

/// The four cultivation realms, lowest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub enum Realm {
    /// Levels 0..=29.
    QiRefinement,
    /// Levels 30..=59.
    FoundationEstablishment,
    /// Levels 60..=89.
    CoreFormation,
    /// Levels 90 and above.
    NascentSoul,
}

impl Realm {
    /// Derive the realm from an integer level.
    pub const fn from_level(level: u32) -> Self {
        match level / LEVELS_PER_REALM {
            0 => Self::QiRefinement,
            1 => Self::FoundationEstablishment,
            2 => Self::CoreFormation,
            _ => Self::NascentSoul,
        }
    }

    /// The lowest level inside this realm's band.
    pub const fn floor_level(self) -> u32 {
        match self {
            Self::QiRefinement => 0,
            Self::FoundationEstablishment => LEVELS_PER_REALM,
            Self::CoreFormation => 2 * LEVELS_PER_REALM,
            Self::NascentSoul => 3 * LEVELS_PER_REALM,
        }
    }

    /// Maximum lifespan granted by this realm, in years.
    pub const fn max_lifespan_years(self) -> u64 {
        match self {
            Self::QiRefinement => 100,
            Self::FoundationEstablishment => 200,
            Self::CoreFormation => 400,
            Self::NascentSoul => 800,
        }
    }

    /// Maximum lifespan granted by this realm, in months.
    pub const fn max_lifespan_months(self) -> u64 {
        self.max_lifespan_years() * MONTHS_PER_YEAR
    }

    /// Display name used in narrative text and the API.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::QiRefinement => "Qi Refinement",
            Self::FoundationEstablishment => "Foundation Establishment",
            Self::CoreFormation => "Core Formation",
            Self::NascentSoul => "Nascent Soul",
        }
    }
}

impl core::fmt::Display for Realm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Rank held inside a sect.
///
/// Derived from the member's realm when joining; elders and above can
/// take disciples without leaving their sect.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub enum SectRank {
    /// Entry rank for Qi Refinement members.
    OuterDisciple,
    /// Rank for Foundation Establishment members.
    InnerDisciple,
    /// Rank for Core Formation members.
    Elder,
    /// Rank for Nascent Soul members.
    GrandElder,
}

impl SectRank {
    /// Derive the joining rank from a realm.
    pub const fn from_realm(realm: Realm) -> Self {
        match realm {
            Realm::QiRefinement => Self::OuterDisciple,
            Realm::FoundationEstablishment => Self::InnerDisciple,
            Realm::CoreFormation => Self::Elder,
            Realm::NascentSoul => Self::GrandElder,
        }
    }

    /// Display name used in narrative text and the API.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::OuterDisciple => "Outer Disciple",
            Self::InnerDisciple => "Inner Disciple",
            Self::Elder => "Elder",
            Self::GrandElder => "Grand Elder",
        }
    }
}

impl core::fmt::Display for SectRank {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realm_bands() {
        assert_eq!(Realm::from_level(0), Realm::QiRefinement);
        assert_eq!(Realm::from_level(29), Realm::QiRefinement);
        assert_eq!(Realm::from_level(30), Realm::FoundationEstablishment);
        assert_eq!(Realm::from_level(59), Realm::FoundationEstablishment);
        assert_eq!(Realm::from_level(60), Realm::CoreFormation);
        assert_eq!(Realm::from_level(90), Realm::NascentSoul);
        assert_eq!(Realm::from_level(500), Realm::NascentSoul);
    }

    #[test]
    fn floors_match_bands() {
        for level in [0_u32, 15, 31, 75, 120] {
            let realm = Realm::from_level(level);
            assert!(realm.floor_level() <= level);
        }
    }

    #[test]
    fn lifespans_grow_with_realm() {
        assert!(
            Realm::QiRefinement.max_lifespan_years()
                < Realm::FoundationEstablishment.max_lifespan_years()
        );
        assert!(
            Realm::CoreFormation.max_lifespan_years() < Realm::NascentSoul.max_lifespan_years()
        );
        assert_eq!(Realm::QiRefinement.max_lifespan_months(), 1200);
    }

    #[test]
    fn rank_derivation() {
        assert_eq!(SectRank::from_realm(Realm::QiRefinement), SectRank::OuterDisciple);
        assert_eq!(SectRank::from_realm(Realm::NascentSoul), SectRank::GrandElder);
    }
}
