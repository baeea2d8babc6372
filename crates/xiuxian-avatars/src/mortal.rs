//! Mortals: non-cultivators living in the world's cities.
//!
//! Mortals are lightweight records. They age, they die at the mortal
//! lifespan cap, and each month a few of them may awaken into avatars --
//! keeping their id, name, and parentage across the promotion.

use serde::{Deserialize, Serialize};
use xiuxian_types::{AvatarId, Gender, MonthStamp, MortalId, RegionId};

/// Maximum mortal lifespan, in years.
pub const MORTAL_MAX_LIFESPAN_YEARS: u64 = 80;

/// A non-cultivator person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mortal {
    /// Stable id, preserved across awakening.
    pub id: MortalId,
    /// Display name.
    pub name: String,
    /// Gender.
    pub gender: Gender,
    /// Birth month.
    pub birth_stamp: MonthStamp,
    /// Avatar parents, when born to a dao-companion pair.
    pub parents: Vec<AvatarId>,
    /// The region the mortal was born in, if known.
    pub born_region: Option<RegionId>,
}

impl Mortal {
    /// Age in whole months at `now`.
    pub const fn age_months(&self, now: MonthStamp) -> u64 {
        now.months_since(self.birth_stamp)
    }

    /// Whether the mortal has exceeded the mortal lifespan.
    pub const fn is_past_lifespan(&self, now: MonthStamp) -> bool {
        self.age_months(now) >= MORTAL_MAX_LIFESPAN_YEARS * xiuxian_types::time::MONTHS_PER_YEAR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifespan_boundary() {
        let mortal = Mortal {
            id: MortalId::new(),
            name: "Old Wang".to_owned(),
            gender: Gender::Male,
            birth_stamp: MonthStamp(0),
            parents: vec![],
            born_region: None,
        };
        assert!(!mortal.is_past_lifespan(MonthStamp(80 * 12 - 1)));
        assert!(mortal.is_past_lifespan(MonthStamp(80 * 12)));
    }
}
