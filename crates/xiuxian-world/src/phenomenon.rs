//! World-wide celestial phenomena.
//!
//! Exactly one phenomenon is active at a time. It carries a set of
//! effect tags (e.g. `cultivation_speed: +20`) that derived-attribute
//! recomputation consults, and a duration in years. The simulator
//! rotates it each January once the duration has elapsed.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A world-wide buff or debuff active for a bounded number of years.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CelestialPhenomenon {
    /// Display name, e.g. "Spirit Tide".
    pub name: String,
    /// Narrative description fed into prompts and the UI.
    pub description: String,
    /// Effect tags applied world-wide while active. Positive values are
    /// buffs, negative are debuffs; the keys are consumed by the
    /// derived-attribute recompute.
    pub effects: BTreeMap<String, i64>,
    /// How many years the phenomenon lasts before rotation.
    pub duration_years: u64,
}

/// Pick a random phenomenon from the catalogue, avoiding an immediate
/// repeat of `current` when the catalogue has alternatives.
///
/// Returns `None` only for an empty catalogue.
pub fn pick_phenomenon<'a, R: Rng>(
    catalogue: &'a [CelestialPhenomenon],
    current: Option<&str>,
    rng: &mut R,
) -> Option<&'a CelestialPhenomenon> {
    if catalogue.is_empty() {
        return None;
    }
    let candidates: Vec<&CelestialPhenomenon> = catalogue
        .iter()
        .filter(|p| Some(p.name.as_str()) != current)
        .collect();
    if candidates.is_empty() {
        // Single-entry catalogue: repeating is the only option.
        return catalogue.first();
    }
    let idx = rng.random_range(0..candidates.len());
    candidates.get(idx).copied()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    fn phenomenon(name: &str) -> CelestialPhenomenon {
        CelestialPhenomenon {
            name: name.to_owned(),
            description: format!("{name} covers the land."),
            effects: BTreeMap::new(),
            duration_years: 5,
        }
    }

    #[test]
    fn empty_catalogue_yields_none() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(pick_phenomenon(&[], None, &mut rng).is_none());
    }

    #[test]
    fn rotation_avoids_immediate_repeat() {
        let catalogue = vec![phenomenon("Spirit Tide"), phenomenon("Heavenly Drought")];
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..20 {
            let picked = pick_phenomenon(&catalogue, Some("Spirit Tide"), &mut rng).unwrap();
            assert_eq!(picked.name, "Heavenly Drought");
        }
    }

    #[test]
    fn single_entry_catalogue_repeats() {
        let catalogue = vec![phenomenon("Spirit Tide")];
        let mut rng = SmallRng::seed_from_u64(3);
        let picked = pick_phenomenon(&catalogue, Some("Spirit Tide"), &mut rng).unwrap();
        assert_eq!(picked.name, "Spirit Tide");
    }
}
