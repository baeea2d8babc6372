//! Fortune and misfortune rollers.
//!
//! Each living avatar gets an independent Bernoulli roll per month
//! (gated by the current action's world-event flag). On a hit, a
//! weighted record is picked from the static catalogue, filtered by the
//! avatar's realm band and current eligibility -- a weapon windfall
//! only lands on someone whose weapon is below the windfall's grade.
//! The roller is free to return nothing at all.

use rand::Rng;
use rand::rngs::SmallRng;
use tracing::debug;
use xiuxian_types::{Event, MonthStamp};
use xiuxian_world::WorldData;
use xiuxian_world::statics::{FortuneKind, FortuneRecord};

use crate::StorySeed;
use crate::avatar::{Avatar, ItemInstance, TemporaryEffect};

/// Months a heart-demon debuff lingers.
const HEART_DEMON_MONTHS: u64 = 12;

/// Level cap on a single insight windfall.
const MAX_INSIGHT_LEVELS: u32 = 5;

/// Roll one catalogue against one avatar.
///
/// Returns the event describing what happened plus a story seed for the
/// narrative generator, or `None` when the roll misses, nothing is
/// eligible, or world events are blocked by the current action.
pub fn try_trigger(
    avatar: &mut Avatar,
    catalogue: &[FortuneRecord],
    probability: f64,
    data: &WorldData,
    now: MonthStamp,
    rng: &mut SmallRng,
) -> Option<(Event, StorySeed)> {
    if avatar.is_dead || !avatar.allows_world_events() {
        return None;
    }
    if probability <= 0.0 || !rng.random_bool(probability.clamp(0.0, 1.0)) {
        return None;
    }

    let eligible: Vec<&FortuneRecord> = catalogue
        .iter()
        .filter(|record| is_eligible(avatar, record, data))
        .collect();
    let record = weighted_pick(&eligible, rng)?;
    debug!(avatar_id = %avatar.id, record = %record.name, "world event fired");

    let effect_text = apply_record(avatar, record, data, now, rng)?;
    let content = format!("{}: {} — {effect_text}", avatar.name, record.name);
    let event = Event::new(now, content, vec![avatar.id]);
    let seed = StorySeed {
        seed: format!("{} encountered {}", avatar.name, record.narrative_seed),
        participants: vec![avatar.id],
        is_major: false,
    };
    Some((event, seed))
}

/// Whether a record applies to this avatar right now.
fn is_eligible(avatar: &Avatar, record: &FortuneRecord, data: &WorldData) -> bool {
    let level = avatar.level();
    if level < record.min_level || level > record.max_level {
        return false;
    }
    match record.kind {
        FortuneKind::Weapon => {
            // Only worthwhile when the current weapon is below the
            // windfall's grade ceiling.
            let current_grade = avatar
                .weapon
                .as_ref()
                .and_then(|weapon| data.weapons.get(&weapon.template))
                .map_or(0, |template| i64::from(template.grade));
            current_grade < record.magnitude
        }
        FortuneKind::Technique => {
            let current_grade = avatar
                .technique
                .as_ref()
                .and_then(|name| data.techniques.get(name))
                .map_or(0, |template| i64::from(template.grade));
            current_grade < record.magnitude
        }
        FortuneKind::Theft => avatar.spirit_stones > 0,
        FortuneKind::SpiritStones
        | FortuneKind::Insight
        | FortuneKind::Injury
        | FortuneKind::HeartDemon => true,
    }
}

/// Weighted pick over the eligible records.
fn weighted_pick<'a>(eligible: &[&'a FortuneRecord], rng: &mut SmallRng) -> Option<&'a FortuneRecord> {
    let total: u64 = eligible.iter().map(|record| u64::from(record.weight)).sum();
    if total == 0 {
        return None;
    }
    let mut roll = rng.random_range(0..total);
    for record in eligible {
        let weight = u64::from(record.weight);
        if roll < weight {
            return Some(record);
        }
        roll = roll.saturating_sub(weight);
    }
    None
}

/// Apply a record's effect. Returns the effect description, or `None`
/// when the effect turned out to be empty (e.g. no grantable template).
fn apply_record(
    avatar: &mut Avatar,
    record: &FortuneRecord,
    data: &WorldData,
    now: MonthStamp,
    rng: &mut SmallRng,
) -> Option<String> {
    match record.kind {
        FortuneKind::Weapon => {
            let current_grade = avatar
                .weapon
                .as_ref()
                .and_then(|weapon| data.weapons.get(&weapon.template))
                .map_or(0, |template| i64::from(template.grade));
            let candidates: Vec<&str> = data
                .weapons
                .values()
                .filter(|template| {
                    i64::from(template.grade) <= record.magnitude
                        && i64::from(template.grade) > current_grade
                })
                .map(|template| template.name.as_str())
                .collect();
            let chosen = *pick_one(&candidates, rng)?;
            avatar.weapon = Some(ItemInstance::of(chosen));
            Some(format!("obtained the weapon {chosen}"))
        }
        FortuneKind::Technique => {
            let current_grade = avatar
                .technique
                .as_ref()
                .and_then(|name| data.techniques.get(name))
                .map_or(0, |template| i64::from(template.grade));
            let candidates: Vec<&str> = data
                .techniques
                .values()
                .filter(|template| {
                    i64::from(template.grade) <= record.magnitude
                        && i64::from(template.grade) > current_grade
                })
                .map(|template| template.name.as_str())
                .collect();
            let chosen = *pick_one(&candidates, rng)?;
            avatar.technique = Some(chosen.to_owned());
            Some(format!("learned the technique {chosen}"))
        }
        FortuneKind::SpiritStones => {
            avatar.spirit_stones = avatar.spirit_stones.saturating_add(record.magnitude);
            Some(format!("gained {} spirit stones", record.magnitude))
        }
        FortuneKind::Insight => {
            let levels = u32::try_from(record.magnitude.max(1))
                .unwrap_or(1)
                .min(MAX_INSIGHT_LEVELS);
            avatar.raise_level(levels);
            Some(format!("gained {levels} levels of sudden insight"))
        }
        FortuneKind::Injury => {
            avatar.hp.damage(record.magnitude.max(0));
            Some(format!("suffered {} points of injury", record.magnitude))
        }
        FortuneKind::Theft => {
            let stolen = record.magnitude.max(0).min(avatar.spirit_stones);
            avatar.spirit_stones = avatar.spirit_stones.saturating_sub(stolen);
            Some(format!("was robbed of {stolen} spirit stones"))
        }
        FortuneKind::HeartDemon => {
            avatar.temporary_effects.push(TemporaryEffect {
                source: record.name.clone(),
                effects: [("cultivation_speed".to_owned(), -record.magnitude.max(0))]
                    .into_iter()
                    .collect(),
                started_at: now,
                duration_months: HEART_DEMON_MONTHS,
            });
            Some("fell prey to a heart demon".to_owned())
        }
    }
}

/// Pick a random slice element.
fn pick_one<'a, T>(items: &'a [T], rng: &mut SmallRng) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        items.get(rng.random_range(0..items.len()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use xiuxian_types::Gender;

    use super::*;

    fn avatar() -> Avatar {
        Avatar::new("Li Chen", Gender::Male, MonthStamp(0), 10, (0, 0))
    }

    #[test]
    fn zero_probability_never_fires() {
        let data = WorldData::minimal();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut subject = avatar();
        for _ in 0..100 {
            assert!(
                try_trigger(&mut subject, &data.fortunes, 0.0, &data, MonthStamp(1), &mut rng)
                    .is_none()
            );
        }
    }

    #[test]
    fn certain_probability_fires_something_eligible() {
        let data = WorldData::minimal();
        let mut rng = SmallRng::seed_from_u64(2);
        let mut subject = avatar();
        let (event, seed) =
            try_trigger(&mut subject, &data.fortunes, 1.0, &data, MonthStamp(1), &mut rng).unwrap();
        assert_eq!(event.participants, vec![subject.id]);
        assert_eq!(seed.participants, vec![subject.id]);
    }

    #[test]
    fn seclusion_blocks_world_events() {
        let data = WorldData::minimal();
        let mut rng = SmallRng::seed_from_u64(3);
        let mut subject = avatar();
        subject.current_action = Some(crate::actions::ActionInstance {
            seq: 0,
            body: crate::actions::ActionBody::Seclude { months_done: 0, months_target: 6 },
            status: crate::actions::ActionStatus::Running,
        });
        assert!(
            try_trigger(&mut subject, &data.fortunes, 1.0, &data, MonthStamp(1), &mut rng).is_none()
        );
    }

    #[test]
    fn weapon_windfall_respects_current_grade() {
        let data = WorldData::minimal();
        let mut subject = avatar();
        // Holding the grade-4 saber: a grade-3 windfall is not eligible.
        subject.weapon = Some(ItemInstance::of("Starfall Saber"));
        let record = data
            .fortunes
            .iter()
            .find(|record| record.kind == FortuneKind::Weapon)
            .unwrap();
        assert!(!is_eligible(&subject, record, &data));

        subject.weapon = Some(ItemInstance::of("Iron Sword"));
        assert!(is_eligible(&subject, record, &data));
    }

    #[test]
    fn theft_requires_something_to_steal() {
        let data = WorldData::minimal();
        let mut subject = avatar();
        let record = data
            .misfortunes
            .iter()
            .find(|record| record.kind == FortuneKind::Theft)
            .unwrap();
        assert!(!is_eligible(&subject, record, &data));
        subject.spirit_stones = 50;
        assert!(is_eligible(&subject, record, &data));

        let mut rng = SmallRng::seed_from_u64(4);
        let text = apply_record(&mut subject, record, &data, MonthStamp(1), &mut rng).unwrap();
        // Magnitude 100 but only 50 held: everything is taken, no debt.
        assert_eq!(subject.spirit_stones, 0);
        assert!(text.contains("50"));
    }

    #[test]
    fn insight_is_capped() {
        let data = WorldData::minimal();
        let mut subject = avatar();
        let record = FortuneRecord {
            name: "Dao Epiphany".to_owned(),
            weight: 1,
            min_level: 0,
            max_level: 120,
            kind: FortuneKind::Insight,
            magnitude: 99,
            narrative_seed: "a moment of clarity".to_owned(),
        };
        let mut rng = SmallRng::seed_from_u64(5);
        apply_record(&mut subject, &record, &data, MonthStamp(1), &mut rng).unwrap();
        assert_eq!(subject.level(), 15);
    }

    #[test]
    fn level_band_filters() {
        let data = WorldData::minimal();
        let mut subject = avatar();
        subject.raise_level(80); // level 90, Nascent Soul
        let record = data
            .misfortunes
            .iter()
            .find(|record| record.name == "Bandit Ambush")
            .unwrap();
        // Bandits do not trouble a Nascent Soul elder (max_level 59).
        assert!(!is_eligible(&subject, record, &data));
    }
}
