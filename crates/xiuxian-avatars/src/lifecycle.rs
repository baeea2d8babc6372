//! Lifecycle transitions: death, ageing, awakening, and births.
//!
//! Death is irrevocable and runs through [`apply_death`], the single
//! place that tears down a dying avatar's runtime state: plans and the
//! current action are cleared, hosted regions are released, sect
//! membership ends, and the death is recorded for the UI diff drain.
//!
//! Awakening promotes a mortal into an avatar while preserving the
//! underlying id; births add mortals (or, rarely, cultivator children)
//! to dao-companion pairs whose bond is old enough.

use std::collections::BTreeMap;

use rand::Rng;
use rand::rngs::SmallRng;
use tracing::{debug, info};
use xiuxian_types::{
    AvatarId, DeathCause, Event, Gender, MonthStamp, RegionId, RelationKind, SectId,
};
use xiuxian_world::{Map, Region, Sect, WorldData};

use crate::avatar::{Avatar, DeathInfo};
use crate::mortal::Mortal;
use crate::relations;
use crate::store::EntityStore;

/// Months a dao-companion bond must last before children may come.
pub const LOVER_BOND_MONTHS_FOR_BIRTH: u64 = 24;

/// One child in this many is born with spiritual roots already open.
const AVATAR_CHILD_ODDS: u32 = 8;

/// Mark an avatar dead and tear down its runtime state.
///
/// Clears plans and the current action, releases every hosted region,
/// removes the avatar from its sect, records `death_info`, and queues
/// the id in the newly-dead drain set. Returns the major death event,
/// or `None` when the avatar is unknown or already dead.
pub fn apply_death(
    store: &mut EntityStore,
    regions: &mut BTreeMap<RegionId, Region>,
    sects: &mut BTreeMap<SectId, Sect>,
    id: AvatarId,
    cause: DeathCause,
    now: MonthStamp,
) -> Option<Event> {
    let avatar = store.get_mut(id)?;
    if avatar.is_dead {
        return None;
    }

    avatar.plans.clear();
    avatar.current_action = None;
    avatar.new_action_this_step = false;
    avatar.is_dead = true;
    avatar.death_info = Some(DeathInfo {
        stamp: now,
        cause: cause.clone(),
        location: avatar.pos,
    });

    let name = avatar.name.clone();
    let owned: Vec<RegionId> = avatar.owned_regions.iter().copied().collect();
    avatar.owned_regions.clear();
    let sect = avatar.sect.take();
    avatar.sect_rank = None;

    for region_id in owned {
        if let Some(region) = regions.get_mut(&region_id) {
            region.host_avatar = None;
        }
    }
    if let Some(sect_id) = sect
        && let Some(sect) = sects.get_mut(&sect_id)
    {
        sect.expel(id);
    }

    store.mark_newly_dead(id);
    info!(avatar_id = %id, %cause, "avatar died");

    let participants = match cause {
        DeathCause::Killed { by } => vec![id, by],
        DeathCause::OldAge | DeathCause::SeriousInjury => vec![id],
    };
    Some(Event::major(now, format!("{name} {cause}."), participants))
}

/// Phase 9: check every living avatar for non-combat death.
///
/// Grievous injuries (hp at or below zero) are checked before lifespan.
/// Dead avatars are removed from the `living` list so later phases no
/// longer see them.
pub fn resolve_deaths(
    store: &mut EntityStore,
    regions: &mut BTreeMap<RegionId, Region>,
    sects: &mut BTreeMap<SectId, Sect>,
    living: &mut Vec<AvatarId>,
    now: MonthStamp,
) -> Vec<Event> {
    let mut events = Vec::new();
    let mut dead = Vec::new();

    for &id in living.iter() {
        let Some(avatar) = store.get(id) else {
            continue;
        };
        let cause = if avatar.hp.cur <= 0 {
            Some(DeathCause::SeriousInjury)
        } else if avatar.is_past_lifespan() {
            Some(DeathCause::OldAge)
        } else {
            None
        };
        if let Some(cause) = cause {
            if let Some(event) = apply_death(store, regions, sects, id, cause, now) {
                events.push(event);
            }
            dead.push(id);
        }
    }

    living.retain(|id| !dead.contains(id));
    events
}

/// Advance every survivor's age by one month.
pub fn advance_ages(store: &mut EntityStore, living: &[AvatarId]) {
    for &id in living {
        if let Some(avatar) = store.get_mut(id) {
            avatar.age_months = avatar.age_months.saturating_add(1);
        }
    }
}

/// Awakening: mortals may open their spiritual roots and become
/// avatars (preserving their id), and occasionally a rogue cultivator
/// wanders in from beyond the map's edge.
#[allow(clippy::too_many_arguments)]
pub fn process_awakening(
    store: &mut EntityStore,
    sects: &mut BTreeMap<SectId, Sect>,
    regions: &BTreeMap<RegionId, Region>,
    data: &WorldData,
    map: &Map,
    awakening_rate: f64,
    rogue_rate: f64,
    now: MonthStamp,
    rng: &mut SmallRng,
) -> Vec<Event> {
    let mut events = Vec::new();

    let mortal_ids: Vec<_> = store.mortals().map(|mortal| mortal.id).collect();
    for mortal_id in mortal_ids {
        if awakening_rate <= 0.0 || !rng.random_bool(awakening_rate.clamp(0.0, 1.0)) {
            continue;
        }
        let Some(mortal) = store.remove_mortal(mortal_id) else {
            continue;
        };
        let pos = mortal
            .born_region
            .and_then(|region_id| regions.get(&region_id))
            .map_or((map.width() / 2, map.height() / 2), |region| region.center);

        let mut avatar = Avatar::new(mortal.name.clone(), mortal.gender, mortal.birth_stamp, 1, pos);
        // Awakening preserves the identity across the promotion.
        avatar.id = AvatarId::from(mortal.id.into_inner());
        avatar.age_months = mortal.age_months(now);
        let avatar_id = avatar.id;
        let name = avatar.name.clone();
        store.register(avatar, true);
        debug!(avatar_id = %avatar_id, "mortal awakened");

        for parent in &mortal.parents {
            if store.get(*parent).is_some() {
                // From the child's viewpoint the parent carries `Parent`.
                let _ = relations::set_relation(
                    store,
                    sects,
                    avatar_id,
                    *parent,
                    RelationKind::Parent,
                    now,
                );
            }
        }

        events.push(Event::major(
            now,
            format!("{name} awakened to spiritual roots and stepped onto the path of cultivation."),
            vec![avatar_id],
        ));
    }

    if rogue_rate > 0.0 && rng.random_bool(rogue_rate.clamp(0.0, 1.0)) {
        let gender = if rng.random_bool(0.5) { Gender::Male } else { Gender::Female };
        let name = data.names.random_name(gender, rng);
        let pos = (
            rng.random_range(0..map.width().max(1)),
            rng.random_range(0..map.height().max(1)),
        );
        let level = rng.random_range(1..=10);
        let birth = MonthStamp(now.0.saturating_sub(rng.random_range(16..=40) * 12));
        let mut avatar = Avatar::new(name.clone(), gender, birth, level, pos);
        avatar.age_months = now.months_since(birth);
        let avatar_id = avatar.id;
        store.register(avatar, true);

        events.push(Event::new(
            now,
            format!("A rogue cultivator named {name} drifted into these lands."),
            vec![avatar_id],
        ));
    }

    events
}

/// Births: every dao-companion pair whose bond has lasted long enough
/// rolls for a child. Children are mortals, except one in
/// [`AVATAR_CHILD_ODDS`] who is born with open roots as a level-1
/// avatar, parental edges wired immediately.
pub fn process_births(
    store: &mut EntityStore,
    sects: &mut BTreeMap<SectId, Sect>,
    regions: &BTreeMap<RegionId, Region>,
    data: &WorldData,
    map: &Map,
    birth_probability: f64,
    now: MonthStamp,
    rng: &mut SmallRng,
) -> Vec<Event> {
    let mut events = Vec::new();

    // Collect qualifying pairs first; mutation follows.
    let mut pairs: Vec<(AvatarId, AvatarId)> = Vec::new();
    for id in store.living_ids() {
        let Some(avatar) = store.get(id) else {
            continue;
        };
        for (&partner, &kind) in &avatar.relations {
            if kind != RelationKind::Lover || id >= partner {
                continue;
            }
            let bond_ok = avatar
                .relation_started
                .get(&partner)
                .is_some_and(|started| now.months_since(*started) >= LOVER_BOND_MONTHS_FOR_BIRTH);
            let partner_alive = store.get(partner).is_some_and(|p| !p.is_dead);
            if bond_ok && partner_alive {
                pairs.push((id, partner));
            }
        }
    }

    for (a, b) in pairs {
        if birth_probability <= 0.0 || !rng.random_bool(birth_probability.clamp(0.0, 1.0)) {
            continue;
        }
        let (Some(avatar_a), Some(avatar_b)) = (store.get(a), store.get(b)) else {
            continue;
        };
        let mother = if avatar_a.gender == Gender::Female { avatar_a } else { avatar_b };
        let mother_pos = mother.pos;
        let parent_names = (avatar_a.name.clone(), avatar_b.name.clone());

        let gender = if rng.random_bool(0.5) { Gender::Male } else { Gender::Female };
        let child_name = data.names.random_name(gender, rng);
        let born_region = map.region_at(mother_pos.0, mother_pos.1).ok().flatten();

        if rng.random_range(0..AVATAR_CHILD_ODDS) == 0 {
            // Born with open roots: a cultivator from the first breath.
            let child = Avatar::new(child_name.clone(), gender, now, 1, mother_pos);
            let child_id = child.id;
            store.register(child, true);
            let _ = relations::set_relation(store, sects, child_id, a, RelationKind::Parent, now);
            let _ = relations::set_relation(store, sects, child_id, b, RelationKind::Parent, now);
            events.push(Event::major(
                now,
                format!(
                    "{} and {} welcomed a child, {child_name}, born with open spiritual roots.",
                    parent_names.0, parent_names.1
                ),
                vec![a, b, child_id],
            ));
        } else {
            let mortal = Mortal {
                id: xiuxian_types::MortalId::new(),
                name: child_name.clone(),
                gender,
                birth_stamp: now,
                parents: vec![a, b],
                born_region,
            };
            let mortal_id = mortal.id;
            store.register_mortal(mortal);
            for parent in [a, b] {
                if let Some(avatar) = store.get_mut(parent) {
                    avatar.children.push(mortal_id);
                }
            }
            events.push(Event::major(
                now,
                format!("{} and {} welcomed a child, {child_name}.", parent_names.0, parent_names.1),
                vec![a, b],
            ));
        }
    }

    events
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use xiuxian_world::RegionKind;

    fn fixtures() -> (
        EntityStore,
        BTreeMap<RegionId, Region>,
        BTreeMap<SectId, Sect>,
        WorldData,
        Map,
        SmallRng,
    ) {
        (
            EntityStore::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            WorldData::minimal(),
            Map::new(32, 32),
            SmallRng::seed_from_u64(9),
        )
    }

    fn add_avatar(store: &mut EntityStore, name: &str, gender: Gender, level: u32) -> AvatarId {
        let avatar = Avatar::new(name, gender, MonthStamp(0), level, (5, 5));
        let id = avatar.id;
        store.register(avatar, false);
        id
    }

    #[test]
    fn death_tears_down_everything() {
        let (mut store, mut regions, mut sects, ..) = fixtures();
        let id = add_avatar(&mut store, "A", Gender::Male, 10);

        let mut grotto = Region::new("Azure Mist Grotto", RegionKind::Grotto, (3, 3), 1);
        grotto.host_avatar = Some(id);
        let grotto_id = grotto.id;
        regions.insert(grotto_id, grotto);

        let mut sect = Sect::new("Heavenly Sword Sect", xiuxian_types::Alignment::Righteous, "x");
        let sect_id = sect.id;
        sect.admit(id, xiuxian_types::SectRank::OuterDisciple);
        sects.insert(sect_id, sect);

        {
            let avatar = store.get_mut(id).unwrap();
            avatar.owned_regions.insert(grotto_id);
            avatar.sect = Some(sect_id);
            avatar.plans.push_back(crate::actions::ActionPlan::bare("cultivate"));
        }

        let event = apply_death(
            &mut store,
            &mut regions,
            &mut sects,
            id,
            DeathCause::OldAge,
            MonthStamp(1200),
        )
        .unwrap();

        assert!(event.is_major);
        assert_eq!(event.participants, vec![id]);
        let avatar = store.get(id).unwrap();
        assert!(avatar.is_dead);
        assert!(avatar.plans.is_empty());
        assert!(avatar.current_action.is_none());
        assert!(avatar.owned_regions.is_empty());
        assert_eq!(avatar.sect, None);
        assert_eq!(regions.get(&grotto_id).unwrap().host_avatar, None);
        assert!(!sects.get(&sect_id).unwrap().has_member(id));
        assert_eq!(store.pop_newly_dead(), vec![id]);
        // Dying twice is impossible.
        assert!(
            apply_death(&mut store, &mut regions, &mut sects, id, DeathCause::OldAge, MonthStamp(1201))
                .is_none()
        );
    }

    #[test]
    fn injury_checked_before_old_age() {
        let (mut store, mut regions, mut sects, ..) = fixtures();
        let id = add_avatar(&mut store, "A", Gender::Male, 10);
        {
            let avatar = store.get_mut(id).unwrap();
            avatar.hp.cur = 0;
            avatar.age_months = 200 * 12;
        }
        let mut living = vec![id];
        let events = resolve_deaths(&mut store, &mut regions, &mut sects, &mut living, MonthStamp(10));
        assert_eq!(events.len(), 1);
        assert!(living.is_empty());
        let info = store.get(id).unwrap().death_info.clone().unwrap();
        assert_eq!(info.cause, DeathCause::SeriousInjury);
    }

    #[test]
    fn zero_awakening_rate_never_promotes() {
        let (mut store, regions, mut sects, data, map, mut rng) = fixtures();
        for i in 0..20 {
            store.register_mortal(Mortal {
                id: xiuxian_types::MortalId::new(),
                name: format!("Mortal {i}"),
                gender: Gender::Male,
                birth_stamp: MonthStamp(0),
                parents: vec![],
                born_region: None,
            });
        }
        let events = process_awakening(
            &mut store, &mut sects, &regions, &data, &map, 0.0, 0.0, MonthStamp(100), &mut rng,
        );
        assert!(events.is_empty());
        assert_eq!(store.mortal_count(), 20);
        assert!(store.pop_newly_born().is_empty());
    }

    #[test]
    fn awakening_preserves_id_and_wires_parents() {
        let (mut store, regions, mut sects, data, map, mut rng) = fixtures();
        let father = add_avatar(&mut store, "Father", Gender::Male, 40);
        let mortal_id = xiuxian_types::MortalId::new();
        store.register_mortal(Mortal {
            id: mortal_id,
            name: "Child".to_owned(),
            gender: Gender::Female,
            birth_stamp: MonthStamp(0),
            parents: vec![father],
            born_region: None,
        });

        let events = process_awakening(
            &mut store, &mut sects, &regions, &data, &map, 1.0, 0.0, MonthStamp(14 * 12), &mut rng,
        );
        assert!(events.iter().any(|e| e.is_major));
        assert_eq!(store.mortal_count(), 0);

        let child_id = AvatarId::from(mortal_id.into_inner());
        let child = store.get(child_id).expect("promotion preserves the id");
        assert_eq!(child.age_months, 14 * 12);
        assert_eq!(child.relations.get(&father), Some(&RelationKind::Parent));
        assert_eq!(
            store.get(father).unwrap().relations.get(&child_id),
            Some(&RelationKind::Child)
        );
    }

    #[test]
    fn young_bonds_produce_no_children() {
        let (mut store, regions, mut sects, data, map, mut rng) = fixtures();
        let a = add_avatar(&mut store, "A", Gender::Male, 10);
        let b = add_avatar(&mut store, "B", Gender::Female, 10);
        relations::set_relation(&mut store, &mut sects, a, b, RelationKind::Lover, MonthStamp(100))
            .unwrap();

        // Only 12 months into the bond: no rolls at all.
        let events = process_births(
            &mut store, &mut sects, &regions, &data, &map, 1.0, MonthStamp(112), &mut rng,
        );
        assert!(events.is_empty());

        // 24 months in with certainty: a child arrives.
        let events = process_births(
            &mut store, &mut sects, &regions, &data, &map, 1.0, MonthStamp(124), &mut rng,
        );
        assert_eq!(events.len(), 1);
        assert!(events.first().unwrap().is_major);
    }
}
