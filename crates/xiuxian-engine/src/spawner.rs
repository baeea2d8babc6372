//! World seeding.
//!
//! Builds the starting world: a map with cities, sect headquarters,
//! cultivation grottos and wilds, the configured number of sects from
//! the static tables, the seed avatar population, and a mortal
//! population living in the cities.

use std::sync::Arc;

use rand::Rng;
use rand::rngs::SmallRng;
use tracing::info;
use xiuxian_avatars::{Avatar, Mortal};
use xiuxian_core::{SimConfig, World};
use xiuxian_types::{Gender, MonthStamp, MortalId, RegionId, SectRank};
use xiuxian_world::{Map, Region, RegionKind, Sect, WorldData};

/// Map edge length in tiles.
const MAP_SIZE: u32 = 64;

/// Mortals seeded per starting avatar.
const MORTALS_PER_AVATAR: u32 = 3;

/// Build a fresh world from configuration and static data.
pub fn spawn_world(config: &SimConfig, data: Arc<WorldData>, rng: &mut SmallRng) -> World {
    let mut world = World::new(Map::new(MAP_SIZE, MAP_SIZE), config.game.start_year, data);
    world.history = config.game.world_history.clone();

    let cities = spawn_regions(&mut world, config, rng);
    spawn_sects(&mut world, config, rng);
    spawn_avatars(&mut world, config, rng);
    spawn_mortals(&mut world, config, &cities, rng);

    info!(
        avatars = world.store.len(),
        mortals = world.store.mortal_count(),
        regions = world.regions.len(),
        sects = world.sects.len(),
        "world seeded"
    );
    world
}

/// Place cities, grottos, and wilds. Returns the city region ids.
fn spawn_regions(world: &mut World, config: &SimConfig, rng: &mut SmallRng) -> Vec<RegionId> {
    let mut cities = Vec::new();
    let city_names = ["Riverfall City", "Cloudgate City", "Ironmarket City"];
    for (i, name) in city_names.iter().enumerate() {
        let center = scatter(rng, 8);
        let mut city = Region::new(*name, RegionKind::City, center, 2);
        city.prosperity = 50 + 10 * i as i64;
        city.resources = "markets, mortal workshops, river trade".to_owned();
        cities.push(world.add_region(city));
    }

    let grotto_names = [
        "Azure Mist Grotto",
        "Moonshadow Grotto",
        "Thousand Pine Grotto",
        "Sunken Jade Grotto",
        "White Crane Grotto",
    ];
    for name in grotto_names {
        let mut grotto = Region::new(name, RegionKind::Grotto, scatter(rng, 4), 1);
        grotto.resources = "dense spiritual qi".to_owned();
        world.add_region(grotto);
    }

    let mut wild = Region::new("Barren Serpent Ridge", RegionKind::Wild, scatter(rng, 4), 3);
    wild.resources = "spirit herbs, beasts".to_owned();
    world.add_region(wild);

    // Keep the parameter in the signature honest: sect HQ placement
    // happens in spawn_sects where the sect ids exist.
    let _ = config;
    cities
}

/// Seed sects from the static tables and anchor a headquarters region
/// for each.
fn spawn_sects(world: &mut World, config: &SimConfig, rng: &mut SmallRng) {
    let data = Arc::clone(&world.data);
    for template in data.sects.iter().take(config.game.sect_num as usize) {
        let mut sect = Sect::new(&template.name, template.alignment, &template.description);
        let mut hq = Region::new(
            format!("{} Headquarters", template.name),
            RegionKind::SectHq,
            scatter(rng, 6),
            2,
        );
        hq.sect = Some(sect.id);
        let hq_id = world.add_region(hq);
        sect.hq_region = Some(hq_id);
        world.sects.insert(sect.id, sect);
    }
}

/// Seed the starting avatar population. Roughly half join a sect at a
/// rank matching their realm; the strongest sect member leads it.
fn spawn_avatars(world: &mut World, config: &SimConfig, rng: &mut SmallRng) {
    let data = Arc::clone(&world.data);
    let sect_ids: Vec<_> = world.sects.keys().copied().collect();
    let now = world.stamp;

    for _ in 0..config.game.init_npc_num {
        let gender = if rng.random_bool(0.5) { Gender::Male } else { Gender::Female };
        let name = data.names.random_name(gender, rng);
        let level = rng.random_range(1..=45);
        let age_years = rng.random_range(16..=80_u64);
        let birth = MonthStamp(now.0.saturating_sub(age_years * 12));

        let mut avatar = Avatar::new(name, gender, birth, level, scatter(rng, 0));
        avatar.age_months = now.months_since(birth);
        avatar.spirit_stones = rng.random_range(0..=300);
        avatar.alignment = match rng.random_range(0..3_u32) {
            0 => xiuxian_types::Alignment::Righteous,
            1 => xiuxian_types::Alignment::Neutral,
            _ => xiuxian_types::Alignment::Demonic,
        };
        if rng.random_bool(0.6)
            && let Some(weapon) = pick_map_key(&data.weapons, rng)
        {
            avatar.weapon = Some(xiuxian_avatars::ItemInstance::of(weapon));
        }
        if rng.random_bool(0.5)
            && let Some(technique) = pick_map_key(&data.techniques, rng)
        {
            avatar.technique = Some(technique);
        }

        if !sect_ids.is_empty() && rng.random_bool(0.5) {
            let sect_id = sect_ids[rng.random_range(0..sect_ids.len())];
            let rank = SectRank::from_realm(avatar.realm());
            avatar.sect = Some(sect_id);
            avatar.sect_rank = Some(rank);
            if let Some(sect) = world.sects.get_mut(&sect_id) {
                sect.admit(avatar.id, rank);
                // Move new members near their headquarters.
                if let Some(hq) = sect.hq_region.and_then(|id| world.regions.get(&id)) {
                    avatar.pos = hq.center;
                }
            }
        }

        world.store.register(avatar, false);
    }

    // The strongest member of each sect leads it.
    let leaders: Vec<(xiuxian_types::SectId, xiuxian_types::AvatarId)> = world
        .sects
        .values()
        .filter_map(|sect| {
            sect.members
                .keys()
                .filter_map(|&id| world.store.get(id).map(|a| (a.level(), id)))
                .max()
                .map(|(_, id)| (sect.id, id))
        })
        .collect();
    for (sect_id, leader) in leaders {
        if let Some(sect) = world.sects.get_mut(&sect_id) {
            sect.leader = Some(leader);
        }
    }
}

/// Seed the mortal population into the cities.
fn spawn_mortals(world: &mut World, config: &SimConfig, cities: &[RegionId], rng: &mut SmallRng) {
    let data = Arc::clone(&world.data);
    let now = world.stamp;
    let count = config.game.init_npc_num.saturating_mul(MORTALS_PER_AVATAR);
    for _ in 0..count {
        let gender = if rng.random_bool(0.5) { Gender::Male } else { Gender::Female };
        let age_years = rng.random_range(1..=60_u64);
        let born_region = if cities.is_empty() {
            None
        } else {
            Some(cities[rng.random_range(0..cities.len())])
        };
        world.store.register_mortal(Mortal {
            id: MortalId::new(),
            name: data.names.random_name(gender, rng),
            gender,
            birth_stamp: MonthStamp(now.0.saturating_sub(age_years * 12)),
            parents: Vec::new(),
            born_region,
        });
    }
}

/// A random map position with a margin from the edge.
fn scatter(rng: &mut SmallRng, margin: u32) -> (u32, u32) {
    let lo = margin;
    let hi = MAP_SIZE.saturating_sub(margin.max(1));
    (rng.random_range(lo..hi), rng.random_range(lo..hi))
}

/// A random key from a template map.
fn pick_map_key<V>(map: &std::collections::BTreeMap<String, V>, rng: &mut SmallRng) -> Option<String> {
    if map.is_empty() {
        return None;
    }
    map.keys().nth(rng.random_range(0..map.len())).cloned()
}
