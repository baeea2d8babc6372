//! Save-file assembly and two-pass world restore.
//!
//! A save is one human-readable JSON document (plus the co-located
//! SQLite event log, owned by `xiuxian-db`). The JSON captures the
//! clock, map size, regions, every avatar and mortal, sects, the
//! phenomenon, gathering schedules, and ranking history under a schema
//! version tag.
//!
//! Restoring runs two passes: entities are rebuilt first, then every
//! relation edge is checked against its mirror. A reciprocity violation
//! is fatal -- the partially built world is discarded rather than run
//! crooked.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use xiuxian_avatars::{Avatar, Mortal};
use xiuxian_types::MonthStamp;
use xiuxian_world::phenomenon::CelestialPhenomenon;
use xiuxian_world::{Map, Region, Sect, WorldData};

use crate::gathering::GatheringManager;
use crate::rankings::RankingSnapshot;
use crate::world::World;

/// Current save schema version.
pub const SAVE_SCHEMA_VERSION: u32 = 1;

/// Errors from save building or world restore.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// The file carries a schema version this build cannot read.
    #[error("unsupported save version {found} (expected {SAVE_SCHEMA_VERSION})")]
    Version {
        /// The version found in the file.
        found: u32,
    },

    /// The world in the file is internally inconsistent.
    #[error("consistency violation: {0}")]
    Consistency(String),
}

/// The serialized world snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveFile {
    /// Schema version tag.
    pub version: u32,
    /// World clock.
    pub stamp: MonthStamp,
    /// Calendar year the world started in.
    pub start_year: u64,
    /// Map width in tiles.
    pub map_width: u32,
    /// Map height in tiles.
    pub map_height: u32,
    /// All regions with their live state.
    pub regions: Vec<Region>,
    /// All avatars, living and dead, relations by id.
    pub avatars: Vec<Avatar>,
    /// All mortals.
    pub mortals: Vec<Mortal>,
    /// All sects that have existed.
    pub sects: Vec<Sect>,
    /// The active phenomenon.
    pub phenomenon: Option<CelestialPhenomenon>,
    /// The year the phenomenon started.
    pub phenomenon_start_year: u64,
    /// Gathering schedules.
    pub gatherings: GatheringManager,
    /// Ranking history.
    pub rankings: Vec<RankingSnapshot>,
    /// World-history text.
    pub history: String,
}

/// Capture a world into a save file.
pub fn build_save(world: &World) -> SaveFile {
    SaveFile {
        version: SAVE_SCHEMA_VERSION,
        stamp: world.stamp,
        start_year: world.start_year,
        map_width: world.map.width(),
        map_height: world.map.height(),
        regions: world.regions.values().cloned().collect(),
        avatars: world.store.iter().cloned().collect(),
        mortals: world.store.mortals().cloned().collect(),
        sects: world.sects.values().cloned().collect(),
        phenomenon: world.phenomenon.clone(),
        phenomenon_start_year: world.phenomenon_start_year,
        gatherings: world.gatherings.clone(),
        rankings: world.rankings.clone(),
        history: world.history.clone(),
    }
}

/// Rebuild a world from a save file.
///
/// Pass one repopulates the map, regions, sects, and entity store.
/// Pass two wires and verifies relations (every edge must have its
/// reciprocal mirror) and checks that every referenced item and
/// technique template still exists in the static data.
///
/// # Errors
///
/// Returns [`PersistError`] on a version mismatch or any consistency
/// violation; the partial world is dropped.
pub fn restore_world(save: SaveFile, data: Arc<WorldData>) -> Result<World, PersistError> {
    if save.version != SAVE_SCHEMA_VERSION {
        return Err(PersistError::Version {
            found: save.version,
        });
    }

    let mut world = World::new(Map::new(save.map_width, save.map_height), save.start_year, data);
    world.stamp = save.stamp;
    world.phenomenon = save.phenomenon;
    world.phenomenon_start_year = save.phenomenon_start_year;
    world.gatherings = save.gatherings;
    world.rankings = save.rankings;
    world.history = save.history;

    for region in save.regions {
        world.add_region(region);
    }
    for sect in save.sects {
        world.sects.insert(sect.id, sect);
    }
    for avatar in save.avatars {
        verify_templates(&avatar, &world)?;
        world.store.register(avatar, false);
    }
    for mortal in save.mortals {
        world.store.register_mortal(mortal);
    }

    verify_relations(&world)?;

    info!(
        avatars = world.store.len(),
        mortals = world.store.mortal_count(),
        regions = world.regions.len(),
        stamp = %world.stamp,
        "world restored"
    );
    Ok(world)
}

/// Check that an avatar's equipment and technique reference known
/// templates; the shared half of every item must exist before the
/// per-instance data can be overlaid on it.
fn verify_templates(avatar: &Avatar, world: &World) -> Result<(), PersistError> {
    if let Some(weapon) = &avatar.weapon
        && !world.data.weapons.contains_key(&weapon.template)
    {
        return Err(PersistError::Consistency(format!(
            "{}: unknown weapon template {}",
            avatar.name, weapon.template
        )));
    }
    if let Some(auxiliary) = &avatar.auxiliary
        && !world.data.auxiliaries.contains_key(&auxiliary.template)
    {
        return Err(PersistError::Consistency(format!(
            "{}: unknown auxiliary template {}",
            avatar.name, auxiliary.template
        )));
    }
    if let Some(technique) = &avatar.technique
        && !world.data.techniques.contains_key(technique)
    {
        return Err(PersistError::Consistency(format!(
            "{}: unknown technique template {technique}",
            avatar.name
        )));
    }
    Ok(())
}

/// Check the reciprocal-edge invariant across the whole store.
fn verify_relations(world: &World) -> Result<(), PersistError> {
    for avatar in world.store.iter() {
        for (&target, &kind) in &avatar.relations {
            let Some(other) = world.store.get(target) else {
                return Err(PersistError::Consistency(format!(
                    "{} relates to unknown avatar {target}",
                    avatar.name
                )));
            };
            let mirror = other.relations.get(&avatar.id).copied();
            if mirror != Some(kind.reciprocal()) {
                return Err(PersistError::Consistency(format!(
                    "edge {} -> {} is {kind} but the mirror is {mirror:?}",
                    avatar.name, other.name
                )));
            }
        }
    }
    Ok(())
}
