//! The world aggregate.
//!
//! [`World`] bundles the clock, map, static data, entity store, live
//! region and sect state, the active celestial phenomenon, the
//! gathering schedule, and ranking history. Phases receive `&mut World`
//! and reach the piece they need; nothing outside the tick mutates it
//! while a tick runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use xiuxian_avatars::EntityStore;
use xiuxian_types::{MonthStamp, RegionId, SectId};
use xiuxian_world::phenomenon::CelestialPhenomenon;
use xiuxian_world::{Map, Region, Sect, WorldData};

use crate::gathering::GatheringManager;
use crate::rankings::RankingSnapshot;

/// The complete mutable simulation state.
#[derive(Debug)]
pub struct World {
    /// The world clock; advanced only by the tick's finalize phase.
    pub stamp: MonthStamp,
    /// The calendar year the world started in.
    pub start_year: u64,
    /// The tile grid.
    pub map: Map,
    /// Immutable static data, shared by reference.
    pub data: Arc<WorldData>,
    /// All avatars and mortals.
    pub store: EntityStore,
    /// Live region state.
    pub regions: BTreeMap<RegionId, Region>,
    /// Live sect state.
    pub sects: BTreeMap<SectId, Sect>,
    /// The active celestial phenomenon, if initialized.
    pub phenomenon: Option<CelestialPhenomenon>,
    /// The year the current phenomenon started.
    pub phenomenon_start_year: u64,
    /// Scheduled world events.
    pub gatherings: GatheringManager,
    /// Yearly power-ranking history, oldest first.
    pub rankings: Vec<RankingSnapshot>,
    /// World-history text fed into prompts.
    pub history: String,
}

impl World {
    /// Create an empty world on a blank map.
    pub fn new(map: Map, start_year: u64, data: Arc<WorldData>) -> Self {
        Self {
            stamp: MonthStamp::from_year_month(start_year, xiuxian_types::Month::January),
            start_year,
            map,
            data,
            store: EntityStore::new(),
            regions: BTreeMap::new(),
            sects: BTreeMap::new(),
            phenomenon: None,
            phenomenon_start_year: 0,
            gatherings: GatheringManager::standard(),
            rankings: Vec::new(),
            history: String::new(),
        }
    }

    /// Current calendar year.
    pub const fn year(&self) -> u64 {
        self.stamp.year()
    }

    /// Register a region: records it and stamps its tiles.
    pub fn add_region(&mut self, region: Region) -> RegionId {
        let id = region.id;
        self.map.stamp_region(id, region.center, region.extent);
        self.regions.insert(id, region);
        id
    }

    /// A small world on a 32x32 map with minimal static data, for
    /// tests.
    pub fn for_tests() -> Self {
        Self::new(Map::new(32, 32), 100, Arc::new(WorldData::minimal()))
    }
}
