//! The yearly power ranking.
//!
//! Each January the simulator captures a snapshot of the strongest
//! living cultivators. Snapshots are kept on the world (bounded), shown
//! by the UI, and persisted with the save.

use serde::{Deserialize, Serialize};
use xiuxian_types::{AvatarId, Realm};

use crate::world::World;

/// Snapshots retained before the oldest is dropped.
const MAX_SNAPSHOTS: usize = 10;

/// Entries per snapshot.
pub const RANKING_SIZE: usize = 10;

/// One ranked cultivator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    /// Who.
    pub avatar: AvatarId,
    /// Display name at snapshot time.
    pub name: String,
    /// Level at snapshot time.
    pub level: u32,
    /// Realm at snapshot time.
    pub realm: Realm,
    /// Sect name at snapshot time, if any.
    pub sect_name: Option<String>,
}

/// The power ranking of one year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingSnapshot {
    /// The year the snapshot was taken.
    pub year: u64,
    /// Entries, strongest first.
    pub entries: Vec<RankingEntry>,
}

/// Compute this year's ranking from the living population.
pub fn compute_ranking(world: &World, year: u64) -> RankingSnapshot {
    let mut entries: Vec<RankingEntry> = world
        .store
        .iter()
        .filter(|avatar| !avatar.is_dead)
        .map(|avatar| RankingEntry {
            avatar: avatar.id,
            name: avatar.name.clone(),
            level: avatar.level(),
            realm: avatar.realm(),
            sect_name: avatar
                .sect
                .and_then(|sect_id| world.sects.get(&sect_id))
                .map(|sect| sect.name.clone()),
        })
        .collect();
    // Strongest first; id as the deterministic tie-break.
    entries.sort_by(|a, b| b.level.cmp(&a.level).then(a.avatar.cmp(&b.avatar)));
    entries.truncate(RANKING_SIZE);
    RankingSnapshot { year, entries }
}

/// Push a snapshot onto the world's bounded history.
pub fn record_ranking(world: &mut World, snapshot: RankingSnapshot) {
    world.rankings.push(snapshot);
    while world.rankings.len() > MAX_SNAPSHOTS {
        world.rankings.remove(0);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use xiuxian_avatars::Avatar;
    use xiuxian_types::{Gender, MonthStamp};

    use super::*;
    use crate::world::World;

    #[test]
    fn ranking_orders_by_level_and_excludes_dead() {
        let mut world = World::for_tests();
        for (name, level, dead) in [("A", 10, false), ("B", 90, false), ("C", 200, true)] {
            let mut avatar = Avatar::new(name, Gender::Male, MonthStamp(0), level, (0, 0));
            avatar.is_dead = dead;
            world.store.register(avatar, false);
        }

        let snapshot = compute_ranking(&world, 101);
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.entries.first().unwrap().name, "B");
        assert_eq!(snapshot.entries.first().unwrap().realm, Realm::NascentSoul);
    }

    #[test]
    fn history_is_bounded() {
        let mut world = World::for_tests();
        for year in 0..20 {
            record_ranking(&mut world, RankingSnapshot { year, entries: vec![] });
        }
        assert_eq!(world.rankings.len(), MAX_SNAPSHOTS);
        assert_eq!(world.rankings.first().unwrap().year, 10);
    }
}
