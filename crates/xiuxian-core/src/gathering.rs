//! Scheduled world gatherings: tournaments, auctions, hidden realms.
//!
//! Gatherings are registered once at world creation and checked every
//! month; each fires in January on its own cadence after a first-year
//! grace period. When several fall due in the same January they run in
//! registration order. Avatars join only when their current action
//! permits it (seclusion keeps you out of the tournament bracket).
//!
//! Kinds are enum-dispatched for the same reason actions are: execution
//! feeds the async story generator, and async methods are not
//! dyn-compatible.

use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use tracing::info;
use xiuxian_types::{AvatarId, Event, Month};

use xiuxian_avatars::StorySeed;
use xiuxian_avatars::avatar::ItemInstance;

use crate::world::World;

/// What kind of world event a gathering is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatheringKind {
    /// A martial tournament among the strongest willing cultivators.
    GrandTournament,
    /// A treasure auction in the wealthiest city.
    TreasureAuction,
    /// A hidden realm cracks open and admits a few explorers.
    HiddenRealmOpening,
}

impl GatheringKind {
    /// Display name for events and the UI.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::GrandTournament => "Grand Tournament",
            Self::TreasureAuction => "Treasure Auction",
            Self::HiddenRealmOpening => "Hidden Realm Opening",
        }
    }
}

/// One registered gathering and its schedule state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gathering {
    /// What happens when it fires.
    pub kind: GatheringKind,
    /// Years between occurrences.
    pub period_years: u64,
    /// The year it last ran, if ever.
    pub last_run_year: Option<u64>,
}

impl Gathering {
    /// Whether this gathering starts this month.
    ///
    /// Fires only in January, never in the world's first year, and then
    /// every `period_years` from the last run (or from the start year).
    pub fn is_start(&self, world: &World) -> bool {
        if world.stamp.month() != Month::January {
            return false;
        }
        let year = world.year();
        if year <= world.start_year {
            return false;
        }
        let anchor = self.last_run_year.unwrap_or(world.start_year);
        year.saturating_sub(anchor) >= self.period_years
    }
}

/// The ordered registry of gatherings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatheringManager {
    /// Registered gatherings; iteration order is execution order.
    pub gatherings: Vec<Gathering>,
}

impl GatheringManager {
    /// The standard schedule: tournament every 4 years, auction every
    /// 2, hidden realm every 6. Registration order is the tie-break
    /// when several fall due in the same January.
    pub fn standard() -> Self {
        Self {
            gatherings: vec![
                Gathering {
                    kind: GatheringKind::GrandTournament,
                    period_years: 4,
                    last_run_year: None,
                },
                Gathering {
                    kind: GatheringKind::TreasureAuction,
                    period_years: 2,
                    last_run_year: None,
                },
                Gathering {
                    kind: GatheringKind::HiddenRealmOpening,
                    period_years: 6,
                    last_run_year: None,
                },
            ],
        }
    }

    /// Kinds currently due, in registration order.
    pub fn due(&self, world: &World) -> Vec<GatheringKind> {
        self.gatherings
            .iter()
            .filter(|gathering| gathering.is_start(world))
            .map(|gathering| gathering.kind)
            .collect()
    }

    /// Mark a kind as having run this year.
    pub fn mark_ran(&mut self, kind: GatheringKind, year: u64) {
        for gathering in &mut self.gatherings {
            if gathering.kind == kind {
                gathering.last_run_year = Some(year);
            }
        }
    }
}

/// Run one gathering, mutating participants and producing events plus
/// story seeds for the narrative generator.
pub fn execute(
    kind: GatheringKind,
    world: &mut World,
    rng: &mut SmallRng,
) -> (Vec<Event>, Vec<StorySeed>) {
    let participants = willing_participants(world);
    if participants.len() < 2 {
        return (Vec::new(), Vec::new());
    }
    info!(kind = kind.display_name(), participants = participants.len(), "gathering fired");
    match kind {
        GatheringKind::GrandTournament => run_tournament(world, &participants),
        GatheringKind::TreasureAuction => run_auction(world, &participants),
        GatheringKind::HiddenRealmOpening => run_hidden_realm(world, &participants, rng),
    }
}

/// Living avatars whose current action allows being drafted.
fn willing_participants(world: &World) -> Vec<AvatarId> {
    world
        .store
        .living_ids()
        .into_iter()
        .filter(|&id| world.store.get(id).is_some_and(|a| a.allows_gathering()))
        .collect()
}

/// The tournament: the eight strongest willing cultivators fight in a
/// bracket; the strongest takes the purse and the fame.
fn run_tournament(world: &mut World, participants: &[AvatarId]) -> (Vec<Event>, Vec<StorySeed>) {
    let now = world.stamp;
    let mut bracket: Vec<(u32, AvatarId)> = participants
        .iter()
        .filter_map(|&id| world.store.get(id).map(|a| (a.level(), id)))
        .collect();
    bracket.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    bracket.truncate(8);

    let Some(&(_, champion)) = bracket.first() else {
        return (Vec::new(), Vec::new());
    };
    let finalists: Vec<AvatarId> = bracket.iter().map(|&(_, id)| id).collect();

    let champion_name = world
        .store
        .get(champion)
        .map(|a| a.name.clone())
        .unwrap_or_default();
    if let Some(avatar) = world.store.get_mut(champion) {
        avatar.spirit_stones = avatar.spirit_stones.saturating_add(500);
        avatar.raise_level(1);
    }

    let event = Event::major(
        now,
        format!(
            "The Grand Tournament concluded: {champion_name} swept the bracket and claimed the champion's purse."
        ),
        finalists.clone(),
    );
    let seed = StorySeed {
        seed: format!("{champion_name} won the Grand Tournament against seven finalists"),
        participants: finalists,
        is_major: true,
    };
    (vec![event], vec![seed])
}

/// The auction: the wealthiest bidder buys the finest blade on offer.
fn run_auction(world: &mut World, participants: &[AvatarId]) -> (Vec<Event>, Vec<StorySeed>) {
    let now = world.stamp;
    let mut bidders: Vec<(i64, AvatarId)> = participants
        .iter()
        .filter_map(|&id| world.store.get(id).map(|a| (a.spirit_stones, id)))
        .filter(|&(stones, _)| stones >= 100)
        .collect();
    bidders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let Some(&(stones, winner)) = bidders.first() else {
        return (Vec::new(), Vec::new());
    };

    // The lot: the best weapon the house can source at grade 4 or
    // below.
    let lot = world
        .data
        .weapons
        .values()
        .filter(|template| template.grade <= 4)
        .max_by_key(|template| (template.grade, template.power))
        .map(|template| template.name.clone());
    let Some(lot) = lot else {
        return (Vec::new(), Vec::new());
    };

    let price = stones / 2;
    let winner_name = world
        .store
        .get(winner)
        .map(|a| a.name.clone())
        .unwrap_or_default();
    if let Some(avatar) = world.store.get_mut(winner) {
        avatar.spirit_stones = avatar.spirit_stones.saturating_sub(price);
        avatar.weapon = Some(ItemInstance::of(lot.clone()));
    }

    let attendees: Vec<AvatarId> = bidders.iter().map(|&(_, id)| id).take(6).collect();
    let event = Event::major(
        now,
        format!("At the Treasure Auction, {winner_name} paid {price} spirit stones for {lot}."),
        attendees.clone(),
    );
    let seed = StorySeed {
        seed: format!("{winner_name} outbid every rival for {lot} at the Treasure Auction"),
        participants: attendees,
        is_major: true,
    };
    (vec![event], vec![seed])
}

/// The hidden realm: a handful of explorers slip in before it seals,
/// each returning changed.
fn run_hidden_realm(
    world: &mut World,
    participants: &[AvatarId],
    rng: &mut SmallRng,
) -> (Vec<Event>, Vec<StorySeed>) {
    let now = world.stamp;
    let mut pool: Vec<AvatarId> = participants.to_vec();
    let mut explorers = Vec::new();
    for _ in 0..3 {
        if pool.is_empty() {
            break;
        }
        let idx = rng.random_range(0..pool.len());
        explorers.push(pool.swap_remove(idx));
    }
    if explorers.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let mut names = Vec::new();
    for &id in &explorers {
        if let Some(avatar) = world.store.get_mut(id) {
            avatar.raise_level(2);
            avatar.spirit_stones = avatar.spirit_stones.saturating_add(100);
            names.push(avatar.name.clone());
        }
    }

    let event = Event::major(
        now,
        format!(
            "A hidden realm opened for a single month; {} emerged with treasures and insight.",
            names.join(", ")
        ),
        explorers.clone(),
    );
    let seed = StorySeed {
        seed: format!("{} explored a hidden realm before it sealed", names.join(", ")),
        participants: explorers,
        is_major: true,
    };
    (vec![event], vec![seed])
}
