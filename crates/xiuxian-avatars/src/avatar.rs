//! The avatar record and its per-avatar capability functions.
//!
//! An avatar is the protagonist entity: a cultivator NPC with identity,
//! position, cultivation progress, inventory, social ties, AI state, and
//! lifecycle bookkeeping. Cross-avatar data (relations, interaction
//! counters) is keyed by id; resolution goes through the
//! [`EntityStore`](crate::store::EntityStore).

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use xiuxian_types::{
    Alignment, AvatarId, DeathCause, Gender, MonthStamp, MortalId, ObjectiveOrigin, Realm,
    RegionId, RelationKind, SectId, SectRank,
};
use xiuxian_world::WorldData;
use xiuxian_world::phenomenon::CelestialPhenomenon;

use crate::actions::{ActionInstance, ActionPlan};

/// Base hit points at level 0.
const BASE_HP: i64 = 100;

/// Additional hit points per level.
const HP_PER_LEVEL: i64 = 10;

/// Base observation radius in tiles (Manhattan).
const BASE_OBSERVATION_RADIUS: u32 = 3;

/// One extra tile of observation per this many levels.
const LEVELS_PER_RADIUS_STEP: u32 = 20;

/// Observation radius ceiling.
const MAX_OBSERVATION_RADIUS: u32 = 8;

/// Current and maximum hit points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hp {
    /// Current hit points; death resolution fires at 0 or below.
    pub cur: i64,
    /// Maximum hit points, derived from level.
    pub max: i64,
}

impl Hp {
    /// Full hit points for a level.
    pub const fn full_for_level(level: u32) -> Self {
        let max = BASE_HP + HP_PER_LEVEL * level as i64;
        Self { cur: max, max }
    }

    /// Apply damage, saturating.
    pub const fn damage(&mut self, amount: i64) {
        self.cur = self.cur.saturating_sub(amount);
    }

    /// Heal up to the maximum.
    pub const fn heal(&mut self, amount: i64) {
        let healed = self.cur.saturating_add(amount);
        self.cur = if healed > self.max { self.max } else { healed };
    }
}

/// A weapon or auxiliary in an avatar's possession: a reference to the
/// shared template plus per-instance mutable data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInstance {
    /// Template name in the static data bundle.
    pub template: String,
    /// Per-instance mutable data (wear, inscriptions, bonded spirit).
    pub data: BTreeMap<String, serde_json::Value>,
}

impl ItemInstance {
    /// A fresh instance of a template with no instance data.
    pub fn of(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            data: BTreeMap::new(),
        }
    }
}

/// A consumed elixir still active in an avatar's body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedElixir {
    /// Elixir template name.
    pub elixir: String,
    /// When it was consumed.
    pub consumed_at: MonthStamp,
    /// How long it stays active, in months.
    pub duration_months: u64,
}

impl ConsumedElixir {
    /// Whether the dose has worn off at `now`.
    pub const fn is_expired(&self, now: MonthStamp) -> bool {
        self.consumed_at.plus_months(self.duration_months).0 <= now.0
    }
}

/// An anonymous temporary effect (phenomenon backlash, heart demon,
/// blessing) applied to an avatar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryEffect {
    /// Where the effect came from, for display.
    pub source: String,
    /// Effect tags while active.
    pub effects: BTreeMap<String, i64>,
    /// When the effect started.
    pub started_at: MonthStamp,
    /// How long it lasts, in months.
    pub duration_months: u64,
}

impl TemporaryEffect {
    /// Whether the effect has worn off at `now`.
    pub const fn is_expired(&self, now: MonthStamp) -> bool {
        self.started_at.plus_months(self.duration_months).0 <= now.0
    }
}

/// Interaction bookkeeping toward one other avatar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionState {
    /// Interactions counted since the last relation check.
    pub count: u32,
    /// How many times the pair has been sent to the relation resolver.
    pub checked_times: u32,
}

/// A long-term objective and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongTermObjective {
    /// The objective text.
    pub text: String,
    /// Origin tag; user-pinned objectives survive the yearly review.
    pub origin: ObjectiveOrigin,
    /// When the objective was last set or reviewed.
    pub set_at: MonthStamp,
}

/// Death bookkeeping, recorded exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathInfo {
    /// When the avatar died.
    pub stamp: MonthStamp,
    /// Why.
    pub cause: DeathCause,
    /// Where (tile position).
    pub location: (u32, u32),
}

/// Derived combat and cultivation attributes, recomputed from level,
/// equipment, active effects, and the world phenomenon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DerivedAttributes {
    /// Attack power for combat exchanges.
    pub attack: i64,
    /// Cultivation speed percentage delta (0 = baseline).
    pub cultivation_speed: i64,
}

/// The protagonist entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Avatar {
    /// Stable id.
    pub id: AvatarId,
    /// Display name.
    pub name: String,
    /// Gender.
    pub gender: Gender,
    /// Birth month.
    pub birth_stamp: MonthStamp,
    /// Tile position.
    pub pos: (u32, u32),
    /// Cultivation level; monotonically non-decreasing until death.
    level: u32,
    /// Age in whole months.
    pub age_months: u64,
    /// Hit points.
    pub hp: Hp,
    /// Spirit stone count.
    pub spirit_stones: i64,
    /// Material bag: material name -> count.
    pub bag: BTreeMap<String, u32>,
    /// At most one equipped weapon.
    pub weapon: Option<ItemInstance>,
    /// At most one equipped auxiliary item.
    pub auxiliary: Option<ItemInstance>,
    /// At most one active technique (template name).
    pub technique: Option<String>,
    /// Elixirs consumed and still tracked.
    pub consumed_elixirs: Vec<ConsumedElixir>,
    /// Anonymous temporary effects.
    pub temporary_effects: Vec<TemporaryEffect>,
    /// Sect membership.
    pub sect: Option<SectId>,
    /// Rank within the sect.
    pub sect_rank: Option<SectRank>,
    /// Moral alignment.
    pub alignment: Alignment,
    /// Personality descriptors fed into prompts.
    pub personas: Vec<String>,
    /// Queued plans, committed FIFO.
    pub plans: VecDeque<ActionPlan>,
    /// The single current action slot; never occupied while dead.
    pub current_action: Option<ActionInstance>,
    /// Monotonic source for action-instance sequence numbers.
    pub next_instance_seq: u64,
    /// Set by the commit/preemption paths within a tick; cleared by the
    /// executor once the newly seated action has run. Not persisted.
    #[serde(skip)]
    pub new_action_this_step: bool,
    /// Short-term objective from the last decide query.
    pub short_term_objective: String,
    /// Long-term objective, if set.
    pub long_term_objective: Option<LongTermObjective>,
    /// The most recent thinking text from the decide query.
    pub thinking: String,
    /// Earned nickname, if any.
    pub nickname: Option<String>,
    /// Generated backstory, if any.
    pub backstory: Option<String>,
    /// Lifecycle flag; irrevocable once set.
    pub is_dead: bool,
    /// Death bookkeeping, present iff `is_dead`.
    pub death_info: Option<DeathInfo>,
    /// Regions this avatar knows about (perception memory).
    pub known_regions: BTreeSet<RegionId>,
    /// Interaction counters toward other avatars.
    pub interactions: BTreeMap<AvatarId, InteractionState>,
    /// Last-run stamp per action name, for cooldowns.
    pub action_cooldowns: BTreeMap<String, MonthStamp>,
    /// Cultivation regions hosted by this avatar.
    pub owned_regions: BTreeSet<RegionId>,
    /// Non-cultivator offspring.
    pub children: Vec<MortalId>,
    /// Asserted relation edges, keyed by target id.
    pub relations: BTreeMap<AvatarId, RelationKind>,
    /// Start stamps for dated relations (dao companions).
    pub relation_started: BTreeMap<AvatarId, MonthStamp>,
    /// Derived relations snapshot, refreshed yearly.
    pub computed_relations: BTreeMap<AvatarId, RelationKind>,
}

impl Avatar {
    /// Create a living avatar at a position with a level.
    pub fn new(
        name: impl Into<String>,
        gender: Gender,
        birth_stamp: MonthStamp,
        level: u32,
        pos: (u32, u32),
    ) -> Self {
        Self {
            id: AvatarId::new(),
            name: name.into(),
            gender,
            birth_stamp,
            pos,
            level,
            age_months: 0,
            hp: Hp::full_for_level(level),
            spirit_stones: 0,
            bag: BTreeMap::new(),
            weapon: None,
            auxiliary: None,
            technique: None,
            consumed_elixirs: Vec::new(),
            temporary_effects: Vec::new(),
            sect: None,
            sect_rank: None,
            alignment: Alignment::Neutral,
            personas: Vec::new(),
            plans: VecDeque::new(),
            current_action: None,
            next_instance_seq: 0,
            new_action_this_step: false,
            short_term_objective: String::new(),
            long_term_objective: None,
            thinking: String::new(),
            nickname: None,
            backstory: None,
            is_dead: false,
            death_info: None,
            known_regions: BTreeSet::new(),
            interactions: BTreeMap::new(),
            action_cooldowns: BTreeMap::new(),
            owned_regions: BTreeSet::new(),
            children: Vec::new(),
            relations: BTreeMap::new(),
            relation_started: BTreeMap::new(),
            computed_relations: BTreeMap::new(),
        }
    }

    /// Current cultivation level.
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// Current realm, derived from the level.
    pub const fn realm(&self) -> Realm {
        Realm::from_level(self.level)
    }

    /// Raise the level by `amount`. Levels never decrease; maximum hp
    /// grows with the new level and current hp keeps its absolute value.
    pub const fn raise_level(&mut self, amount: u32) {
        self.level = self.level.saturating_add(amount);
        let new_max = BASE_HP + HP_PER_LEVEL * self.level as i64;
        self.hp.max = new_max;
        if self.hp.cur > new_max {
            self.hp.cur = new_max;
        }
    }

    /// Restore a level loaded from a save file. Only used by the loader.
    pub const fn restore_level(&mut self, level: u32) {
        self.level = level;
    }

    /// Age in whole years.
    pub const fn age_years(&self) -> u64 {
        self.age_months / xiuxian_types::time::MONTHS_PER_YEAR
    }

    /// Whether the avatar has outlived its realm's lifespan.
    pub const fn is_past_lifespan(&self) -> bool {
        self.age_months >= self.realm().max_lifespan_months()
    }

    /// Whether the avatar is idle: no current action and no queued plans.
    pub fn is_idle(&self) -> bool {
        self.current_action.is_none() && self.plans.is_empty()
    }

    /// Observation radius in tiles, growing slowly with level.
    pub const fn observation_radius(&self) -> u32 {
        let bonus = self.level / LEVELS_PER_RADIUS_STEP;
        let radius = BASE_OBSERVATION_RADIUS.saturating_add(bonus);
        if radius > MAX_OBSERVATION_RADIUS {
            MAX_OBSERVATION_RADIUS
        } else {
            radius
        }
    }

    /// Whether world events (fortune/misfortune) may target this avatar
    /// right now, per the current action's metadata.
    pub fn allows_world_events(&self) -> bool {
        self.current_action
            .as_ref()
            .is_none_or(|instance| instance.meta().allow_world_events)
    }

    /// Whether this avatar may be drafted into gatherings right now.
    pub fn allows_gathering(&self) -> bool {
        self.current_action
            .as_ref()
            .is_none_or(|instance| instance.meta().allow_gathering)
    }

    /// Record a consumed elixir.
    ///
    /// Enforces the invariant that at most one non-expired dose of a
    /// given elixir exists: returns `false` (and records nothing) while
    /// a previous dose is still active.
    pub fn consume_elixir(&mut self, template: &str, duration_months: u64, now: MonthStamp) -> bool {
        let already_active = self
            .consumed_elixirs
            .iter()
            .any(|dose| dose.elixir == template && !dose.is_expired(now));
        if already_active {
            return false;
        }
        self.consumed_elixirs.push(ConsumedElixir {
            elixir: template.to_owned(),
            consumed_at: now,
            duration_months,
        });
        true
    }

    /// Drop expired elixirs and temporary effects. Returns `true` when
    /// anything expired (the caller then recomputes derived attributes).
    pub fn expire_passives(&mut self, now: MonthStamp) -> bool {
        let before = self
            .consumed_elixirs
            .len()
            .saturating_add(self.temporary_effects.len());
        self.consumed_elixirs.retain(|dose| !dose.is_expired(now));
        self.temporary_effects.retain(|effect| !effect.is_expired(now));
        let after = self
            .consumed_elixirs
            .len()
            .saturating_add(self.temporary_effects.len());
        after != before
    }

    /// Sum one effect tag across active elixirs, temporary effects, and
    /// the world phenomenon.
    pub fn effect_total(
        &self,
        tag: &str,
        data: &WorldData,
        phenomenon: Option<&CelestialPhenomenon>,
        now: MonthStamp,
    ) -> i64 {
        let mut total: i64 = 0;
        for dose in &self.consumed_elixirs {
            if dose.is_expired(now) {
                continue;
            }
            if let Some(template) = data.elixirs.get(&dose.elixir)
                && let Some(value) = template.effects.get(tag)
            {
                total = total.saturating_add(*value);
            }
        }
        for effect in &self.temporary_effects {
            if effect.is_expired(now) {
                continue;
            }
            if let Some(value) = effect.effects.get(tag) {
                total = total.saturating_add(*value);
            }
        }
        if let Some(phenomenon) = phenomenon
            && let Some(value) = phenomenon.effects.get(tag)
        {
            total = total.saturating_add(*value);
        }
        total
    }

    /// Recompute derived attributes from level, equipment, and effects.
    pub fn derived_attributes(
        &self,
        data: &WorldData,
        phenomenon: Option<&CelestialPhenomenon>,
        now: MonthStamp,
    ) -> DerivedAttributes {
        let mut attack = i64::from(self.level).saturating_mul(2);
        if let Some(weapon) = &self.weapon
            && let Some(template) = data.weapons.get(&weapon.template)
        {
            attack = attack.saturating_add(template.power);
        }
        if let Some(technique) = &self.technique
            && let Some(template) = data.techniques.get(technique)
        {
            attack = attack.saturating_add(template.power);
        }
        attack = attack.saturating_add(self.effect_total("attack", data, phenomenon, now));

        let cultivation_speed = self.effect_total("cultivation_speed", data, phenomenon, now);

        DerivedAttributes {
            attack,
            cultivation_speed,
        }
    }

    /// Count an interaction with another avatar.
    pub fn count_interaction(&mut self, other: AvatarId) {
        let state = self.interactions.entry(other).or_default();
        state.count = state.count.saturating_add(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn avatar() -> Avatar {
        Avatar::new("Li Chen", Gender::Male, MonthStamp(0), 10, (4, 4))
    }

    #[test]
    fn hp_scales_with_level() {
        let a = avatar();
        assert_eq!(a.hp.max, 200);
        assert_eq!(a.hp.cur, a.hp.max);
    }

    #[test]
    fn raise_level_is_monotonic_and_grows_hp() {
        let mut a = avatar();
        a.raise_level(5);
        assert_eq!(a.level(), 15);
        assert_eq!(a.hp.max, 250);
        // Current hp keeps its value, not refilled.
        assert_eq!(a.hp.cur, 200);
    }

    #[test]
    fn realm_follows_level() {
        let mut a = avatar();
        assert_eq!(a.realm(), Realm::QiRefinement);
        a.raise_level(25);
        assert_eq!(a.realm(), Realm::FoundationEstablishment);
    }

    #[test]
    fn second_dose_rejected_while_active() {
        let mut a = avatar();
        assert!(a.consume_elixir("Qi Gathering Pill", 6, MonthStamp(10)));
        assert!(!a.consume_elixir("Qi Gathering Pill", 6, MonthStamp(12)));
        // After expiry a new dose is accepted.
        assert!(a.expire_passives(MonthStamp(16)));
        assert!(a.consume_elixir("Qi Gathering Pill", 6, MonthStamp(16)));
    }

    #[test]
    fn expire_passives_reports_changes() {
        let mut a = avatar();
        a.temporary_effects.push(TemporaryEffect {
            source: "heart demon".to_owned(),
            effects: BTreeMap::from([("cultivation_speed".to_owned(), -10)]),
            started_at: MonthStamp(0),
            duration_months: 12,
        });
        assert!(!a.expire_passives(MonthStamp(11)));
        assert!(a.expire_passives(MonthStamp(12)));
        assert!(a.temporary_effects.is_empty());
    }

    #[test]
    fn effect_totals_combine_sources() {
        let data = WorldData::minimal();
        let mut a = avatar();
        let now = MonthStamp(5);
        assert!(a.consume_elixir("Qi Gathering Pill", 6, now));
        let phenomenon = data.phenomena.first().unwrap();
        // Elixir +10, Spirit Tide +20.
        assert_eq!(
            a.effect_total("cultivation_speed", &data, Some(phenomenon), now),
            30
        );
    }

    #[test]
    fn derived_attack_counts_weapon_and_technique() {
        let data = WorldData::minimal();
        let mut a = avatar();
        a.weapon = Some(ItemInstance::of("Iron Sword"));
        a.technique = Some("Azure Cloud Scripture".to_owned());
        let derived = a.derived_attributes(&data, None, MonthStamp(0));
        // level 10 * 2 + weapon 5 + technique 10.
        assert_eq!(derived.attack, 35);
    }

    #[test]
    fn observation_radius_is_capped() {
        let mut a = avatar();
        assert_eq!(a.observation_radius(), 3);
        a.raise_level(90);
        assert_eq!(a.observation_radius(), 8);
        a.raise_level(200);
        assert_eq!(a.observation_radius(), 8);
    }

    #[test]
    fn lifespan_check_uses_realm() {
        let mut a = avatar();
        a.age_months = 100 * 12;
        assert!(a.is_past_lifespan());
        // Breaking through to Foundation Establishment extends life.
        a.raise_level(30);
        assert!(!a.is_past_lifespan());
    }
}
