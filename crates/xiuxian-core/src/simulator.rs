//! The monthly phase orchestrator.
//!
//! One call to [`Simulator::step`] advances the world by one month
//! through nineteen strictly ordered phases:
//!
//! 1. Perception and territory claims
//! 2. Long-term goal review (LLM, parallel)
//! 3. Gatherings
//! 4. Plan decide (LLM, parallel)
//! 5. Plan commit
//! 6. Action execute (bounded preemption rounds)
//! 7. Interaction counting, pass A
//! 8. Relation evolution (LLM, parallel)
//! 9. Death resolution
//! 10. Ageing and new life
//! 11. Backstory fill (LLM, parallel)
//! 12. Passive effects, fortune and misfortune
//! 13. Nickname generation (LLM, parallel)
//! 14. Phenomenon rotation
//! 15. Region prosperity
//! 16. Interaction counting, pass B
//! 17. Derived-relations refresh (January)
//! 18. Dead cleanup (January)
//! 19. Finalize: dedup, persist, advance the clock
//!
//! The living list is captured once at the top and shrunk only by the
//! death phase. Parallel phases fan out pure read-context tasks to the
//! AI source and join before applying any mutation, so the phase
//! boundary is always a join point and pair edits are serialized by the
//! post-join apply order. Each task's failure is its own: the affected
//! avatar simply gets no plan, nickname, or story this month.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use rand::rngs::SmallRng;
use serde_json::json;
use tracing::{debug, info, warn};
use xiuxian_avatars::actions::handlers::{ActionCtx, commit_next_plan, step_action};
use xiuxian_avatars::avatar::LongTermObjective;
use xiuxian_avatars::{StorySeed, fortune, lifecycle, relations};
use xiuxian_db::{DbError, EventLog};
use xiuxian_types::{AvatarId, Event, EventId, Month, ObjectiveOrigin};
use xiuxian_world::RegionKind;
use xiuxian_world::phenomenon::pick_phenomenon;

use crate::config::SimConfig;
use crate::deciders::{
    AiSource, avatar_context, pair_context, parse_plan_decision, parse_relation_decision,
    parse_text_answer, world_context,
};
use crate::gathering;
use crate::rankings;
use crate::world::World;

/// Monthly probability of a rogue cultivator wandering in.
const ROGUE_CULTIVATOR_RATE: f64 = 0.02;

/// Monthly birth probability per qualifying dao-companion pair.
const BIRTH_PROBABILITY: f64 = 0.08;

/// Months before an LLM-set long-term objective is reviewed again.
const GOAL_REVIEW_MONTHS: u64 = 12;

/// Errors that can escape a tick.
///
/// Per-avatar work catches its own failures; only the finalize phase's
/// event-log write propagates.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The event log could not be written.
    #[error("event log write failed: {source}")]
    Persist {
        /// The underlying database error.
        #[from]
        source: DbError,
    },
}

/// The phase orchestrator: owns the world, the AI source, the event
/// log, and the deterministic rng.
pub struct Simulator {
    /// The mutable world.
    pub world: World,
    config: SimConfig,
    ai: Arc<AiSource>,
    event_log: EventLog,
    rng: SmallRng,
}

impl Simulator {
    /// Assemble a simulator.
    pub fn new(
        world: World,
        config: SimConfig,
        ai: Arc<AiSource>,
        event_log: EventLog,
        rng: SmallRng,
    ) -> Self {
        Self {
            world,
            config,
            ai,
            event_log,
            rng,
        }
    }

    /// Whether the AI source has tripped its health flag.
    pub fn ai_unhealthy(&self) -> bool {
        self.ai.is_unhealthy()
    }

    /// Borrow the event log (API queries).
    pub const fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    /// Replace the world (load) and hand back the old one.
    pub fn swap_world(&mut self, world: World) -> World {
        core::mem::replace(&mut self.world, world)
    }

    /// Replace the event log (load).
    pub fn swap_event_log(&mut self, log: EventLog) -> EventLog {
        core::mem::replace(&mut self.event_log, log)
    }

    /// Advance the world by one month.
    ///
    /// # Errors
    ///
    /// Only a finalize-phase persistence failure propagates; the world
    /// state in memory is already advanced except for the clock.
    pub async fn step(&mut self) -> Result<Vec<Event>, TickError> {
        let now = self.world.stamp;
        let mut living = self.world.store.living_ids();
        let mut events: Vec<Event> = Vec::new();
        let mut processed: BTreeSet<EventId> = BTreeSet::new();

        info!(stamp = %now, living = living.len(), "tick started");

        // 1. Perception and territory.
        events.extend(self.phase_perception(&living));

        // 2. Long-term goal review.
        self.phase_goal_review(&living).await;

        // 3. Gatherings.
        events.extend(self.phase_gatherings().await);

        // 4. Plan decide.
        self.phase_decide(&living).await;

        // 5. Plan commit.
        events.extend(self.phase_commit(&living));

        // 6. Action execute.
        events.extend(self.phase_execute(&living).await);

        // 7. Interaction counting, pass A.
        self.count_interactions(&events, &mut processed);

        // 8. Relation evolution.
        events.extend(self.phase_relations(&living).await);

        // 9. Death resolution (shrinks `living`).
        events.extend(self.phase_deaths(&mut living));

        // 10. Ageing and new life.
        events.extend(self.phase_age_and_birth(&living));

        // 11. Backstory fill.
        self.phase_backstories(&living).await;

        // 12. Passive effects, fortune and misfortune.
        events.extend(self.phase_passives(&living).await);

        // 13. Nickname generation.
        let nickname_events = self.phase_nicknames(&living, &events).await;
        events.extend(nickname_events);

        // 14. Phenomenon rotation.
        events.extend(self.phase_phenomenon());

        // 15. Region prosperity.
        self.phase_prosperity();

        // 16. Interaction counting, pass B.
        self.count_interactions(&events, &mut processed);

        // 17. Derived-relations refresh (January only).
        if now.month() == Month::January {
            for &id in &living {
                relations::refresh_computed_relations(&mut self.world.store, id);
            }
        }

        // 18. Dead cleanup (January only).
        if now.month() == Month::January {
            let removed = self
                .world
                .store
                .cleanup_long_dead(now, self.config.game.long_dead_cleanup_years);
            if removed > 0 {
                info!(removed, "long-dead avatars forgotten");
            }
            let snapshot = rankings::compute_ranking(&self.world, now.year());
            rankings::record_ranking(&mut self.world, snapshot);
        }

        // 19. Finalize.
        self.finalize(events).await
    }

    // -------------------------------------------------------------------
    // Phase 1: perception and territory
    // -------------------------------------------------------------------

    fn phase_perception(&mut self, living: &[AvatarId]) -> Vec<Event> {
        let now = self.world.stamp;
        let mut events = Vec::new();
        let mut hosts: BTreeSet<AvatarId> = self
            .world
            .regions
            .values()
            .filter_map(|region| region.host_avatar)
            .collect();

        for &id in living {
            let Some(avatar) = self.world.store.get(id) else {
                continue;
            };
            let radius = avatar.observation_radius();
            let (x, y) = avatar.pos;
            let observed = self.world.map.regions_within(x, y, radius);

            let claim = if hosts.contains(&id) {
                None
            } else {
                observed.iter().copied().find(|region_id| {
                    self.world
                        .regions
                        .get(region_id)
                        .is_some_and(xiuxian_world::Region::is_unclaimed_grotto)
                })
            };

            if let Some(avatar) = self.world.store.get_mut(id) {
                avatar.known_regions.extend(observed.iter().copied());
                if let Some(region_id) = claim {
                    avatar.owned_regions.insert(region_id);
                }
            }

            if let Some(region_id) = claim {
                hosts.insert(id);
                let avatar_name = self
                    .world
                    .store
                    .get(id)
                    .map(|a| a.name.clone())
                    .unwrap_or_default();
                if let Some(region) = self.world.regions.get_mut(&region_id) {
                    region.host_avatar = Some(id);
                    events.push(Event::new(
                        now,
                        format!(
                            "{avatar_name} passed by {}, found it ownerless, and claimed it.",
                            region.name
                        ),
                        vec![id],
                    ));
                }
            }
        }
        events
    }

    // -------------------------------------------------------------------
    // Phase 2: long-term goal review
    // -------------------------------------------------------------------

    async fn phase_goal_review(&mut self, living: &[AvatarId]) {
        let now = self.world.stamp;
        let due: Vec<AvatarId> = living
            .iter()
            .copied()
            .filter(|&id| {
                self.world.store.get(id).is_some_and(|avatar| {
                    avatar.long_term_objective.as_ref().is_none_or(|objective| {
                        objective.origin == ObjectiveOrigin::Llm
                            && now.months_since(objective.set_at) >= GOAL_REVIEW_MONTHS
                    })
                })
            })
            .collect();
        if due.is_empty() {
            return;
        }

        let mut tasks = Vec::with_capacity(due.len());
        for id in due {
            let context = avatar_context(&self.world, id);
            let ai = Arc::clone(&self.ai);
            tasks.push(async move { (id, ai.query("goal", "goal", &context).await) });
        }
        for (id, result) in join_all(tasks).await {
            match result {
                Ok(value) => {
                    if let Some(text) = parse_text_answer(&value, "objective")
                        && let Some(avatar) = self.world.store.get_mut(id)
                    {
                        avatar.long_term_objective = Some(LongTermObjective {
                            text,
                            origin: ObjectiveOrigin::Llm,
                            set_at: now,
                        });
                    }
                }
                Err(error) => warn!(avatar_id = %id, %error, "goal review failed"),
            }
        }
    }

    // -------------------------------------------------------------------
    // Phase 3: gatherings
    // -------------------------------------------------------------------

    async fn phase_gatherings(&mut self) -> Vec<Event> {
        if self.world.year() <= self.world.start_year {
            return Vec::new();
        }
        let due = self.world.gatherings.due(&self.world);
        if due.is_empty() {
            return Vec::new();
        }
        let year = self.world.year();
        let mut events = Vec::new();
        let mut seeds = Vec::new();
        for kind in due {
            let (mut kind_events, mut kind_seeds) =
                gathering::execute(kind, &mut self.world, &mut self.rng);
            events.append(&mut kind_events);
            seeds.append(&mut kind_seeds);
            self.world.gatherings.mark_ran(kind, year);
        }
        events.extend(self.resolve_stories(seeds).await);
        events
    }

    // -------------------------------------------------------------------
    // Phase 4: plan decide
    // -------------------------------------------------------------------

    async fn phase_decide(&mut self, living: &[AvatarId]) {
        let idle: Vec<AvatarId> = living
            .iter()
            .copied()
            .filter(|&id| self.world.store.get(id).is_some_and(xiuxian_avatars::Avatar::is_idle))
            .collect();
        if idle.is_empty() {
            return;
        }

        let mut tasks = Vec::with_capacity(idle.len());
        for id in idle {
            let context = avatar_context(&self.world, id);
            let ai = Arc::clone(&self.ai);
            tasks.push(async move { (id, ai.query("decide", "decide", &context).await) });
        }
        for (id, result) in join_all(tasks).await {
            match result {
                Ok(value) => {
                    let decision = parse_plan_decision(&value);
                    if decision.plans.is_empty() {
                        debug!(avatar_id = %id, "decide returned no usable plans");
                        continue;
                    }
                    if let Some(avatar) = self.world.store.get_mut(id) {
                        avatar.thinking = decision.thinking;
                        avatar.short_term_objective = decision.short_term_objective;
                        avatar.plans.extend(decision.plans);
                    }
                }
                Err(error) => warn!(avatar_id = %id, %error, "decide failed"),
            }
        }
    }

    // -------------------------------------------------------------------
    // Phases 5 and 6: commit and execute
    // -------------------------------------------------------------------

    fn phase_commit(&mut self, living: &[AvatarId]) -> Vec<Event> {
        let mut events = Vec::new();
        let world = &mut self.world;
        let mut ctx = ActionCtx {
            now: world.stamp,
            data: world.data.as_ref(),
            map: &world.map,
            regions: &mut world.regions,
            sects: &mut world.sects,
            phenomenon: world.phenomenon.as_ref(),
            rng: &mut self.rng,
        };
        for &id in living {
            let outcome = commit_next_plan(&mut world.store, id, &mut ctx);
            if let Some(event) = outcome.event {
                events.push(event);
            }
        }
        events
    }

    async fn phase_execute(&mut self, living: &[AvatarId]) -> Vec<Event> {
        let mut events = Vec::new();
        let mut seeds: Vec<StorySeed> = Vec::new();
        let max_rounds = self.config.game.max_action_rounds_per_turn;

        {
            let world = &mut self.world;
            let mut ctx = ActionCtx {
                now: world.stamp,
                data: world.data.as_ref(),
                map: &world.map,
                regions: &mut world.regions,
                sects: &mut world.sects,
                phenomenon: world.phenomenon.as_ref(),
                rng: &mut self.rng,
            };

            // Round 1: everyone steps once.
            let mut retry: BTreeSet<AvatarId> = BTreeSet::new();
            for &id in living {
                let outcome = step_action(&mut world.store, id, &mut ctx);
                events.extend(outcome.events);
                seeds.extend(outcome.seeds);
                if world
                    .store
                    .get(id)
                    .is_some_and(|avatar| avatar.new_action_this_step)
                {
                    retry.insert(id);
                }
            }

            // Rounds 2..: only avatars whose step seated a new action.
            let mut round: u32 = 1;
            while !retry.is_empty() && round < max_rounds {
                let current: Vec<AvatarId> = retry.iter().copied().collect();
                retry.clear();
                for id in current {
                    let outcome = step_action(&mut world.store, id, &mut ctx);
                    events.extend(outcome.events);
                    seeds.extend(outcome.seeds);
                    if world
                        .store
                        .get(id)
                        .is_some_and(|avatar| avatar.new_action_this_step)
                    {
                        retry.insert(id);
                    }
                }
                round = round.saturating_add(1);
            }
        }

        events.extend(self.resolve_stories(seeds).await);
        events
    }

    // -------------------------------------------------------------------
    // Phases 7 and 16: interaction counting
    // -------------------------------------------------------------------

    fn count_interactions(&mut self, events: &[Event], processed: &mut BTreeSet<EventId>) {
        for event in events {
            if !processed.insert(event.id) {
                continue;
            }
            if !event.is_interaction() {
                continue;
            }
            let mut distinct: Vec<AvatarId> = Vec::new();
            for participant in &event.participants {
                if !distinct.contains(participant) {
                    distinct.push(*participant);
                }
            }
            for &id in &distinct {
                if let Some(avatar) = self.world.store.get_mut(id) {
                    for &other in &distinct {
                        if other != id {
                            avatar.count_interaction(other);
                        }
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------
    // Phase 8: relation evolution
    // -------------------------------------------------------------------

    async fn phase_relations(&mut self, living: &[AvatarId]) -> Vec<Event> {
        let now = self.world.stamp;
        let threshold = self.config.social.relation_check_threshold;
        let mut pairs: Vec<(AvatarId, AvatarId)> = Vec::new();
        let mut scheduled: BTreeSet<(AvatarId, AvatarId)> = BTreeSet::new();

        for &id in living {
            let targets: Vec<(AvatarId, u32)> = self
                .world
                .store
                .get(id)
                .map(|avatar| {
                    avatar
                        .interactions
                        .iter()
                        .map(|(&target, state)| (target, state.count))
                        .collect()
                })
                .unwrap_or_default();

            for (target, count) in targets {
                if count < threshold {
                    continue;
                }
                if !self.world.store.get(target).is_some_and(|t| !t.is_dead) {
                    continue;
                }
                let key = (id.min(target), id.max(target));
                if !scheduled.insert(key) {
                    continue;
                }
                pairs.push((id, target));

                // Reset both sides so the pair is not rescheduled next
                // month off the same interactions.
                for (owner, other) in [(id, target), (target, id)] {
                    if let Some(avatar) = self.world.store.get_mut(owner) {
                        let state = avatar.interactions.entry(other).or_default();
                        state.count = 0;
                        state.checked_times = state.checked_times.saturating_add(1);
                    }
                }
            }
        }
        if pairs.is_empty() {
            return Vec::new();
        }
        debug!(pairs = pairs.len(), "relation resolver scheduled");

        let mut tasks = Vec::with_capacity(pairs.len());
        for (a, b) in pairs {
            let context = pair_context(&self.world, a, b);
            let ai = Arc::clone(&self.ai);
            tasks.push(async move { ((a, b), ai.query("relation", "relation", &context).await) });
        }

        let mut events = Vec::new();
        for ((a, b), result) in join_all(tasks).await {
            let value = match result {
                Ok(value) => value,
                Err(error) => {
                    warn!(%error, "relation resolution failed");
                    continue;
                }
            };
            let decision = parse_relation_decision(&value);
            let names = |world: &World| {
                (
                    world.store.get(a).map(|x| x.name.clone()).unwrap_or_default(),
                    world.store.get(b).map(|x| x.name.clone()).unwrap_or_default(),
                )
            };

            if let Some(kind) = decision.new_relation {
                let legal =
                    relations::possible_new_relations(&self.world.store, a, b).contains(&kind);
                if legal
                    && relations::set_relation(
                        &mut self.world.store,
                        &mut self.world.sects,
                        a,
                        b,
                        kind,
                        now,
                    )
                    .is_ok()
                {
                    let (name_a, name_b) = names(&self.world);
                    events.push(Event::major(
                        now,
                        format!("The bond between {name_a} and {name_b} became: {kind}."),
                        vec![a, b],
                    ));
                }
            }
            if let Some(kind) = decision.cancel_relation
                && relations::cancel_relation(&mut self.world.store, a, b, kind)
            {
                let (name_a, name_b) = names(&self.world);
                events.push(Event::major(
                    now,
                    format!("{name_a} and {name_b} severed their bond of {kind}."),
                    vec![a, b],
                ));
            }
        }
        events
    }

    // -------------------------------------------------------------------
    // Phase 9: death resolution
    // -------------------------------------------------------------------

    fn phase_deaths(&mut self, living: &mut Vec<AvatarId>) -> Vec<Event> {
        lifecycle::resolve_deaths(
            &mut self.world.store,
            &mut self.world.regions,
            &mut self.world.sects,
            living,
            self.world.stamp,
        )
    }

    // -------------------------------------------------------------------
    // Phase 10: ageing and new life
    // -------------------------------------------------------------------

    fn phase_age_and_birth(&mut self, living: &[AvatarId]) -> Vec<Event> {
        let now = self.world.stamp;
        let data = Arc::clone(&self.world.data);
        lifecycle::advance_ages(&mut self.world.store, living);

        let purged = self.world.store.purge_dead_mortals(now);
        if purged > 0 {
            debug!(purged, "mortals died of old age");
        }

        let mut events = lifecycle::process_awakening(
            &mut self.world.store,
            &mut self.world.sects,
            &self.world.regions,
            &data,
            &self.world.map,
            self.config.game.npc_awakening_rate_per_month,
            ROGUE_CULTIVATOR_RATE,
            now,
            &mut self.rng,
        );
        events.extend(lifecycle::process_births(
            &mut self.world.store,
            &mut self.world.sects,
            &self.world.regions,
            &data,
            &self.world.map,
            BIRTH_PROBABILITY,
            now,
            &mut self.rng,
        ));
        events
    }

    // -------------------------------------------------------------------
    // Phase 11: backstory fill
    // -------------------------------------------------------------------

    async fn phase_backstories(&mut self, living: &[AvatarId]) {
        let due: Vec<AvatarId> = living
            .iter()
            .copied()
            .filter(|&id| {
                self.world
                    .store
                    .get(id)
                    .is_some_and(|avatar| avatar.backstory.is_none())
            })
            .collect();
        if due.is_empty() {
            return;
        }

        let mut tasks = Vec::with_capacity(due.len());
        for id in due {
            let context = avatar_context(&self.world, id);
            let ai = Arc::clone(&self.ai);
            tasks.push(async move { (id, ai.query("backstory", "backstory", &context).await) });
        }
        for (id, result) in join_all(tasks).await {
            match result {
                Ok(value) => {
                    if let Some(text) = parse_text_answer(&value, "backstory")
                        && let Some(avatar) = self.world.store.get_mut(id)
                    {
                        avatar.backstory = Some(text);
                    }
                }
                Err(error) => warn!(avatar_id = %id, %error, "backstory generation failed"),
            }
        }
    }

    // -------------------------------------------------------------------
    // Phase 12: passive effects, fortune and misfortune
    // -------------------------------------------------------------------

    async fn phase_passives(&mut self, living: &[AvatarId]) -> Vec<Event> {
        let now = self.world.stamp;
        let data = Arc::clone(&self.world.data);

        for &id in living {
            if let Some(avatar) = self.world.store.get_mut(id)
                && avatar.expire_passives(now)
            {
                debug!(avatar_id = %id, "passive effects expired");
            }
        }

        let mut events = Vec::new();
        let mut seeds = Vec::new();
        let fortune_p = self.config.game.fortune_probability;
        let misfortune_p = self.config.game.misfortune_probability;
        for &id in living {
            let Some(avatar) = self.world.store.get_mut(id) else {
                continue;
            };
            if let Some((event, seed)) =
                fortune::try_trigger(avatar, &data.fortunes, fortune_p, &data, now, &mut self.rng)
            {
                events.push(event);
                seeds.push(seed);
            }
            let Some(avatar) = self.world.store.get_mut(id) else {
                continue;
            };
            if let Some((event, seed)) = fortune::try_trigger(
                avatar,
                &data.misfortunes,
                misfortune_p,
                &data,
                now,
                &mut self.rng,
            ) {
                events.push(event);
                seeds.push(seed);
            }
        }

        events.extend(self.resolve_stories(seeds).await);
        events
    }

    // -------------------------------------------------------------------
    // Phase 13: nickname generation
    // -------------------------------------------------------------------

    async fn phase_nicknames(&mut self, living: &[AvatarId], events_so_far: &[Event]) -> Vec<Event> {
        let now = self.world.stamp;
        let major_participants: BTreeSet<AvatarId> = events_so_far
            .iter()
            .filter(|event| event.is_major)
            .flat_map(|event| event.participants.iter().copied())
            .collect();
        let due: Vec<AvatarId> = living
            .iter()
            .copied()
            .filter(|id| {
                major_participants.contains(id)
                    && self
                        .world
                        .store
                        .get(*id)
                        .is_some_and(|avatar| avatar.nickname.is_none())
            })
            .collect();
        if due.is_empty() {
            return Vec::new();
        }

        let mut tasks = Vec::with_capacity(due.len());
        for id in due {
            let context = avatar_context(&self.world, id);
            let ai = Arc::clone(&self.ai);
            tasks.push(async move { (id, ai.query("nickname", "nickname", &context).await) });
        }
        let mut events = Vec::new();
        for (id, result) in join_all(tasks).await {
            match result {
                Ok(value) => {
                    if let Some(nickname) = parse_text_answer(&value, "nickname")
                        && let Some(avatar) = self.world.store.get_mut(id)
                    {
                        avatar.nickname = Some(nickname.clone());
                        events.push(Event::new(
                            now,
                            format!("{} came to be known as {nickname}.", avatar.name),
                            vec![id],
                        ));
                    }
                }
                Err(error) => warn!(avatar_id = %id, %error, "nickname generation failed"),
            }
        }
        events
    }

    // -------------------------------------------------------------------
    // Phase 14: phenomenon rotation
    // -------------------------------------------------------------------

    fn phase_phenomenon(&mut self) -> Vec<Event> {
        let now = self.world.stamp;
        let year = self.world.year();

        let (rotate, is_init) = match &self.world.phenomenon {
            None => (true, true),
            Some(current) => (
                now.month() == Month::January
                    && year.saturating_sub(self.world.phenomenon_start_year)
                        >= current.duration_years,
                false,
            ),
        };
        if !rotate {
            return Vec::new();
        }

        let old_name = self.world.phenomenon.as_ref().map(|p| p.name.clone());
        let picked = pick_phenomenon(
            &self.world.data.phenomena,
            old_name.as_deref(),
            &mut self.rng,
        )
        .cloned();
        let Some(next) = picked else {
            return Vec::new();
        };

        let content = if is_init {
            format!(
                "At the world's dawn the phenomenon '{}' settled over the land: {}",
                next.name, next.description
            )
        } else {
            format!(
                "The heavens shifted: '{}' gave way to '{}'. {}",
                old_name.unwrap_or_default(),
                next.name,
                next.description
            )
        };
        self.world.phenomenon = Some(next);
        self.world.phenomenon_start_year = year;
        vec![Event::new(now, content, Vec::new())]
    }

    // -------------------------------------------------------------------
    // Phase 15: region prosperity
    // -------------------------------------------------------------------

    fn phase_prosperity(&mut self) {
        for region in self.world.regions.values_mut() {
            if region.kind == RegionKind::City {
                region.change_prosperity(1);
            }
        }
    }

    // -------------------------------------------------------------------
    // Stories
    // -------------------------------------------------------------------

    /// Resolve story seeds into story events through the AI source,
    /// fanned out and joined inside the calling phase.
    async fn resolve_stories(&self, seeds: Vec<StorySeed>) -> Vec<Event> {
        if seeds.is_empty() {
            return Vec::new();
        }
        let now = self.world.stamp;
        let base = world_context(&self.world);

        let mut tasks = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let mut context = base.clone();
            if let Some(object) = context.as_object_mut() {
                object.insert("seed".to_owned(), json!(seed.seed));
            }
            let ai = Arc::clone(&self.ai);
            tasks.push(async move { (seed, ai.query("story", "story", &context).await) });
        }

        let mut events = Vec::new();
        for (seed, result) in join_all(tasks).await {
            match result {
                Ok(value) => {
                    if let Some(text) = parse_text_answer(&value, "story") {
                        let mut event = Event::story(now, text, seed.participants);
                        event.is_major = seed.is_major;
                        events.push(event);
                    }
                }
                Err(error) => warn!(%error, "story generation failed"),
            }
        }
        events
    }

    // -------------------------------------------------------------------
    // Phase 19: finalize
    // -------------------------------------------------------------------

    async fn finalize(&mut self, events: Vec<Event>) -> Result<Vec<Event>, TickError> {
        let mut seen: BTreeSet<EventId> = BTreeSet::new();
        let mut unique = Vec::with_capacity(events.len());
        for event in events {
            if seen.insert(event.id) {
                unique.push(event);
            }
        }

        self.event_log.append_batch(&unique).await?;
        for event in &unique {
            info!(stamp = %event.stamp, major = event.is_major, "EVENT: {}", event.content);
        }

        self.world.stamp = self.world.stamp.next();
        Ok(unique)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use serde_json::json;
    use xiuxian_avatars::Avatar;
    use xiuxian_types::{DeathCause, Gender, MonthStamp, RelationKind};
    use xiuxian_world::{Region, RegionKind};

    use super::*;
    use crate::deciders::ScriptedOracle;

    /// A simulator over a test world, a scripted oracle, and an
    /// in-memory event log.
    async fn make_sim(world: World, oracle: ScriptedOracle, config: SimConfig) -> Simulator {
        let event_log = EventLog::open_in_memory().await.unwrap();
        Simulator::new(
            world,
            config,
            Arc::new(AiSource::Scripted(oracle)),
            event_log,
            SmallRng::seed_from_u64(7),
        )
    }

    fn quiet_config() -> SimConfig {
        let mut config = SimConfig::default();
        // Keep the background world still unless a test wants it.
        config.game.fortune_probability = 0.0;
        config.game.misfortune_probability = 0.0;
        config.game.npc_awakening_rate_per_month = 0.0;
        config
    }

    /// An oracle that plans nothing, so avatars stay idle.
    fn idle_oracle() -> ScriptedOracle {
        ScriptedOracle::with_override("decide", json!({"plans": []}))
    }

    fn add_avatar(world: &mut World, name: &str, level: u32) -> AvatarId {
        let avatar = Avatar::new(name, Gender::Male, MonthStamp(0), level, (5, 5));
        let id = avatar.id;
        world.store.register(avatar, false);
        id
    }

    #[tokio::test]
    async fn clock_advances_by_one_per_tick() {
        let world = World::for_tests();
        let start = world.stamp;
        let mut sim = make_sim(world, idle_oracle(), quiet_config()).await;
        for i in 1..=3_u64 {
            sim.step().await.unwrap();
            assert_eq!(sim.world.stamp, MonthStamp(start.0 + i));
        }
    }

    #[tokio::test]
    async fn events_land_in_the_log_exactly_once() {
        let mut world = World::for_tests();
        add_avatar(&mut world, "A", 10);
        let mut sim = make_sim(world, ScriptedOracle::default(), quiet_config()).await;

        let mut total = 0_u64;
        for _ in 0..4 {
            let events = sim.step().await.unwrap();
            // Unique ids within the tick.
            let ids: BTreeSet<EventId> = events.iter().map(|e| e.id).collect();
            assert_eq!(ids.len(), events.len());
            total += events.len() as u64;
        }
        assert_eq!(sim.event_log().count().await.unwrap(), total);
    }

    #[tokio::test]
    async fn death_of_old_age_clears_state() {
        let mut world = World::for_tests();
        let mut avatar = Avatar::new("Elder Shan", Gender::Male, MonthStamp(0), 5, (5, 5));
        // Eleven months short of the Qi Refinement lifespan.
        avatar.age_months = 100 * 12 - 11;
        let id = avatar.id;
        world.store.register(avatar, false);
        let mut sim = make_sim(world, idle_oracle(), quiet_config()).await;

        let mut death_events = Vec::new();
        for _ in 0..12 {
            let events = sim.step().await.unwrap();
            death_events.extend(
                events
                    .into_iter()
                    .filter(|e| e.is_major && e.participants == vec![id]),
            );
            if sim.world.store.get(id).unwrap().is_dead {
                break;
            }
        }

        let avatar = sim.world.store.get(id).unwrap();
        assert!(avatar.is_dead);
        assert_eq!(
            avatar.death_info.as_ref().map(|info| info.cause.clone()),
            Some(DeathCause::OldAge)
        );
        assert!(avatar.current_action.is_none());
        assert!(avatar.plans.is_empty());
        assert!(avatar.owned_regions.is_empty());
        assert!(!sim.world.store.living_ids().contains(&id));
        assert_eq!(death_events.len(), 1, "exactly one major death event");
    }

    #[tokio::test]
    async fn interaction_threshold_schedules_the_resolver_once() {
        let mut world = World::for_tests();
        let a = add_avatar(&mut world, "A", 10);
        let b = add_avatar(&mut world, "B", 10);
        // Pre-seed both sides at the threshold, as three shared events
        // would have.
        for (x, y) in [(a, b), (b, a)] {
            let avatar = world.store.get_mut(x).unwrap();
            avatar.interactions.entry(y).or_default().count = 3;
        }

        let mut sim = make_sim(world, idle_oracle(), quiet_config()).await;
        // Drive the evolution phase directly to observe its immediate
        // postcondition (pass B would later re-count the bond event).
        let living = sim.world.store.living_ids();
        let events = sim.phase_relations(&living).await;
        assert_eq!(events.len(), 1, "one resolution for the deduplicated pair");

        for (x, y) in [(a, b), (b, a)] {
            let state = *sim.world.store.get(x).unwrap().interactions.get(&y).unwrap();
            assert_eq!(state.count, 0, "counter reset");
            assert_eq!(state.checked_times, 1, "checked exactly once");
        }
        // The scripted resolver chose friendship.
        assert_eq!(
            relations::get_relation(&sim.world.store, a, b),
            Some(RelationKind::Friend)
        );
    }

    #[tokio::test]
    async fn infinite_threshold_never_schedules_resolver_work() {
        let mut world = World::for_tests();
        let a = add_avatar(&mut world, "A", 10);
        let b = add_avatar(&mut world, "B", 10);
        for (x, y) in [(a, b), (b, a)] {
            let avatar = world.store.get_mut(x).unwrap();
            avatar.interactions.entry(y).or_default().count = 1000;
        }
        let mut config = quiet_config();
        config.social.relation_check_threshold = u32::MAX;

        let mut sim = make_sim(world, idle_oracle(), config).await;
        sim.step().await.unwrap();

        let state = *sim.world.store.get(a).unwrap().interactions.get(&b).unwrap();
        assert_eq!(state.checked_times, 0);
        assert_eq!(relations::get_relation(&sim.world.store, a, b), None);
    }

    #[tokio::test]
    async fn shared_events_feed_interaction_counters() {
        let mut world = World::for_tests();
        let a = add_avatar(&mut world, "A", 10);
        let b = add_avatar(&mut world, "B", 10);
        let mut sim = make_sim(world, idle_oracle(), quiet_config()).await;

        let shared = vec![
            Event::new(MonthStamp(0), "spar", vec![a, b]),
            Event::new(MonthStamp(0), "tea", vec![a, b]),
            Event::new(MonthStamp(0), "solo", vec![a]),
        ];
        let mut processed = BTreeSet::new();
        sim.count_interactions(&shared, &mut processed);
        // Replays of the same events are not double-counted.
        sim.count_interactions(&shared, &mut processed);

        assert_eq!(
            sim.world.store.get(a).unwrap().interactions.get(&b).unwrap().count,
            2
        );
        assert_eq!(
            sim.world.store.get(b).unwrap().interactions.get(&a).unwrap().count,
            2
        );
    }

    #[tokio::test]
    async fn preemption_runs_the_new_action_in_the_same_month() {
        let mut world = World::for_tests();
        let weak = add_avatar(&mut world, "Weak", 30);
        let strong = add_avatar(&mut world, "Strong", 50);
        world.store.get_mut(weak).unwrap().hp.cur = 120;
        world
            .store
            .get_mut(weak)
            .unwrap()
            .plans
            .push_back(xiuxian_avatars::actions::ActionPlan {
                name: "duel".to_owned(),
                params: [(
                    "target_id".to_owned(),
                    json!(strong.to_string()),
                )]
                .into_iter()
                .collect(),
            });

        let mut sim = make_sim(world, idle_oracle(), quiet_config()).await;
        let events = sim.step().await.unwrap();

        // The duel broke off into flight and the flight completed,
        // all within this single tick.
        assert!(events.iter().any(|e| e.content.contains("broke off")));
        assert!(events.iter().any(|e| e.content.contains("escaped")));
        let avatar = sim.world.store.get(weak).unwrap();
        assert!(avatar.current_action.is_none());
    }

    #[tokio::test]
    async fn derived_siblings_refresh_in_january() {
        let mut world = World::for_tests();
        let parent = add_avatar(&mut world, "P", 60);
        let a = add_avatar(&mut world, "A", 5);
        let b = add_avatar(&mut world, "B", 5);
        relations::set_relation(&mut world.store, &mut world.sects, parent, a, RelationKind::Child, MonthStamp(0)).unwrap();
        relations::set_relation(&mut world.store, &mut world.sects, parent, b, RelationKind::Child, MonthStamp(0)).unwrap();

        // The world starts in January, so the first tick refreshes.
        let mut sim = make_sim(world, idle_oracle(), quiet_config()).await;
        sim.step().await.unwrap();

        assert_eq!(
            sim.world.store.get(a).unwrap().computed_relations.get(&b),
            Some(&RelationKind::Sibling)
        );
        assert_eq!(
            sim.world.store.get(b).unwrap().computed_relations.get(&a),
            Some(&RelationKind::Sibling)
        );
        // The asserted graph is untouched.
        assert_eq!(relations::get_relation(&sim.world.store, a, b), None);
    }

    #[tokio::test]
    async fn grotto_gets_claimed_through_perception() {
        let mut world = World::for_tests();
        world.add_region(Region::new("Azure Mist Grotto", RegionKind::Grotto, (6, 5), 0));
        let id = add_avatar(&mut world, "A", 10);

        let mut sim = make_sim(world, idle_oracle(), quiet_config()).await;
        let events = sim.step().await.unwrap();

        let avatar = sim.world.store.get(id).unwrap();
        assert_eq!(avatar.owned_regions.len(), 1);
        let region = sim.world.regions.values().next().unwrap();
        assert_eq!(region.host_avatar, Some(id));
        assert!(avatar.known_regions.contains(&region.id));
        assert!(events.iter().any(|e| e.content.contains("claimed")));
    }

    #[tokio::test]
    async fn phenomenon_initializes_on_the_first_tick() {
        let mut world = World::for_tests();
        add_avatar(&mut world, "A", 10);
        let mut sim = make_sim(world, idle_oracle(), quiet_config()).await;
        let events = sim.step().await.unwrap();

        assert!(sim.world.phenomenon.is_some());
        assert_eq!(sim.world.phenomenon_start_year, 100);
        assert!(events.iter().any(|e| e.content.contains("settled over the land")));
    }

    #[tokio::test]
    async fn cities_prosper_monthly() {
        let mut world = World::for_tests();
        let city = world.add_region(Region::new("Riverfall City", RegionKind::City, (8, 8), 2));
        let wild = world.add_region(Region::new("Barren Ridge", RegionKind::Wild, (20, 20), 2));
        let mut sim = make_sim(world, idle_oracle(), quiet_config()).await;
        for _ in 0..3 {
            sim.step().await.unwrap();
        }
        assert_eq!(sim.world.regions.get(&city).unwrap().prosperity, 3);
        assert_eq!(sim.world.regions.get(&wild).unwrap().prosperity, 0);
    }

    #[tokio::test]
    async fn stub_decide_keeps_avatars_busy_and_boundary_holds() {
        let mut world = World::for_tests();
        let id = add_avatar(&mut world, "A", 10);
        let mut sim = make_sim(world, ScriptedOracle::default(), quiet_config()).await;
        sim.step().await.unwrap();

        // At the tick boundary the slot is either empty or running.
        let avatar = sim.world.store.get(id).unwrap();
        if let Some(instance) = &avatar.current_action {
            assert_eq!(instance.status, xiuxian_avatars::actions::ActionStatus::Running);
        }
        assert!(!avatar.thinking.is_empty(), "decide applied thinking");
    }

    #[tokio::test]
    async fn january_ranking_snapshot_is_taken() {
        let mut world = World::for_tests();
        add_avatar(&mut world, "A", 80);
        add_avatar(&mut world, "B", 20);
        let mut sim = make_sim(world, idle_oracle(), quiet_config()).await;
        sim.step().await.unwrap();

        let snapshot = sim.world.rankings.last().unwrap();
        assert_eq!(snapshot.year, 100);
        assert_eq!(snapshot.entries.first().unwrap().name, "A");
    }

    #[tokio::test]
    async fn backstories_fill_in_for_everyone() {
        let mut world = World::for_tests();
        let id = add_avatar(&mut world, "A", 10);
        let mut sim = make_sim(world, idle_oracle(), quiet_config()).await;
        sim.step().await.unwrap();
        assert!(sim.world.store.get(id).unwrap().backstory.is_some());
    }
}
