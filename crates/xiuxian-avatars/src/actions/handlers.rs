//! Action execution: commit, step, preemption, and settlement.
//!
//! The executor contract, driven once per month by the orchestrator:
//!
//! 1. **Commit** -- while an avatar has no current action and queued
//!    plans remain, pop the head, validate it, and seat it. Rejected
//!    plans are dropped with a warning.
//! 2. **Step** -- advance the seated instance one month. A step may
//!    *preempt*: replace the slot with a different instance (a duelist
//!    breaking off into flight). The executor detects this by comparing
//!    instance sequence numbers before and after, and the orchestrator
//!    re-runs preempting avatars within the same month, bounded by the
//!    configured round cap.
//! 3. **Settle** -- when a step completes, settlement runs exactly once:
//!    rewards are applied, the cooldown stamp is written, and a story
//!    seed may be emitted for the narrative generator.
//!
//! Combat kills settle inline in the duel step; this is the only
//! living→dead transition outside the death-resolution phase.

use std::collections::BTreeMap;

use rand::Rng;
use rand::rngs::SmallRng;
use tracing::{debug, warn};
use xiuxian_types::{AvatarId, DeathCause, Event, MonthStamp, RegionId, SectId};
use xiuxian_world::phenomenon::CelestialPhenomenon;
use xiuxian_world::{Map, Region, Sect, WorldData};

use super::validation::build_action;
use super::{ActionBody, ActionInstance, ActionStatus};
use crate::StorySeed;
use crate::avatar::Avatar;
use crate::lifecycle;
use crate::store::EntityStore;

/// Tiles covered per month of travel or flight.
const TRAVEL_SPEED: u32 = 3;

/// Maximum duel exchanges before a draw.
const MAX_DUEL_ROUNDS: u32 = 6;

/// Minimum damage of any landed exchange.
const MIN_DUEL_DAMAGE: i64 = 5;

/// World context handed to the executor for one avatar's turn.
pub struct ActionCtx<'a> {
    /// The current month.
    pub now: MonthStamp,
    /// Static game data.
    pub data: &'a WorldData,
    /// The tile grid.
    pub map: &'a Map,
    /// Live region state.
    pub regions: &'a mut BTreeMap<RegionId, Region>,
    /// Live sect state.
    pub sects: &'a mut BTreeMap<SectId, Sect>,
    /// The active celestial phenomenon.
    pub phenomenon: Option<&'a CelestialPhenomenon>,
    /// Deterministic rng owned by the simulator.
    pub rng: &'a mut SmallRng,
}

/// Result of a commit attempt.
#[derive(Debug, Default)]
pub struct CommitOutcome {
    /// Whether an action was seated.
    pub seated: bool,
    /// The start event, when the seated action produces one.
    pub event: Option<Event>,
}

/// Result of stepping one avatar's action.
#[derive(Debug, Default)]
pub struct StepOutcome {
    /// Events produced by the step and any settlement.
    pub events: Vec<Event>,
    /// Narrative requests for the story generator.
    pub seeds: Vec<StorySeed>,
}

/// Seat the next start-able plan for an idle avatar.
///
/// Pops plans FIFO; each is validated via
/// [`build_action`](super::validation::build_action). Invalid plans are
/// dropped with a warning and the next is tried. Seating marks the
/// avatar for a same-month execution round.
pub fn commit_next_plan(store: &mut EntityStore, id: AvatarId, ctx: &mut ActionCtx<'_>) -> CommitOutcome {
    loop {
        let Some(avatar) = store.get_mut(id) else {
            return CommitOutcome::default();
        };
        if avatar.current_action.is_some() || avatar.is_dead {
            return CommitOutcome::default();
        }
        let Some(plan) = avatar.plans.pop_front() else {
            return CommitOutcome::default();
        };

        match build_action(store, id, &plan.name, &plan.params, ctx.regions, ctx.now) {
            Err(reason) => {
                warn!(avatar_id = %id, action = %plan.name, %reason, "plan rejected");
            }
            Ok(body) => {
                let event = start_event(store, id, &body, ctx.now);
                let Some(avatar) = store.get_mut(id) else {
                    return CommitOutcome::default();
                };
                let seq = avatar.next_instance_seq;
                avatar.next_instance_seq = avatar.next_instance_seq.saturating_add(1);
                avatar.current_action = Some(ActionInstance {
                    seq,
                    body,
                    status: ActionStatus::Running,
                });
                avatar.new_action_this_step = true;
                debug!(avatar_id = %id, action = %plan.name, seq, "action seated");
                return CommitOutcome {
                    seated: true,
                    event,
                };
            }
        }
    }
}

/// Advance the avatar's current action by one month.
///
/// Runs the body step, settles on completion, clears the slot on any
/// terminal status -- unless the step preempted the slot with a new
/// instance, which is left seated for the same-month retry round.
pub fn step_action(store: &mut EntityStore, id: AvatarId, ctx: &mut ActionCtx<'_>) -> StepOutcome {
    let mut outcome = StepOutcome::default();

    let Some((seq_before, body_before)) = store
        .get(id)
        .and_then(|avatar| avatar.current_action.as_ref())
        .map(|instance| (instance.seq, instance.body.clone()))
    else {
        return outcome;
    };

    let status = match &body_before {
        ActionBody::Duel { target, .. } => step_duel(store, id, *target, ctx, &mut outcome),
        _ => step_solo(store, id, ctx, &mut outcome),
    };

    if status.is_terminal() {
        if status == ActionStatus::Completed {
            settle(store, id, &body_before, ctx, &mut outcome);
        }
        // Clear the slot -- unless the step already replaced it with a
        // different instance (preemption), which must stay seated.
        if let Some(avatar) = store.get_mut(id)
            && avatar
                .current_action
                .as_ref()
                .is_some_and(|instance| instance.seq == seq_before)
        {
            avatar.current_action = None;
        }
    }

    // Flag maintenance for the retry rounds: the flag survives only when
    // the slot now holds a *different* instance than the one stepped.
    if let Some(avatar) = store.get_mut(id) {
        let preempted = avatar
            .current_action
            .as_ref()
            .is_some_and(|instance| instance.seq != seq_before);
        if !preempted {
            avatar.new_action_this_step = false;
        }
    }

    outcome
}

/// Forcibly terminate the current action without settlement. Used by
/// operator resets; the slot is cleared and no cooldown is written.
pub fn interrupt_action(store: &mut EntityStore, id: AvatarId) {
    if let Some(avatar) = store.get_mut(id)
        && let Some(instance) = &mut avatar.current_action
    {
        instance.status = ActionStatus::Interrupted;
        avatar.current_action = None;
        avatar.new_action_this_step = false;
    }
}

// ---------------------------------------------------------------------------
// Per-kind steps
// ---------------------------------------------------------------------------

/// Step every body kind that touches only the acting avatar.
fn step_solo(store: &mut EntityStore, id: AvatarId, ctx: &mut ActionCtx<'_>, outcome: &mut StepOutcome) -> ActionStatus {
    // Flight needs the pursuer's position before the mutable borrow.
    let pursuer_pos = store
        .get(id)
        .and_then(|avatar| match avatar.current_action.as_ref().map(|i| &i.body) {
            Some(ActionBody::Flee { from, .. }) => store.get(*from).map(|pursuer| pursuer.pos),
            _ => None,
        });
    let destination_center = store
        .get(id)
        .and_then(|avatar| match avatar.current_action.as_ref().map(|i| &i.body) {
            Some(ActionBody::Travel { destination }) => {
                ctx.regions.get(destination).map(|region| region.center)
            }
            _ => None,
        });

    let Some(avatar) = store.get_mut(id) else {
        return ActionStatus::Cancelled;
    };
    // Lift the instance out of the slot so its body and the avatar can
    // be mutated side by side, then reseat it.
    let Some(mut instance) = avatar.current_action.take() else {
        return ActionStatus::Cancelled;
    };

    let status = match &mut instance.body {
        ActionBody::Cultivate {
            months_done,
            months_target,
        } => {
            *months_done = months_done.saturating_add(1);
            avatar.hp.heal(5);
            if *months_done >= *months_target {
                ActionStatus::Completed
            } else {
                ActionStatus::Running
            }
        }
        ActionBody::Travel { .. } => match destination_center {
            None => {
                outcome.events.push(Event::new(
                    ctx.now,
                    format!("{} lost the way: the destination is gone.", avatar.name),
                    vec![id],
                ));
                ActionStatus::Cancelled
            }
            Some(center) => {
                for _ in 0..TRAVEL_SPEED {
                    avatar.pos = Map::step_toward(avatar.pos, center);
                }
                if avatar.pos == center {
                    ActionStatus::Completed
                } else {
                    ActionStatus::Running
                }
            }
        },
        ActionBody::Seclude {
            months_done,
            months_target,
        } => {
            *months_done = months_done.saturating_add(1);
            avatar.hp.heal(10);
            if *months_done >= *months_target {
                ActionStatus::Completed
            } else {
                ActionStatus::Running
            }
        }
        ActionBody::Flee { months_done, .. } => {
            *months_done = months_done.saturating_add(1);
            if let Some((px, py)) = pursuer_pos {
                // Run directly away from the pursuer, clamped to the map.
                for _ in 0..TRAVEL_SPEED {
                    let (x, y) = avatar.pos;
                    let next = (
                        if x >= px { x.saturating_add(1) } else { x.saturating_sub(1) },
                        if y >= py { y.saturating_add(1) } else { y.saturating_sub(1) },
                    );
                    let clamped = (
                        next.0.min(ctx.map.width().saturating_sub(1)),
                        next.1.min(ctx.map.height().saturating_sub(1)),
                    );
                    avatar.pos = clamped;
                }
            }
            ActionStatus::Completed
        }
        ActionBody::Forage {
            months_done,
            months_target,
        } => {
            *months_done = months_done.saturating_add(1);
            let herbs = ctx.rng.random_range(1..=2_u32);
            let entry = avatar.bag.entry("spirit herb".to_owned()).or_insert(0);
            *entry = entry.saturating_add(herbs);
            if *months_done >= *months_target {
                ActionStatus::Completed
            } else {
                ActionStatus::Running
            }
        }
        ActionBody::Idle {
            months_done,
            months_target,
        } => {
            *months_done = months_done.saturating_add(1);
            avatar.hp.heal(15);
            if *months_done >= *months_target {
                ActionStatus::Completed
            } else {
                ActionStatus::Running
            }
        }
        ActionBody::Duel { .. } => ActionStatus::Running,
    };

    avatar.current_action = Some(instance);
    status
}

/// Verdict of one duel exchange.
enum DuelVerdict {
    Continue,
    TargetSlain,
    SelfDown,
    MustFlee,
    Draw,
}

/// Step a duel: one exchange per month, kills settled inline,
/// preemption into flight when badly hurt.
fn step_duel(
    store: &mut EntityStore,
    id: AvatarId,
    target: AvatarId,
    ctx: &mut ActionCtx<'_>,
    outcome: &mut StepOutcome,
) -> ActionStatus {
    let my_name = store.get(id).map(|a| a.name.clone()).unwrap_or_default();
    let target_alive = store.get(target).is_some_and(|a| !a.is_dead);
    if !target_alive {
        outcome.events.push(Event::new(
            ctx.now,
            format!("{my_name}'s opponent no longer stands; the duel is off."),
            vec![id],
        ));
        return ActionStatus::Cancelled;
    }

    // Pre-compute derived attacks before taking the pair borrow.
    let my_attack = store
        .get(id)
        .map(|a| a.derived_attributes(ctx.data, ctx.phenomenon, ctx.now).attack)
        .unwrap_or(0);
    let their_attack = store
        .get(target)
        .map(|a| a.derived_attributes(ctx.data, ctx.phenomenon, ctx.now).attack)
        .unwrap_or(0);

    let verdict = store
        .with_pair_mut(id, target, |me, them| {
            them.hp
                .damage((my_attack.saturating_sub(i64::from(them.level()))).max(MIN_DUEL_DAMAGE));
            if them.hp.cur <= 0 {
                return DuelVerdict::TargetSlain;
            }
            me.hp
                .damage((their_attack.saturating_sub(i64::from(me.level()))).max(MIN_DUEL_DAMAGE));
            if me.hp.cur <= 0 {
                return DuelVerdict::SelfDown;
            }
            if me.hp.cur.saturating_mul(4) < me.hp.max {
                return DuelVerdict::MustFlee;
            }
            if let Some(instance) = me.current_action.as_mut()
                && let ActionBody::Duel { rounds_fought, .. } = &mut instance.body
            {
                *rounds_fought = rounds_fought.saturating_add(1);
                if *rounds_fought >= MAX_DUEL_ROUNDS {
                    return DuelVerdict::Draw;
                }
            }
            DuelVerdict::Continue
        })
        .unwrap_or(DuelVerdict::Draw);

    let target_name = store.get(target).map(|a| a.name.clone()).unwrap_or_default();

    match verdict {
        DuelVerdict::Continue => ActionStatus::Running,
        DuelVerdict::TargetSlain => {
            if let Some(event) = lifecycle::apply_death(
                store,
                ctx.regions,
                ctx.sects,
                target,
                DeathCause::Killed { by: id },
                ctx.now,
            ) {
                outcome.events.push(event);
            }
            outcome.events.push(Event::major(
                ctx.now,
                format!("{my_name} struck down {target_name} in a duel to the death."),
                vec![id, target],
            ));
            outcome.seeds.push(StorySeed {
                seed: format!("{my_name} slew {target_name} in a duel"),
                participants: vec![id, target],
                is_major: true,
            });
            ActionStatus::Completed
        }
        DuelVerdict::SelfDown => {
            outcome.events.push(Event::major(
                ctx.now,
                format!("{my_name} collapsed under {target_name}'s blows."),
                vec![id, target],
            ));
            ActionStatus::Completed
        }
        DuelVerdict::MustFlee => {
            // Preempt: replace the duel with flight. The new instance
            // stays seated; the orchestrator re-runs this avatar within
            // the same month.
            if let Some(avatar) = store.get_mut(id) {
                let seq = avatar.next_instance_seq;
                avatar.next_instance_seq = avatar.next_instance_seq.saturating_add(1);
                avatar.current_action = Some(ActionInstance {
                    seq,
                    body: ActionBody::Flee {
                        from: target,
                        months_done: 0,
                    },
                    status: ActionStatus::Running,
                });
                avatar.new_action_this_step = true;
            }
            outcome.events.push(Event::new(
                ctx.now,
                format!("{my_name} broke off the duel and fled from {target_name}."),
                vec![id, target],
            ));
            ActionStatus::Running
        }
        DuelVerdict::Draw => {
            outcome.events.push(Event::new(
                ctx.now,
                format!("{my_name} and {target_name} fought to a standstill and parted."),
                vec![id, target],
            ));
            ActionStatus::Completed
        }
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Run settlement for a completed body: rewards, events, story seeds,
/// and the cooldown stamp.
fn settle(
    store: &mut EntityStore,
    id: AvatarId,
    body: &ActionBody,
    ctx: &mut ActionCtx<'_>,
    outcome: &mut StepOutcome,
) {
    let speed = store
        .get(id)
        .map(|a| {
            a.derived_attributes(ctx.data, ctx.phenomenon, ctx.now)
                .cultivation_speed
        })
        .unwrap_or(0);
    let breakthrough_roll: f64 = ctx.rng.random();
    // Names resolved before the mutable borrow below.
    let pursuer_name = match body {
        ActionBody::Flee { from, .. } => store
            .get(*from)
            .map_or_else(|| "the pursuer".to_owned(), |a| a.name.clone()),
        _ => String::new(),
    };

    let Some(avatar) = store.get_mut(id) else {
        return;
    };
    let name = avatar.name.clone();

    match body {
        ActionBody::Cultivate { months_target, .. } => {
            let mut gain = (*months_target / 3).max(1);
            if speed >= 50 {
                gain = gain.saturating_add(1);
            }
            avatar.raise_level(gain);
            outcome.events.push(Event::new(
                ctx.now,
                format!(
                    "{name} finished {months_target} months of cultivation, reaching level {}.",
                    avatar.level()
                ),
                vec![id],
            ));
        }
        ActionBody::Travel { destination } => {
            let region_name = ctx
                .regions
                .get(destination)
                .map(|r| r.name.clone())
                .unwrap_or_else(|| "an unknown place".to_owned());
            outcome.events.push(Event::new(
                ctx.now,
                format!("{name} arrived at {region_name}."),
                vec![id],
            ));
        }
        ActionBody::Seclude { months_target, .. } => {
            // Breakthrough odds improve with cultivation speed.
            let chance = (0.5 + (speed as f64) / 200.0).clamp(0.05, 0.9);
            if breakthrough_roll < chance {
                avatar.raise_level(3);
                let realm = avatar.realm();
                outcome.events.push(Event::major(
                    ctx.now,
                    format!(
                        "{name} emerged from {months_target} months of seclusion with a breakthrough, now at {realm}."
                    ),
                    vec![id],
                ));
                outcome.seeds.push(StorySeed {
                    seed: format!("{name} broke through to {realm} after seclusion"),
                    participants: vec![id],
                    is_major: true,
                });
            } else {
                let backlash = avatar.hp.max / 4;
                avatar.hp.damage(backlash);
                avatar.temporary_effects.push(crate::avatar::TemporaryEffect {
                    source: "qi deviation".to_owned(),
                    effects: BTreeMap::from([("cultivation_speed".to_owned(), -10)]),
                    started_at: ctx.now,
                    duration_months: 6,
                });
                outcome.events.push(Event::major(
                    ctx.now,
                    format!("{name}'s breakthrough failed; qi deviation wracked their meridians."),
                    vec![id],
                ));
            }
        }
        ActionBody::Duel { target, .. } => {
            // Settlement events were produced inline by the duel step.
            let _ = target;
        }
        ActionBody::Flee { from, .. } => {
            outcome.events.push(Event::new(
                ctx.now,
                format!("{name} shook off {pursuer_name} and escaped."),
                vec![id, *from],
            ));
        }
        ActionBody::Forage { months_target, .. } => {
            let herbs = avatar.bag.get("spirit herb").copied().unwrap_or(0);
            outcome.events.push(Event::new(
                ctx.now,
                format!(
                    "{name} returned from {months_target} months of foraging with {herbs} spirit herbs."
                ),
                vec![id],
            ));
        }
        ActionBody::Idle { .. } => {}
    }

    // Cooldown stamp, consulted by `can_start`.
    let action_name = body.name().to_owned();
    if let Some(avatar) = store.get_mut(id) {
        avatar.action_cooldowns.insert(action_name, ctx.now);
    }
}

/// Build the start event for a freshly seated action, when its kind
/// produces one.
fn start_event(store: &EntityStore, id: AvatarId, body: &ActionBody, now: MonthStamp) -> Option<Event> {
    let name = store.get(id).map(|avatar| avatar.name.clone())?;
    match body {
        ActionBody::Seclude { months_target, .. } => Some(Event::major(
            now,
            format!("{name} sealed the cave door for {months_target} months of seclusion."),
            vec![id],
        )),
        ActionBody::Duel { target, .. } => {
            let target_name = store.get(*target).map(|avatar| avatar.name.clone())?;
            Some(Event::major(
                now,
                format!("{name} challenged {target_name} to a duel."),
                vec![id, *target],
            ))
        }
        ActionBody::Travel { .. } => Some(Event::new(
            now,
            format!("{name} set out on a journey."),
            vec![id],
        )),
        _ => None,
    }
}
