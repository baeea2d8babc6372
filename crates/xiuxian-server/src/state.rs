//! Shared application state for the API server.
//!
//! [`AppState`] holds the broadcast channel for tick frames, the REST
//! snapshot refreshed by [`ObserverCallback`] after every tick, a
//! cloneable handle onto the event log, the operator control state, and
//! the engine command channel. Handlers read the snapshot briefly under
//! a std `RwLock` and never block a tick.

use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use xiuxian_core::World;
use xiuxian_core::operator::OperatorState;
use xiuxian_core::runner::{EngineCommand, TickCallback, TickReport};
use xiuxian_db::EventLog;
use xiuxian_types::Event;

use crate::dto;

/// Capacity of the tick broadcast channel. Slow clients that fall
/// further behind than this skip ahead.
const BROADCAST_CAPACITY: usize = 256;

/// Recent events retained in the snapshot for `/api/state`.
const RECENT_EVENTS_KEPT: usize = 50;

/// One-shot control messages pushed alongside tick frames.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// A regular tick frame.
    Tick(TickReport),
    /// The LLM gateway went unhealthy; ticking paused.
    LlmConfigRequired,
}

/// The REST snapshot, rebuilt after every tick.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Calendar year of the last completed month.
    pub year: u64,
    /// Month number of the last completed month.
    pub month: u64,
    /// Avatar summaries.
    pub avatars: Vec<dto::AvatarSummary>,
    /// Avatar details keyed by id string.
    pub avatar_details: std::collections::BTreeMap<String, dto::AvatarDetail>,
    /// Region rows keyed by id string.
    pub regions: std::collections::BTreeMap<String, dto::RegionDto>,
    /// Sect details keyed by id string.
    pub sects: std::collections::BTreeMap<String, dto::SectDto>,
    /// The static map.
    pub map: dto::MapDto,
    /// Active phenomenon.
    pub phenomenon: Option<dto::PhenomenonDto>,
    /// Recent events, newest first.
    pub recent_events: Vec<Event>,
}

/// Shared state for the Axum application.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast sender for tick/control frames.
    pub tx: broadcast::Sender<ControlFrame>,
    /// The REST snapshot.
    pub snapshot: Arc<RwLock<Snapshot>>,
    /// Cloneable handle onto the current event log.
    pub event_log: Arc<RwLock<Option<EventLog>>>,
    /// Operator control state shared with the engine.
    pub operator: Arc<OperatorState>,
    /// Command channel into the engine loop.
    pub commands: mpsc::Sender<EngineCommand>,
}

impl AppState {
    /// Assemble the shared state.
    pub fn new(operator: Arc<OperatorState>, commands: mpsc::Sender<EngineCommand>) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            snapshot: Arc::new(RwLock::new(Snapshot::default())),
            event_log: Arc::new(RwLock::new(None)),
            operator,
            commands,
        }
    }

    /// Install (or replace, after a load) the event-log handle.
    pub fn set_event_log(&self, log: EventLog) {
        if let Ok(mut slot) = self.event_log.write() {
            *slot = Some(log);
        }
    }

    /// A clone of the current event-log handle, if installed.
    pub fn event_log_handle(&self) -> Option<EventLog> {
        self.event_log.read().ok().and_then(|slot| slot.clone())
    }

    /// Subscribe to the frame stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ControlFrame> {
        self.tx.subscribe()
    }

    /// Broadcast a frame; returns how many receivers got it (0 when no
    /// client is connected, which is not an error).
    pub fn broadcast(&self, frame: ControlFrame) -> usize {
        self.tx.send(frame).unwrap_or(0)
    }

    /// Seed the snapshot from a world before the first tick, so the UI
    /// has something to render immediately.
    pub fn prime_snapshot(&self, world: &World) {
        let snapshot = build_snapshot(world, &[]);
        if let Ok(mut slot) = self.snapshot.write() {
            *slot = snapshot;
        }
    }
}

/// Build a fresh snapshot from the world plus this tick's events.
fn build_snapshot(world: &World, events: &[Event]) -> Snapshot {
    let mut avatars = Vec::new();
    let mut avatar_details = std::collections::BTreeMap::new();
    for avatar in world.store.iter() {
        avatars.push(dto::avatar_summary(world, avatar));
        avatar_details.insert(avatar.id.to_string(), dto::avatar_detail(world, avatar));
    }
    let regions = world
        .regions
        .values()
        .map(|region| (region.id.to_string(), dto::region_dto(world, region)))
        .collect();
    let sects = world
        .sects
        .values()
        .map(|sect| (sect.id.to_string(), dto::sect_dto(world, sect)))
        .collect();

    // The clock points at the upcoming month; the snapshot describes
    // the one that just finished (or the initial month when priming).
    let done = xiuxian_types::MonthStamp(world.stamp.0.saturating_sub(1));

    Snapshot {
        year: done.year(),
        month: done.month_number(),
        avatars,
        avatar_details,
        regions,
        sects,
        map: dto::map_dto(world),
        phenomenon: world.phenomenon.as_ref().map(|p| dto::PhenomenonDto {
            name: p.name.clone(),
            description: p.description.clone(),
            duration_years: p.duration_years,
        }),
        recent_events: events.iter().rev().take(RECENT_EVENTS_KEPT).cloned().collect(),
    }
}

/// The engine-side callback: refreshes the snapshot and broadcasts the
/// frame after every tick.
pub struct ObserverCallback {
    state: AppState,
}

impl ObserverCallback {
    /// Wrap the shared state.
    pub const fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl TickCallback for ObserverCallback {
    fn on_tick(&mut self, report: &TickReport, world: &World) {
        let mut snapshot = build_snapshot(world, &report.events);
        // Merge in the previous snapshot's recent events so quiet
        // months do not blank the feed.
        if let Ok(previous) = self.state.snapshot.read() {
            let room = RECENT_EVENTS_KEPT.saturating_sub(snapshot.recent_events.len());
            snapshot
                .recent_events
                .extend(previous.recent_events.iter().take(room).cloned());
        }
        if let Ok(mut slot) = self.state.snapshot.write() {
            *slot = snapshot;
        }
        let receivers = self.state.broadcast(ControlFrame::Tick(report.clone()));
        debug!(receivers, year = report.year, month = report.month, "tick frame broadcast");
    }

    fn on_llm_unhealthy(&mut self) {
        let _ = self.state.broadcast(ControlFrame::LlmConfigRequired);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use xiuxian_avatars::Avatar;
    use xiuxian_types::{Gender, MonthStamp};

    use super::*;

    fn app_state() -> AppState {
        let (commands, _rx) = mpsc::channel(4);
        AppState::new(Arc::new(OperatorState::new()), commands)
    }

    #[test]
    fn priming_fills_the_snapshot() {
        let state = app_state();
        let mut world = World::for_tests();
        world.store.register(
            Avatar::new("Li Chen", Gender::Male, MonthStamp(0), 10, (5, 5)),
            false,
        );
        state.prime_snapshot(&world);

        let snapshot = state.snapshot.read().unwrap();
        assert_eq!(snapshot.avatars.len(), 1);
        assert_eq!(snapshot.avatar_details.len(), 1);
        assert_eq!(snapshot.map.width, 32);
    }

    #[test]
    fn on_tick_refreshes_and_broadcasts() {
        let state = app_state();
        let mut rx = state.subscribe();
        let world = World::for_tests();

        let report = TickReport {
            year: 100,
            month: 1,
            events: vec![Event::new(MonthStamp(1200), "something happened", vec![])],
            diffs: vec![],
            deaths: vec![],
            births: vec![],
            phenomenon: None,
            active_gatherings: vec![],
        };
        let mut callback = ObserverCallback::new(state.clone());
        callback.on_tick(&report, &world);

        let snapshot = state.snapshot.read().unwrap();
        assert_eq!(snapshot.recent_events.len(), 1);
        drop(snapshot);

        match rx.try_recv().unwrap() {
            ControlFrame::Tick(frame) => assert_eq!(frame.year, 100),
            ControlFrame::LlmConfigRequired => panic!("unexpected control frame"),
        }
    }
}
