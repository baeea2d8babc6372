//! The engine loop: ticks, operator controls, and game commands.
//!
//! [`EngineRunner`] owns the simulator and drives it on a fixed
//! interval while listening for game-lifecycle commands from the API
//! (save, load, delete, list). Operator state is honored between
//! ticks: pause blocks ticking but keeps serving commands, an
//! unhealthy LLM gateway pauses ticking automatically, and
//! shutdown/reset/reinit requests end the loop with a reason the
//! binary acts on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use xiuxian_db::{EventLog, SaveStore};
use xiuxian_types::{AvatarId, Event, MonthStamp};

use crate::operator::OperatorState;
use crate::persist;
use crate::simulator::Simulator;

/// Why the engine loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Clean shutdown was requested.
    Shutdown,
    /// The operator asked for a reset (reload the current save).
    Reset,
    /// The operator asked for a fresh world.
    Reinit,
}

/// A game-lifecycle command from the API.
#[derive(Debug)]
pub enum EngineCommand {
    /// Write the world to a named save.
    Save {
        /// Save slot name.
        name: String,
        /// Result channel.
        reply: oneshot::Sender<Result<(), String>>,
    },
    /// Replace the running world with a named save. On success the
    /// reply carries a handle onto the newly opened event log, so the
    /// API server can refresh its query handle.
    Load {
        /// Save slot name.
        name: String,
        /// Result channel.
        reply: oneshot::Sender<Result<EventLog, String>>,
    },
    /// Delete a named save.
    DeleteSave {
        /// Save slot name.
        name: String,
        /// Result channel.
        reply: oneshot::Sender<Result<(), String>>,
    },
    /// List existing saves.
    ListSaves {
        /// Result channel.
        reply: oneshot::Sender<Result<Vec<String>, String>>,
    },
}

/// One avatar's per-tick diff for the UI.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AvatarDiff {
    /// Who.
    pub id: AvatarId,
    /// Current tile position.
    pub pos: (u32, u32),
    /// Emoji of the current action, if any.
    pub action_emoji: Option<String>,
}

/// The frame pushed to observers after every tick.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TickReport {
    /// Calendar year of the completed month.
    pub year: u64,
    /// Month number (1..=12) of the completed month.
    pub month: u64,
    /// Events the month produced.
    pub events: Vec<Event>,
    /// Position/action diffs for living avatars.
    pub diffs: Vec<AvatarDiff>,
    /// Avatars who died this month.
    pub deaths: Vec<AvatarId>,
    /// Avatars born or awakened this month.
    pub births: Vec<AvatarId>,
    /// Name of the active phenomenon.
    pub phenomenon: Option<String>,
    /// Gatherings that fired this month.
    pub active_gatherings: Vec<String>,
}

/// Receives engine notifications. The server implements this to
/// broadcast frames over the WebSocket and refresh its REST snapshot.
pub trait TickCallback: Send {
    /// A tick completed. `world` is the post-tick state.
    fn on_tick(&mut self, report: &TickReport, world: &crate::world::World);

    /// The LLM gateway went unhealthy and ticking paused.
    fn on_llm_unhealthy(&mut self) {}
}

/// A callback that ignores everything (tests, headless runs).
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _report: &TickReport, _world: &crate::world::World) {}
}

/// Owns the simulator and the save store while the engine runs.
pub struct EngineRunner {
    /// The simulator being driven.
    pub sim: Simulator,
    saves: SaveStore,
    current_slot: String,
}

impl EngineRunner {
    /// Assemble a runner over a simulator and a saves directory.
    pub fn new(sim: Simulator, saves: SaveStore, current_slot: impl Into<String>) -> Self {
        Self {
            sim,
            saves,
            current_slot: current_slot.into(),
        }
    }

    /// Drive the loop until shutdown, reset, or reinit.
    pub async fn run(
        &mut self,
        operator: &Arc<OperatorState>,
        commands: &mut mpsc::Receiver<EngineCommand>,
        callback: &mut dyn TickCallback,
        tick_interval: Duration,
    ) -> RunOutcome {
        info!(interval_ms = tick_interval.as_millis(), "engine loop started");
        loop {
            if operator.is_shutdown_requested() {
                return RunOutcome::Shutdown;
            }
            if operator.take_reset() {
                return RunOutcome::Reset;
            }
            if operator.take_reinit() {
                return RunOutcome::Reinit;
            }

            // An unhealthy gateway pauses ticking until the operator
            // intervenes.
            let unhealthy = self.sim.ai_unhealthy();
            operator.set_llm_unhealthy(unhealthy);
            if unhealthy && !operator.is_paused() {
                warn!("llm gateway unhealthy, pausing");
                operator.pause();
                callback.on_llm_unhealthy();
            }

            if operator.is_paused() {
                tokio::select! {
                    () = operator.wait_while_paused() => {}
                    command = commands.recv() => {
                        match command {
                            Some(command) => self.handle_command(command).await,
                            None => return RunOutcome::Shutdown,
                        }
                    }
                }
                continue;
            }

            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => return RunOutcome::Shutdown,
                    }
                }
                () = tokio::time::sleep(tick_interval) => {
                    match self.sim.step().await {
                        Ok(events) => {
                            let report = self.build_report(events);
                            callback.on_tick(&report, &self.sim.world);
                        }
                        Err(error) => {
                            error!(%error, "tick failed, pausing");
                            operator.pause();
                        }
                    }
                }
            }
        }
    }

    /// Execute one game-lifecycle command.
    pub async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Save { name, reply } => {
                let result = self.save_to(&name);
                let _ = reply.send(result);
            }
            EngineCommand::Load { name, reply } => {
                let result = self.load_from(&name).await;
                let _ = reply.send(result);
            }
            EngineCommand::DeleteSave { name, reply } => {
                let result = self.saves.delete(&name).map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            EngineCommand::ListSaves { reply } => {
                let result = self.saves.list().map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
        }
    }

    /// Write the world JSON (and, when saving under a new name, copy
    /// the event database alongside it).
    fn save_to(&mut self, name: &str) -> Result<(), String> {
        let save = persist::build_save(&self.sim.world);
        self.saves
            .write_world(name, &save)
            .map_err(|e| e.to_string())?;
        if name != self.current_slot {
            let from = self
                .saves
                .events_db_path(&self.current_slot)
                .map_err(|e| e.to_string())?;
            let to = self.saves.events_db_path(name).map_err(|e| e.to_string())?;
            if from.exists() {
                std::fs::copy(&from, &to).map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }

    /// Replace the running world with a save. On any failure the
    /// in-memory world is left untouched. Returns a handle onto the
    /// newly opened event log.
    async fn load_from(&mut self, name: &str) -> Result<EventLog, String> {
        let save: persist::SaveFile = self.saves.read_world(name).map_err(|e| e.to_string())?;
        let data = Arc::clone(&self.sim.world.data);
        let world = persist::restore_world(save, data).map_err(|e| e.to_string())?;
        let db_path = self.saves.events_db_path(name).map_err(|e| e.to_string())?;
        let log = EventLog::open(&db_path).await.map_err(|e| e.to_string())?;
        let handle = log.clone();

        self.sim.swap_world(world);
        self.sim.swap_event_log(log);
        self.current_slot = name.to_owned();
        info!(save = name, "world loaded");
        Ok(handle)
    }

    /// Assemble the observer frame for a completed tick.
    fn build_report(&mut self, events: Vec<Event>) -> TickReport {
        // The clock already advanced; the report describes the month
        // that just ran.
        let done = MonthStamp(self.sim.world.stamp.0.saturating_sub(1));
        let births = self.sim.world.store.pop_newly_born();
        let deaths = self.sim.world.store.pop_newly_dead();

        let diffs: Vec<AvatarDiff> = self
            .sim
            .world
            .store
            .iter()
            .filter(|avatar| !avatar.is_dead)
            .map(|avatar| AvatarDiff {
                id: avatar.id,
                pos: avatar.pos,
                action_emoji: avatar
                    .current_action
                    .as_ref()
                    .map(|instance| instance.meta().emoji.to_owned()),
            })
            .collect();

        let active_gatherings: Vec<String> = self
            .sim
            .world
            .gatherings
            .gatherings
            .iter()
            .filter(|gathering| gathering.last_run_year == Some(done.year()))
            .map(|gathering| gathering.kind.display_name().to_owned())
            .collect();

        TickReport {
            year: done.year(),
            month: done.month_number(),
            events,
            diffs,
            deaths,
            births,
            phenomenon: self.sim.world.phenomenon.as_ref().map(|p| p.name.clone()),
            active_gatherings,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use serde_json::json;

    use super::*;
    use crate::config::SimConfig;
    use crate::deciders::{AiSource, ScriptedOracle};
    use crate::world::World;

    async fn make_runner() -> EngineRunner {
        let mut world = World::for_tests();
        let avatar = xiuxian_avatars::Avatar::new(
            "Li Chen",
            xiuxian_types::Gender::Male,
            MonthStamp(0),
            10,
            (5, 5),
        );
        world.store.register(avatar, false);

        let mut config = SimConfig::default();
        config.game.fortune_probability = 0.0;
        config.game.misfortune_probability = 0.0;
        config.game.npc_awakening_rate_per_month = 0.0;

        let sim = Simulator::new(
            world,
            config,
            Arc::new(AiSource::Scripted(ScriptedOracle::with_override(
                "decide",
                json!({"plans": []}),
            ))),
            EventLog::open_in_memory().await.unwrap(),
            SmallRng::seed_from_u64(3),
        );

        let root = std::env::temp_dir().join(format!(
            "xiuxian_runner_{}_{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&root);
        EngineRunner::new(sim, SaveStore::new(root), "world")
    }

    #[tokio::test]
    async fn save_then_load_roundtrips_through_commands() {
        let mut runner = make_runner().await;
        let stamp_before = runner.sim.world.stamp;

        let (tx, rx) = oneshot::channel();
        runner
            .handle_command(EngineCommand::Save {
                name: "slot1".to_owned(),
                reply: tx,
            })
            .await;
        rx.await.unwrap().unwrap();

        // Advance, then load back.
        runner.sim.step().await.unwrap();
        assert_ne!(runner.sim.world.stamp, stamp_before);

        let (tx, rx) = oneshot::channel();
        runner
            .handle_command(EngineCommand::Load {
                name: "slot1".to_owned(),
                reply: tx,
            })
            .await;
        assert!(rx.await.unwrap().is_ok());
        assert_eq!(runner.sim.world.stamp, stamp_before);
    }

    #[tokio::test]
    async fn failed_load_leaves_the_world_untouched() {
        let mut runner = make_runner().await;
        let stamp_before = runner.sim.world.stamp;

        let (tx, rx) = oneshot::channel();
        runner
            .handle_command(EngineCommand::Load {
                name: "missing".to_owned(),
                reply: tx,
            })
            .await;
        assert!(rx.await.unwrap().is_err());
        assert_eq!(runner.sim.world.stamp, stamp_before);
    }

    #[tokio::test]
    async fn list_and_delete_commands() {
        let mut runner = make_runner().await;
        for name in ["alpha", "beta"] {
            let (tx, rx) = oneshot::channel();
            runner
                .handle_command(EngineCommand::Save {
                    name: name.to_owned(),
                    reply: tx,
                })
                .await;
            rx.await.unwrap().unwrap();
        }

        let (tx, rx) = oneshot::channel();
        runner.handle_command(EngineCommand::ListSaves { reply: tx }).await;
        assert_eq!(rx.await.unwrap().unwrap(), vec!["alpha".to_owned(), "beta".to_owned()]);

        let (tx, rx) = oneshot::channel();
        runner
            .handle_command(EngineCommand::DeleteSave {
                name: "alpha".to_owned(),
                reply: tx,
            })
            .await;
        rx.await.unwrap().unwrap();

        let (tx, rx) = oneshot::channel();
        runner.handle_command(EngineCommand::ListSaves { reply: tx }).await;
        assert_eq!(rx.await.unwrap().unwrap(), vec!["beta".to_owned()]);
    }

    #[tokio::test]
    async fn shutdown_request_ends_the_loop() {
        let mut runner = make_runner().await;
        let operator = Arc::new(OperatorState::new());
        operator.request_shutdown();
        let (_tx, mut rx) = mpsc::channel(4);
        let outcome = runner
            .run(&operator, &mut rx, &mut NoOpCallback, Duration::from_millis(5))
            .await;
        assert_eq!(outcome, RunOutcome::Shutdown);
    }

    #[tokio::test]
    async fn ticks_reach_the_callback() {
        struct Counting(u32);
        impl TickCallback for Counting {
            fn on_tick(&mut self, report: &TickReport, _world: &crate::world::World) {
                self.0 += 1;
                assert!(report.month >= 1 && report.month <= 12);
            }
        }

        let mut runner = make_runner().await;
        let operator = Arc::new(OperatorState::new());
        let (_tx, mut rx) = mpsc::channel(4);
        let mut callback = Counting(0);

        let stopper = Arc::clone(&operator);
        let stop_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            stopper.request_shutdown();
        });
        let outcome = runner
            .run(&operator, &mut rx, &mut callback, Duration::from_millis(5))
            .await;
        stop_task.await.unwrap();

        assert_eq!(outcome, RunOutcome::Shutdown);
        assert!(callback.0 >= 1, "at least one tick was reported");
    }
}
