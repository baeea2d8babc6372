//! Engine binary for the cultivation-world simulator.
//!
//! Wires everything together: configuration, static data, the AI
//! source, the world (restored from the default save or freshly
//! seeded), the event log, the API server, and the engine loop.
//!
//! # Startup sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration (`xiuxian-config.yaml` or `$XIUXIAN_CONFIG`)
//! 3. Load static game data from the CSV tables
//! 4. Build the AI source (gateway or scripted oracle)
//! 5. Restore the default save, or seed a fresh world
//! 6. Open the save's event log
//! 7. Start the API server
//! 8. Run the engine loop; reseed or reload on reinit/reset
//! 9. Exit 0 on clean shutdown
//!
//! Configuration and persistence failures at startup are fatal and
//! exit non-zero.

mod error;
mod spawner;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use xiuxian_ai::backend::BackendKind;
use xiuxian_ai::{GatewayConfig, LlmGateway};
use xiuxian_core::deciders::{AiSource, ScriptedOracle};
use xiuxian_core::operator::OperatorState;
use xiuxian_core::runner::{EngineRunner, RunOutcome};
use xiuxian_core::{SimConfig, Simulator, World, persist};
use xiuxian_db::{EventLog, SaveStore};
use xiuxian_server::{AppState, ObserverCallback, ServerConfig};
use xiuxian_world::WorldData;

use crate::error::EngineError;

/// The save slot the engine runs in by default.
const DEFAULT_SLOT: &str = "world";

/// Real-time milliseconds between ticks.
const TICK_INTERVAL_MS: u64 = 2_000;

/// Per-request LLM deadline in seconds.
const LLM_REQUEST_TIMEOUT_SECS: u64 = 60;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("xiuxian-engine starting");

    match run().await {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "fatal engine error");
            ExitCode::FAILURE
        }
    }
}

/// The fallible body of `main`.
async fn run() -> Result<(), EngineError> {
    // 2. Configuration.
    let config_path = std::env::var("XIUXIAN_CONFIG")
        .unwrap_or_else(|_| "xiuxian-config.yaml".to_owned());
    let config = if Path::new(&config_path).exists() {
        SimConfig::from_file(Path::new(&config_path))?
    } else {
        warn!(path = %config_path, "config file missing, using defaults");
        SimConfig::default()
    };
    info!(
        init_npc_num = config.game.init_npc_num,
        sect_num = config.game.sect_num,
        llm_mode = %config.llm.mode,
        language = %config.system.language,
        "configuration loaded"
    );

    // 3. Static data.
    let data = Arc::new(WorldData::load(&config.paths.game_configs)?);
    info!(
        sects = data.sects.len(),
        techniques = data.techniques.len(),
        fortunes = data.fortunes.len(),
        "static data loaded"
    );

    // 4. AI source.
    let ai = Arc::new(build_ai_source(&config)?);

    // 5 + 6. World and event log.
    let saves = SaveStore::new(config.paths.saves.clone());
    let mut rng = SmallRng::from_rng(&mut rand::rng());
    let world = match saves.read_world::<persist::SaveFile>(DEFAULT_SLOT) {
        Ok(save) => {
            info!(slot = DEFAULT_SLOT, "restoring existing save");
            persist::restore_world(save, Arc::clone(&data))?
        }
        Err(xiuxian_db::DbError::NoSuchSave(_)) => {
            info!("no save found, seeding a fresh world");
            spawner::spawn_world(&config, Arc::clone(&data), &mut rng)
        }
        Err(err) => return Err(err.into()),
    };
    let event_log = EventLog::open(&saves.events_db_path(DEFAULT_SLOT)?).await?;
    let log_handle = event_log.clone();

    // 7. Server.
    let operator = Arc::new(OperatorState::new());
    let (command_tx, mut command_rx) = mpsc::channel(16);
    let app_state = AppState::new(Arc::clone(&operator), command_tx);
    app_state.set_event_log(log_handle);
    app_state.prime_snapshot(&world);

    let server_config = ServerConfig {
        host: config.system.host.clone(),
        port: config.system.port,
    };
    let server_state = app_state.clone();
    let server_task = tokio::spawn(async move {
        if let Err(err) = xiuxian_server::start_server(&server_config, server_state).await {
            error!(%err, "api server stopped");
        }
    });

    // Ctrl-C triggers the same clean shutdown as the API control.
    let ctrlc_operator = Arc::clone(&operator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrlc_operator.request_shutdown();
        }
    });

    // 8. Engine loop; reseed or reload on reinit/reset.
    let simulator = Simulator::new(world, config.clone(), Arc::clone(&ai), event_log, rng);
    let mut runner = EngineRunner::new(simulator, saves, DEFAULT_SLOT);
    let mut callback = ObserverCallback::new(app_state.clone());
    let tick_interval = Duration::from_millis(TICK_INTERVAL_MS);

    loop {
        let outcome = runner
            .run(&operator, &mut command_rx, &mut callback, tick_interval)
            .await;
        match outcome {
            RunOutcome::Shutdown => break,
            RunOutcome::Reset | RunOutcome::Reinit => {
                info!(?outcome, "rebuilding the world");
                let mut rng = SmallRng::from_rng(&mut rand::rng());
                let world = rebuild_world(outcome, &config, &data, &mut rng)?;
                // A reinitialized world starts its history over: reopen
                // the slot's log and wipe it. A reset keeps the log.
                let saves = SaveStore::new(config.paths.saves.clone());
                let log = EventLog::open(&saves.events_db_path(DEFAULT_SLOT)?).await?;
                if outcome == RunOutcome::Reinit {
                    let _ = log
                        .cleanup(xiuxian_db::event_log::Cleanup {
                            keep_major: false,
                            before_stamp: None,
                        })
                        .await?;
                }
                let _ = runner.sim.swap_world(world);
                let _ = runner.sim.swap_event_log(log.clone());
                app_state.set_event_log(log);
                app_state.prime_snapshot(&runner.sim.world);
                operator.resume();
            }
        }
    }

    server_task.abort();
    Ok(())
}

/// Build the world after a reset (reload the save) or reinit (seed a
/// fresh one).
fn rebuild_world(
    outcome: RunOutcome,
    config: &SimConfig,
    data: &Arc<WorldData>,
    rng: &mut SmallRng,
) -> Result<World, EngineError> {
    if outcome == RunOutcome::Reset {
        let saves = SaveStore::new(config.paths.saves.clone());
        match saves.read_world::<persist::SaveFile>(DEFAULT_SLOT) {
            Ok(save) => return Ok(persist::restore_world(save, Arc::clone(data))?),
            Err(xiuxian_db::DbError::NoSuchSave(_)) => {
                warn!("reset requested but no save exists; seeding fresh");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(spawner::spawn_world(config, Arc::clone(data), rng))
}

/// Build the AI source from configuration.
fn build_ai_source(config: &SimConfig) -> Result<AiSource, EngineError> {
    if config.llm.mode == "scripted" {
        info!("llm mode: scripted oracle (no network)");
        return Ok(AiSource::Scripted(ScriptedOracle::default()));
    }
    let kind = BackendKind::parse(&config.llm.mode)
        .ok_or_else(|| EngineError::LlmMode(config.llm.mode.clone()))?;
    let gateway = LlmGateway::new(
        &GatewayConfig {
            base_url: config.llm.base_url.clone(),
            key: config.llm.key.clone(),
            model_name: config.llm.model_name.clone(),
            fast_model_name: config.llm.fast_model_name.clone(),
            kind,
            max_concurrent_requests: config.ai.max_concurrent_requests as usize,
            request_timeout: Duration::from_secs(LLM_REQUEST_TIMEOUT_SECS),
        },
        &config.paths.templates.to_string_lossy(),
    );
    info!(
        mode = %config.llm.mode,
        model = %config.llm.model_name,
        fast_model = %config.llm.fast_model_name,
        max_concurrent = config.ai.max_concurrent_requests,
        "llm gateway ready"
    );
    Ok(AiSource::Gateway(gateway))
}
