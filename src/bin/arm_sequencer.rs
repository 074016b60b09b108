//! Interactive command loop against the simulated arm.
//!
//! ```bash
//! RUST_LOG=debug ARM_SEQUENCER_CONFIG=arm.json cargo run --bin arm-sequencer
//! ```
//!
//! Commands are read one per line from stdin ("go up", "pick up", "stop", ...).
//! Exits 0 when every step of the session succeeded, 1 otherwise.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use arm_sequencer::config::EngineConfig;
use arm_sequencer::sim::{SimCamera, SimController};
use arm_sequencer::vision::VisionGate;
use arm_sequencer::voice::{IpcNarrator, LogNarrator, Narrator, StdinCommands};
use arm_sequencer::{Arm, Controller, Dispatcher};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let controller = match SimController::open(
        &config.simulator.catalog_path,
        Duration::from_millis(config.simulator.motion_delay_ms),
    ) {
        Ok(controller) => Arc::new(controller),
        Err(err) => {
            error!(%err, "failed to open simulator catalog");
            return ExitCode::FAILURE;
        }
    };
    match controller.actuator_count().await {
        Ok(count) => info!(actuators = count, "connected to simulated arm"),
        Err(err) => {
            error!(%err, "controller did not answer");
            return ExitCode::FAILURE;
        }
    }

    let camera = Arc::new(SimCamera::new(Arc::clone(&controller)));
    let gate = Arc::new(VisionGate::new(camera, config.vision));
    let narrator: Arc<dyn Narrator> = match &config.narrator_ipc {
        Some(name) => Arc::new(IpcNarrator::new(name.clone())),
        None => Arc::new(LogNarrator),
    };
    let arm = Arm::new(controller, config.timing.motion());

    let dispatcher = Dispatcher::new(arm, gate, narrator, &config);
    let mut source = StdinCommands::new(config.timing.listen_timeout());

    match dispatcher.run(&mut source).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(%err, "unrecoverable sequencing error");
            ExitCode::FAILURE
        }
    }
}
