mod physics;
mod net;
mod state;

use crate::physics::PhysicsWorld;
use crate::net::start_websocket_server;
use crate::state::SharedGameState;

use driveline::powertrain::autoconfig::sedan_mounts;
use driveline::powertrain::{DriveLayout, PowertrainConfig, auto_layout};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};

/// Powertrain JSON from the first CLI argument, else the default RWD layout.
fn load_layout() -> PowertrainConfig {
    let fallback = || auto_layout(&sedan_mounts(), DriveLayout::RearWheelDrive);
    let Some(path) = std::env::args().nth(1) else {
        println!("🔧 No powertrain file given, using the default rear-wheel-drive layout");
        return fallback();
    };

    let parsed = std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|json| PowertrainConfig::from_json(&json).map_err(|e| e.to_string()));
    match parsed {
        Ok(config) => {
            println!("🔧 Loaded powertrain from {} ({} nodes)", path, config.nodes.len());
            config
        }
        Err(e) => {
            println!("⚠️ Could not load {}: {}. Using the default layout", path, e);
            fallback()
        }
    }
}

#[tokio::main]
async fn main() {
    println!("🚀 Starting Driveline Server...");

    let layout = Arc::new(load_layout());
    let state = Arc::new(Mutex::new(SharedGameState::new()));
    let physics = Arc::new(Mutex::new(PhysicsWorld::new()));

    // Start WebSocket server
    tokio::spawn(start_websocket_server(
        Arc::clone(&state),
        Arc::clone(&physics),
        Arc::clone(&layout),
    ));

    // Fixed timestep: ~60 Hz
    let mut ticker = interval(Duration::from_millis(16));

    loop {
        ticker.tick().await;

        // Lock order everywhere: state, then physics.
        let mut game = state.lock().await;
        let mut phys = physics.lock().await;

        phys.step(1.0 / 60.0);

        game.tick += 1;
        game.broadcast_snapshot(&phys);
    }
}
