use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

use driveline::powertrain::{PowerSource, PowertrainSnapshot, rad_to_rpm};

use crate::physics::PhysicsWorld;

#[derive(Serialize)]
pub struct VehicleSnapshot {
    pub id: String,
    pub position: [f32; 3],
    pub rotation: [f32; 4], // quaternion (i, j, k, w)
    pub speed: f32,         // m/s
    pub source_rpm: f32,
    pub powertrain: PowertrainSnapshot,
}

#[derive(Serialize)]
pub struct Snapshot {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub tick: u64,
    pub vehicles: Vec<VehicleSnapshot>,
}

pub struct SharedGameState {
    pub tick: u64,
    clients: HashMap<String, UnboundedSender<String>>, // player id → outgoing queue
}

impl SharedGameState {
    pub fn new() -> Self {
        Self {
            tick: 0,
            clients: HashMap::new(),
        }
    }

    pub fn register_client(&mut self, player_id: &str, tx: UnboundedSender<String>) {
        self.clients.insert(player_id.to_string(), tx);
    }

    pub fn remove_client(&mut self, player_id: &str) {
        self.clients.remove(player_id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Build and send a snapshot of every vehicle to all clients.
    pub fn broadcast_snapshot(&self, physics: &PhysicsWorld) {
        if self.clients.is_empty() {
            return;
        }

        let mut vehicles = Vec::with_capacity(physics.vehicles.len());
        for vehicle in physics.vehicles.values() {
            let Some((position, rotation)) = physics.pose(vehicle) else { continue };
            vehicles.push(VehicleSnapshot {
                id: vehicle.id.clone(),
                position,
                rotation,
                speed: vehicle.speed,
                source_rpm: rad_to_rpm(vehicle.source.state().angular_velocity),
                powertrain: vehicle.powertrain.snapshot(),
            });
        }

        let json = match serde_json::to_string(&Snapshot { kind: "snapshot", tick: self.tick, vehicles }) {
            Ok(json) => json,
            Err(e) => {
                println!("⚠️ Snapshot serialization failed: {}", e);
                return;
            }
        };

        for tx in self.clients.values() {
            let _ = tx.send(json.clone());
        }
    }
}
