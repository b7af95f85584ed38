use std::sync::Arc;
use futures::{StreamExt, SinkExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use driveline::powertrain::{ControlInput, PowertrainConfig};

use crate::state::SharedGameState;
use crate::physics::PhysicsWorld;

const ADDRESS: &str = "0.0.0.0:9001";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Input(ControlInput),
    Ping,
    Repair,
    Disable,
    Enable,
}

pub async fn start_websocket_server(
    state: Arc<Mutex<SharedGameState>>,
    physics: Arc<Mutex<PhysicsWorld>>,
    layout: Arc<PowertrainConfig>,
) {
    let listener = match TcpListener::bind(ADDRESS).await {
        Ok(l) => l,
        Err(e) => {
            println!("❌ Failed to bind WebSocket port {}: {}", ADDRESS, e);
            return;
        }
    };

    println!("🌐 WebSocket listening on ws://localhost:9001");

    loop {
        let Ok((raw, _)) = listener.accept().await else { continue };
        let state_clone = Arc::clone(&state);
        let physics_clone = Arc::clone(&physics);
        let layout_clone = Arc::clone(&layout);

        tokio::spawn(async move {
            let Ok(ws) = accept_async(raw).await else { return };
            let (mut write, mut read) = ws.split();
            let player_id = Uuid::new_v4().to_string();

            // -------------------------------
            // 1) Outgoing message channel
            // -------------------------------
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            state_clone.lock().await.register_client(&player_id, tx.clone());

            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if write.send(Message::Text(msg)).await.is_err() {
                        break;
                    }
                }
            });

            // -------------------------------
            // 2) Vehicle + powertrain
            // -------------------------------
            let spawned = {
                let mut phys = physics_clone.lock().await;
                phys.spawn_vehicle(&player_id, [0.0, 0.0, 0.0], &layout_clone)
            };
            if let Err(e) = spawned {
                println!("❌ Could not build powertrain for {}: {}", player_id, e);
                state_clone.lock().await.remove_client(&player_id);
                return;
            }

            let online = state_clone.lock().await.client_count();
            println!("🟢 Player connected: {} ({} online)", player_id, online);
            let welcome = serde_json::json!({ "type": "welcome", "player_id": player_id });
            let _ = tx.send(welcome.to_string());

            // -------------------------------
            // 3) Receive loop
            // -------------------------------
            while let Some(msg) = read.next().await {
                let Ok(msg) = msg else { break };
                let Ok(text) = msg.to_text() else { continue };
                let Ok(parsed) = serde_json::from_str::<ClientMessage>(text) else { continue };

                if let ClientMessage::Ping = parsed {
                    let _ = tx.send(r#"{"type":"pong"}"#.into());
                    continue;
                }

                let mut phys = physics_clone.lock().await;
                let Some(vehicle) = phys.vehicle_mut(&player_id) else { break };
                match parsed {
                    ClientMessage::Input(input) => vehicle.input.merge(input),
                    ClientMessage::Repair => vehicle.powertrain.repair(),
                    ClientMessage::Disable => vehicle.powertrain.disable(),
                    ClientMessage::Enable => vehicle.powertrain.enable(),
                    ClientMessage::Ping => {}
                }
            }

            println!("🔴 Player disconnected: {}", player_id);
            state_clone.lock().await.remove_client(&player_id);
            physics_clone.lock().await.remove_vehicle(&player_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_message_fills_defaults() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"input","throttle":0.5,"shift_into":2}"#).unwrap();
        let ClientMessage::Input(input) = msg else { panic!("expected input") };
        assert_eq!(input.throttle, 0.5);
        assert_eq!(input.brake, 0.0);
        assert_eq!(input.shift_into, Some(2));
    }

    #[test]
    fn control_messages_parse() {
        assert!(matches!(serde_json::from_str::<ClientMessage>(r#"{"type":"repair"}"#), Ok(ClientMessage::Repair)));
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"teleport"}"#).is_err());
    }
}
