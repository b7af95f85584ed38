//! Persisted powertrain description: topology by name hash + per-node tuning.
//! Runtime state (torques, velocities, gear, shift progress) never lands here.

use serde::{Deserialize, Serialize};

use crate::powertrain::clutch::ClutchConfig;
use crate::powertrain::differential::DifferentialConfig;
use crate::powertrain::transmission::TransmissionConfig;
use crate::powertrain::types::NameHash;
use crate::powertrain::wheel_group::WheelGroupConfig;

/// Vehicle-wide limits and input handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowertrainSettings {
    pub max_brake_torque: f32,      // N·m per wheel
    pub max_steer_angle: f32,       // deg
    pub wake_on_throttle: bool,
    pub wake_throttle_threshold: f32,
    pub swap_input_in_reverse: bool,
}

impl Default for PowertrainSettings {
    fn default() -> Self {
        Self {
            max_brake_torque: 3000.0,
            max_steer_angle: 35.0,
            wake_on_throttle: true,
            wake_throttle_threshold: 0.05,
            swap_input_in_reverse: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKindConfig {
    Clutch(ClutchConfig),
    Differential(DifferentialConfig),
    Transmission(TransmissionConfig),
    /// `wheel` names the wheel simulation to bind when loading.
    Wheel { wheel: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(default)]
    pub inertia: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<NameHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_b: Option<NameHash>,
    pub kind: NodeKindConfig,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, inertia: f32, kind: NodeKindConfig) -> Self {
        Self { name: name.into(), inertia, output: None, output_b: None, kind }
    }

    pub fn hash(&self) -> NameHash {
        NameHash::of(&self.name)
    }

    pub fn with_output(mut self, target: &str) -> Self {
        self.output = Some(NameHash::of(target));
        self
    }

    pub fn with_output_b(mut self, target: &str) -> Self {
        self.output_b = Some(NameHash::of(target));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PowertrainConfig {
    pub settings: PowertrainSettings,
    pub root: Option<NameHash>,
    pub nodes: Vec<NodeConfig>,
    pub wheel_groups: Vec<WheelGroupConfig>,
}

impl PowertrainConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn node(&self, name: &str) -> Option<&NodeConfig> {
        let hash = NameHash::of(name);
        self.nodes.iter().find(|n| n.hash() == hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_is_tagged() {
        let node = NodeConfig::new("rear_diff", 0.1, NodeKindConfig::Differential(DifferentialConfig::open()))
            .with_output("wheel_rl")
            .with_output_b("wheel_rr");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"]["type"], "differential");
        assert_eq!(json["output"], NameHash::of("wheel_rl").0);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let json = r#"{
            "root": 1,
            "nodes": [
                { "name": "clutch", "kind": { "type": "clutch", "slip_torque": 420.0 } },
                { "name": "wheel_fl", "kind": { "type": "wheel", "wheel": "fl" } }
            ]
        }"#;
        let config = PowertrainConfig::from_json(json).unwrap();
        assert_eq!(config.settings, PowertrainSettings::default());
        assert_eq!(config.root, Some(NameHash(1)));
        let NodeKindConfig::Clutch(clutch) = &config.node("clutch").unwrap().kind else {
            panic!("expected clutch");
        };
        assert_eq!(clutch.slip_torque, 420.0);
        assert_eq!(clutch.engagement_rpm, ClutchConfig::default().engagement_rpm);
        assert_eq!(config.node("wheel_fl").unwrap().output, None);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let json = r#"{ "nodes": [ { "name": "x", "kind": { "type": "turbo" } } ] }"#;
        assert!(PowertrainConfig::from_json(json).is_err());
    }
}
