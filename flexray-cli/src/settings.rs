//! Scenario settings

use std::io;
use std::path::{Path, PathBuf};

use flexray_protocol::{BusConfig, Channel, FrameFlags, Message};
use flexray_sim::{PayloadConfig, SignalConfig, SlotConfig, VirtualNodeConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading or saving a settings file
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not determine settings path")]
    NoPath,

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A simulation scenario: bus parameters, nodes and one-shot messages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Bus configuration
    #[serde(default)]
    pub bus: BusConfig,
    /// Number of cycles to advance per run
    #[serde(default = "default_cycles")]
    pub cycles: u32,
    /// Virtual nodes attached before the run
    #[serde(default)]
    pub nodes: Vec<VirtualNodeConfig>,
    /// Messages sent once, right after start
    #[serde(default)]
    pub messages: Vec<Message>,
}

fn default_cycles() -> u32 {
    10
}

fn fixed_slot(slot_id: u16, base_cycle: u8, repetition: u8, payload: Vec<u8>) -> SlotConfig {
    SlotConfig {
        slot_id,
        base_cycle,
        repetition,
        flags: FrameFlags::empty(),
        payload: PayloadConfig::Fixed(payload),
    }
}

fn signal(name: &str, offset: usize, format: &str, value: i128) -> SignalConfig {
    SignalConfig {
        name: name.to_string(),
        offset,
        format: format.to_string(),
        value,
    }
}

impl Default for Settings {
    /// Three ECUs sharing slots 10-32 on both channels
    fn default() -> Self {
        let ecu1 = VirtualNodeConfig {
            name: "ECU1".to_string(),
            channel: Channel::Both,
            slots: vec![
                SlotConfig {
                    slot_id: 10,
                    base_cycle: 0,
                    repetition: 1,
                    flags: FrameFlags::empty().with_sync(true).with_startup(true),
                    payload: PayloadConfig::Signals {
                        length: 8,
                        signals: vec![
                            signal("speed", 0, ">H", 60),
                            signal("acceleration", 2, ">h", 2),
                            signal("alive", 7, "B", 0),
                        ],
                        counter: Some("alive".to_string()),
                    },
                },
                fixed_slot(11, 1, 2, vec![0x02, 0x00, 0x00, 0x00]),
                fixed_slot(12, 2, 4, vec![0x00, 0x00, 0x00, 0xFF]),
            ],
        };
        let ecu2 = VirtualNodeConfig {
            name: "ECU2".to_string(),
            channel: Channel::Both,
            slots: vec![
                SlotConfig {
                    slot_id: 20,
                    base_cycle: 0,
                    repetition: 1,
                    flags: FrameFlags::empty(),
                    payload: PayloadConfig::Signals {
                        length: 4,
                        signals: vec![signal("steering", 0, ">h", -10)],
                        counter: None,
                    },
                },
                fixed_slot(21, 1, 2, vec![0x00, 0x60, 0x00, 0x00]),
                SlotConfig {
                    slot_id: 22,
                    base_cycle: 0,
                    repetition: 8,
                    flags: FrameFlags::empty(),
                    payload: PayloadConfig::AliveCounter { length: 4 },
                },
            ],
        };
        let ecu3 = VirtualNodeConfig {
            name: "ECU3".to_string(),
            channel: Channel::Both,
            slots: vec![
                fixed_slot(30, 0, 1, vec![0x00, 0x00, 0x00, 0x01]),
                fixed_slot(31, 2, 4, vec![0x00, 0x00, 0x10, 0x00]),
                fixed_slot(32, 5, 8, vec![0x12, 0x34, 0x56, 0x78]),
            ],
        };

        Self {
            bus: BusConfig::default(),
            cycles: default_cycles(),
            nodes: vec![ecu1, ecu2, ecu3],
            messages: Vec::new(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for flexsim
    /// Uses $XDG_CONFIG_HOME/flexsim when absolute, falls back to ~/.config/flexsim
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("flexsim"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("flexsim"))
    }

    /// Default settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load from the default path; missing or unreadable files give defaults
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(&path).unwrap_or_else(|e| {
            tracing::warn!("Ignoring settings: {}", e);
            Self::default()
        })
    }

    /// Load from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Save to the default path
    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        let path = Self::settings_path().ok_or(SettingsError::NoPath)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let write_err = |source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(write_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexray_sim::VirtualNode;

    #[test]
    fn test_default_scenario_builds() {
        let settings = Settings::default();
        assert!(settings.bus.is_valid());
        assert_eq!(settings.nodes.len(), 3);
        for node in settings.nodes {
            VirtualNode::from_config(node).unwrap();
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings = Settings::from_json(r#"{"bus": {"static_slots": 32}, "cycles": 5}"#).unwrap();
        assert_eq!(settings.bus.static_slots, 32);
        assert_eq!(settings.bus.dynamic_slots, BusConfig::default().dynamic_slots);
        assert_eq!(settings.cycles, 5);
        assert!(settings.nodes.is_empty());
    }

    #[test]
    fn test_node_json() {
        let json = r#"{
            "nodes": [{
                "name": "gateway",
                "channel": "B",
                "slots": [
                    {"slot_id": 7, "repetition": 4, "payload": {"fixed": [1, 2, 3]}},
                    {"slot_id": 8, "payload": {"alive_counter": {"length": 2}}}
                ]
            }],
            "messages": [
                {"slot_id": 3, "cycle_count": 0, "channel": "A", "payload": [255]}
            ]
        }"#;
        let settings = Settings::from_json(json).unwrap();
        let node = &settings.nodes[0];
        assert_eq!(node.channel, Channel::B);
        assert_eq!(node.slots[0].repetition, 4);
        assert_eq!(node.slots[1].repetition, 1);
        assert_eq!(node.slots[1].payload, PayloadConfig::AliveCounter { length: 2 });
        assert_eq!(settings.messages[0].payload, vec![255]);
        assert_eq!(settings.messages[0].timestamp_us, None);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("flexsim-settings-{}", std::process::id()));
        let path = dir.join("nested").join("settings.json");

        let settings = Settings {
            cycles: 3,
            ..Default::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_errors_name_the_file() {
        let path = std::env::temp_dir().join("flexsim-does-not-exist.json");
        let err = Settings::load_from(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
        assert!(err.to_string().contains("flexsim-does-not-exist.json"));
    }
}
