//! Configuration persistence for the looper.
//!
//! Saves and loads looper configuration to/from YAML files. Channels are
//! stored 1-indexed for human readability.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cell::DEFAULT_POOL_CAPACITY;
use crate::control::ControlMap;

/// Complete looper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LooperConfig {
    /// MIDI input device name (substring match)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    /// MIDI output device name (substring match)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
    /// Channel the control surface sends on (1-16)
    #[serde(default = "default_control_channel")]
    pub control_channel: u8,
    /// Channel of the keep/arm pads (1-16)
    #[serde(default = "default_pad_channel")]
    pub pad_channel: u8,
    /// Treat the sustain pedal on performance channels as the keep control
    #[serde(default = "default_sustain_keeps")]
    pub sustain_pedal_keeps: bool,
    /// Cell arena size
    #[serde(default = "default_cell_capacity")]
    pub cell_capacity: usize,
}

fn default_control_channel() -> u8 {
    16
}

fn default_pad_channel() -> u8 {
    2
}

fn default_sustain_keeps() -> bool {
    true
}

fn default_cell_capacity() -> usize {
    DEFAULT_POOL_CAPACITY
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            control_channel: default_control_channel(),
            pad_channel: default_pad_channel(),
            sustain_pedal_keeps: default_sustain_keeps(),
            cell_capacity: default_cell_capacity(),
        }
    }
}

impl LooperConfig {
    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        let project_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        project_dir.join("overdub.yaml")
    }

    /// Load configuration from a YAML file. A missing file is not an
    /// error; it yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            fs::read_to_string(path).map_err(|e| format!("Failed to read config file: {}", e))?;

        serde_yaml::from_str(&content).map_err(|e| format!("Failed to parse config YAML: {}", e))
    }

    /// Save configuration to a YAML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(path, content).map_err(|e| format!("Failed to write config file: {}", e))
    }

    /// Build the control surface map this configuration describes.
    pub fn control_map(&self) -> ControlMap {
        let mut map = ControlMap::default();
        map.control_channel = self.control_channel.saturating_sub(1).min(15);
        map.pad_channel = self.pad_channel.saturating_sub(1).min(15);
        map.sustain_keeps = self.sustain_pedal_keeps;
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: LooperConfig = serde_yaml::from_str("control_channel: 12\n").unwrap();
        assert_eq!(config.control_channel, 12);
        assert_eq!(config.pad_channel, 2);
        assert_eq!(config.cell_capacity, DEFAULT_POOL_CAPACITY);
        assert!(config.sustain_pedal_keeps);
        assert_eq!(config.input_device, None);
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = LooperConfig::default();
        config.output_device = Some("Synth".to_string());
        config.cell_capacity = 256;
        let yaml = serde_yaml::to_string(&config).unwrap();
        let loaded: LooperConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(loaded.output_device.as_deref(), Some("Synth"));
        assert_eq!(loaded.cell_capacity, 256);
    }

    #[test]
    fn test_control_map_channels_are_zero_indexed() {
        let config = LooperConfig::default();
        let map = config.control_map();
        assert_eq!(map.control_channel, 15);
        assert_eq!(map.pad_channel, 1);
        assert!(map.sustain_keeps);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let config = LooperConfig::load("/nonexistent/overdub.yaml").unwrap();
        assert_eq!(config.control_channel, 16);
    }
}
