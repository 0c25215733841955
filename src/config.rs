//! Configuration for Knobs GW
//!
//! Loads the device settings and the knobs to bind from a YAML file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::knob::{KnobState, OperatingMode, TagColor};
use crate::transport::PortMatch;
use crate::twister::{TwisterTiming, CHANNELS, IDENTIFIER};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub knobs: Vec<KnobConfig>,
}

/// Controller device settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// MIDI port name of the device
    #[serde(default = "default_device_name")]
    pub name: String,
    #[serde(default)]
    pub port_match: PortMatch,
    /// Threads running device reactions
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_click_window_ms")]
    pub click_window_ms: u64,
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,
    /// Blank every encoder when the controller is registered
    #[serde(default = "default_true")]
    pub reset_on_start: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            port_match: PortMatch::default(),
            workers: default_workers(),
            click_window_ms: default_click_window_ms(),
            watchdog_timeout_ms: default_watchdog_timeout_ms(),
            reset_on_start: true,
        }
    }
}

impl DeviceConfig {
    pub fn timing(&self) -> TwisterTiming {
        TwisterTiming {
            click_window: Duration::from_millis(self.click_window_ms),
            watchdog_timeout: Duration::from_millis(self.watchdog_timeout_ms),
        }
    }
}

/// One knob bound to the device
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KnobConfig {
    pub name: String,
    /// Encoder slot, 0..63
    pub channel: u8,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
    #[serde(default)]
    pub value: f64,
    /// Defaults to `value`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
    #[serde(default = "default_coarse_increment")]
    pub coarse_increment: f64,
    #[serde(default = "default_fine_increment")]
    pub fine_increment: f64,
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<TagColor>,
    #[serde(default)]
    pub disabled: bool,
}

impl KnobConfig {
    /// Initial knob state
    pub fn state(&self) -> KnobState {
        KnobState {
            channel: self.channel,
            current_value: self.value,
            target_value: self.target.unwrap_or(self.value),
            min_value: self.min,
            max_value: self.max,
            coarse_increment: self.coarse_increment,
            fine_increment: self.fine_increment,
            disabled: self.disabled,
            fine_resolution: false,
            operating_mode: self.mode,
            tag_color: self.color.unwrap_or_default(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("knob name cannot be empty");
        }
        if self.channel >= CHANNELS {
            anyhow::bail!("channel {} out of range (0-{})", self.channel, CHANNELS - 1);
        }
        if !(self.min < self.max) {
            anyhow::bail!("min ({}) must be less than max ({})", self.min, self.max);
        }
        if self.value < self.min || self.value > self.max {
            anyhow::bail!(
                "value {} outside range [{}, {}]",
                self.value,
                self.min,
                self.max
            );
        }
        if !(self.coarse_increment > 0.0) || !(self.fine_increment > 0.0) {
            anyhow::bail!("increments must be positive");
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.device.name.is_empty() {
            anyhow::bail!("device name cannot be empty");
        }
        if self.device.workers == 0 {
            anyhow::bail!("device workers must be at least 1");
        }

        let mut names = HashSet::new();
        for knob in &self.knobs {
            knob.validate()
                .with_context(|| format!("Invalid knob '{}'", knob.name))?;
            if !names.insert(knob.name.as_str()) {
                anyhow::bail!("Duplicate knob name '{}'", knob.name);
            }
        }

        Ok(())
    }
}

fn default_device_name() -> String { IDENTIFIER.to_string() }
fn default_workers() -> usize { crate::controller::DEFAULT_WORKERS }
fn default_click_window_ms() -> u64 { 300 }
fn default_watchdog_timeout_ms() -> u64 { 5000 }
fn default_true() -> bool { true }
fn default_max() -> f64 { 100.0 }
fn default_coarse_increment() -> f64 { 1.0 }
fn default_fine_increment() -> f64 { 0.05 }
