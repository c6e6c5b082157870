use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::color::Rgb;
use crate::grid::GridLayout;
use crate::protocol::{NUMBER_OF_LEDS, PORT_NUMBER, READ_TIMEOUT};

/// Unlit LED color of the simulator (169/255 gray)
const LED_BACKGROUND: Rgb = Rgb::new(169, 169, 169);

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub grid: GridConfig,
    pub effects: EffectConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Idle read timeout in milliseconds; negative disables it
    pub read_timeout_ms: i64,
    /// Log throughput statistics at this interval when set
    pub stats_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GridConfig {
    pub led_count: usize,
    pub stripes: usize,
    pub background: Rgb,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EffectConfig {
    pub fade_steps: u32,
    pub fade_step_ms: u64,
    pub demo_step_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: PORT_NUMBER,
            read_timeout_ms: READ_TIMEOUT,
            stats_interval_secs: None,
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            led_count: NUMBER_OF_LEDS,
            stripes: NUMBER_OF_LEDS,
            background: LED_BACKGROUND,
        }
    }
}

impl Default for EffectConfig {
    fn default() -> Self {
        EffectConfig {
            fade_steps: 32,
            fade_step_ms: 25,
            demo_step_ms: 100,
        }
    }
}

impl Config {
    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.grid.layout()?;
        if self.effects.fade_steps == 0 {
            anyhow::bail!("effects.fade_steps must be at least 1");
        }
        if self.effects.demo_step_ms == 0 {
            anyhow::bail!("effects.demo_step_ms must be at least 1");
        }
        Ok(())
    }
}

impl ServerConfig {
    /// `None` when reads never time out
    pub fn read_timeout(&self) -> Option<Duration> {
        u64::try_from(self.read_timeout_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        self.stats_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl GridConfig {
    pub fn layout(&self) -> Result<GridLayout> {
        GridLayout::new(self.led_count, self.stripes).context("Invalid grid configuration")
    }
}

impl EffectConfig {
    pub fn fade_step(&self) -> Duration {
        Duration::from_millis(self.fade_step_ms)
    }

    pub fn demo_step(&self) -> Duration {
        Duration::from_millis(self.demo_step_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server.port, 55555);
        assert_eq!(config.server.read_timeout(), None);
        assert_eq!(config.grid.led_count, 32);
        assert_eq!(config.grid.background, Rgb::new(169, 169, 169));
        assert_eq!(config.effects.fade_steps, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_override() {
        let config: Config = serde_json::from_str(
            r#"{
                "server": { "port": 6000, "read_timeout_ms": 1500 },
                "grid": { "stripes": 8, "background": [0, 0, 0] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.read_timeout(), Some(Duration::from_millis(1500)));
        let layout = config.grid.layout().unwrap();
        assert_eq!((layout.stripes(), layout.rows()), (8, 4));
        assert_eq!(config.grid.background, Rgb::BLACK);
    }

    #[test]
    fn test_invalid_layout_rejected() {
        let mut config = Config::default();
        config.grid.stripes = 5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.effects.fade_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_reports_path() {
        let err = Config::from_file("/nonexistent/led_simulator.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/led_simulator.json"));
    }
}
