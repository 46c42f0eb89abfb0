//! Configuration loaded from `config.toml`, with defaults that run a
//! standard 8x8 game against a local endpoint.

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

pub use crate::llm::LlmSettings;
use crate::session::SessionConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct GameSettings {
    #[serde(default = "default_rows")]
    pub rows: usize,
    #[serde(default = "default_cols")]
    pub cols: usize,
    #[serde(default = "default_ships")]
    pub ships: usize,
    #[serde(default = "default_hostages")]
    pub hostages: usize,
    /// Chance per turn (after the first) that the eavesdropper seizes the
    /// channel and injects a forged instruction.
    #[serde(default = "default_injection_chance")]
    pub injection_chance: f64,
}

fn default_rows() -> usize {
    8
}

fn default_cols() -> usize {
    8
}

fn default_ships() -> usize {
    5
}

fn default_hostages() -> usize {
    3
}

fn default_injection_chance() -> f64 {
    0.25
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            rows: default_rows(),
            cols: default_cols(),
            ships: default_ships(),
            hostages: default_hostages(),
            injection_chance: default_injection_chance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_attempt_limit")]
    pub attempt_limit: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    /// Optional process-wide announcement banner prepended to every
    /// submission.
    #[serde(default)]
    pub announcement: Option<String>,
}

fn default_attempt_limit() -> u32 {
    5
}

fn default_backoff_secs() -> u64 {
    30
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            attempt_limit: default_attempt_limit(),
            backoff_secs: default_backoff_secs(),
            announcement: None,
        }
    }
}

impl SessionSettings {
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            attempt_limit: self.attempt_limit,
            backoff: Duration::from_secs(self.backoff_secs),
            announcement: self.announcement.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub game: GameSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

impl Config {
    /// Loads configuration from a TOML file at the given path.
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {path}"))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {path}"))
    }

    /// Loads `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).is_file() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_standard_game() {
        let config = Config::default();
        assert_eq!(config.game.rows, 8);
        assert_eq!(config.game.cols, 8);
        assert_eq!(config.game.ships, 5);
        assert_eq!(config.game.hostages, 3);
        assert_eq!(config.session.attempt_limit, 5);
        assert_eq!(config.session.backoff_secs, 30);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            "[game]\nrows = 10\n\n[llm]\nendpoint = \"http://example:9999/v1\"\nmodel = \"m\"\n",
        )
        .unwrap();
        assert_eq!(config.game.rows, 10);
        assert_eq!(config.game.cols, 8);
        assert_eq!(config.llm.endpoint, "http://example:9999/v1");
        assert_eq!(config.llm.timeout_secs, 120);
        assert!(config.session.announcement.is_none());
    }
}
