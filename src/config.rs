//! Configuration management for voice-inbox-rs.
//!
//! Loads config from YAML files in standard locations. Out-of-range values
//! are clamped with a warning rather than aborting startup: a bad config
//! must never keep the service from speaking.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const RATE_RANGE: (i64, i64) = (100, 250);
pub const INTERVAL_RANGE: (u64, u64) = (5, 300);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Speaking rate in words per minute.
    pub rate: i64,
    /// Output volume, 0.0 to 1.0.
    pub volume: f32,
    /// Preferred voice id; the catalog's first voice when unset.
    pub voice: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            rate: 180,
            volume: 0.9,
            voice: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoReadConfig {
    /// Seconds between backlog polls.
    pub interval_secs: u64,
    /// Pause between consecutive spoken records, so they stay distinguishable.
    pub pause_secs: u64,
}

impl Default for AutoReadConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            pause_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the newline-delimited notification backlog.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("notification_queue.txt"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Base URL of the HTTP synthesis endpoint. Empty = backend unconfigured.
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Synthesizer binary driven as a subprocess.
    pub binary: String,
    /// Bound on non-utterance calls like voice discovery.
    pub timeout_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            binary: "espeak-ng".into(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub speech: SpeechConfig,
    pub auto_read: AutoReadConfig,
    pub store: StoreConfig,
    pub cloud: CloudConfig,
    pub local: LocalConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./voice-inbox.yaml
    /// 2. ~/.config/voice-inbox/config.yaml
    /// 3. /etc/voice-inbox/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir()
                    .ok()
                    .map(|d| d.join("voice-inbox.yaml")),
                dirs::home_dir().map(|h| h.join(".config/voice-inbox/config.yaml")),
                Some(PathBuf::from("/etc/voice-inbox/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default().clamped();
        };

        let config = match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to parse {}: {e}, using defaults",
                        config_path.display()
                    );
                    Self::default()
                }
            },
            Err(e) => {
                warn!(
                    "Failed to read {}: {e}, using defaults",
                    config_path.display()
                );
                Self::default()
            }
        };

        config.clamped()
    }

    /// Force every tunable back into its documented range.
    pub fn clamped(mut self) -> Self {
        let (lo, hi) = RATE_RANGE;
        if self.speech.rate < lo || self.speech.rate > hi {
            warn!("rate {} outside [{lo},{hi}], clamping", self.speech.rate);
            self.speech.rate = self.speech.rate.clamp(lo, hi);
        }

        if !(0.0..=1.0).contains(&self.speech.volume) {
            warn!("volume {} outside [0.0,1.0], clamping", self.speech.volume);
            self.speech.volume = self.speech.volume.clamp(0.0, 1.0);
        }

        let (lo, hi) = INTERVAL_RANGE;
        if self.auto_read.interval_secs < lo || self.auto_read.interval_secs > hi {
            warn!(
                "auto_read interval {}s outside [{lo},{hi}], clamping",
                self.auto_read.interval_secs
            );
            self.auto_read.interval_secs = self.auto_read.interval_secs.clamp(lo, hi);
        }

        self
    }
}
