//! Engine configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists or it fails validation.

use reverie_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub heartbeat: HeartbeatConfig,
    /// Idle/CPU/window thresholds for entering and leaving Dream Mode.
    pub thresholds: ThresholdConfig,
    pub dream: DreamConfig,
    pub budget: BudgetConfig,
    pub bus: BusConfig,
    pub maintenance: MaintenanceConfig,
    /// Time bounds on every collaborator call.
    pub timeouts: TimeoutConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Idle seconds at or above which the user is considered away.
    pub enter_idle_secs: f64,
    /// Idle seconds below which a dreaming engine wakes. Must be < enter_idle_secs.
    pub wake_idle_secs: f64,
    /// CPU percent above which dreaming is not allowed.
    pub cpu_ceiling: f64,
    /// Case-insensitive substrings of window titles that block dreaming.
    pub window_blocklist: Vec<String>,
    /// Re-check CPU and blocklist every dreaming tick and wake on violation.
    pub revalidate_while_dreaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DreamConfig {
    /// Minimum seconds between two dream cycles.
    pub cycle_interval_secs: u64,
    /// Upper bound on one task's run.
    pub task_timeout_secs: u64,
    /// Directory the Librarian inspects.
    pub librarian_dir: String,
    /// Topics the Curiosity task wanders through.
    pub curiosity_topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_budget_usd: f64,
    pub price_per_million_tokens: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-subscriber queue bound. Events beyond it are dropped for that subscriber.
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub sensor_ms: u64,
    pub briefing_secs: u64,
    pub persist_secs: u64,
    pub notify_secs: u64,
    /// Bound on each KnowledgeStore episode write made by the engine itself.
    pub knowledge_secs: u64,
    pub plugin_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub local_model: String,
    pub local_url: String,
    pub cloud_model: String,
    pub max_tokens: u32,
}

// ============================================================
// Defaults
// ============================================================

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_ms: 2_000 }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            enter_idle_secs: 300.0,
            wake_idle_secs: 5.0,
            cpu_ceiling: 60.0,
            window_blocklist: vec![
                "Visual Studio Code".into(),
                "VSCode".into(),
                "Xcode".into(),
                "IntelliJ".into(),
                "Steam".into(),
                "Zoom".into(),
            ],
            revalidate_while_dreaming: true,
        }
    }
}

impl Default for DreamConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 10,
            task_timeout_secs: 60,
            librarian_dir: "~/Downloads".into(),
            curiosity_topics: vec![
                "The future of AI agents".into(),
                "Rust performance techniques".into(),
                "Digital consciousness".into(),
                "The user's current projects".into(),
                "Memory systems in software".into(),
            ],
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { daily_budget_usd: 1.0, price_per_million_tokens: 0.35 }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { interval_secs: 3_600, timeout_secs: 30 }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            sensor_ms: 1_500,
            briefing_secs: 10,
            persist_secs: 5,
            notify_secs: 10,
            knowledge_secs: 5,
            plugin_secs: 10,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            local_model: "llama3.2:1b".into(),
            local_url: "http://localhost:11434".into(),
            cloud_model: "gemini-1.5-flash".into(),
            max_tokens: 1_000,
        }
    }
}

// ============================================================
// Hysteresis
// ============================================================

/// Enter/wake idle thresholds. Only constructible with `wake < enter`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hysteresis {
    enter_idle_secs: f64,
    wake_idle_secs: f64,
}

impl Hysteresis {
    pub fn new(enter_idle_secs: f64, wake_idle_secs: f64) -> Result<Self> {
        if !(wake_idle_secs >= 0.0 && wake_idle_secs < enter_idle_secs) {
            return Err(Error::Config(format!(
                "wake threshold ({wake_idle_secs}s) must be >= 0 and strictly below enter threshold ({enter_idle_secs}s)"
            )));
        }
        Ok(Self { enter_idle_secs, wake_idle_secs })
    }

    pub fn enter_idle_secs(&self) -> f64 {
        self.enter_idle_secs
    }

    pub fn wake_idle_secs(&self) -> f64 {
        self.wake_idle_secs
    }
}

impl ThresholdConfig {
    pub fn hysteresis(&self) -> Result<Hysteresis> {
        Hysteresis::new(self.enter_idle_secs, self.wake_idle_secs)
    }

    /// First blocklist entry contained in `window`, if any.
    pub fn blocked_by(&self, window: &str) -> Option<&str> {
        let lower = window.to_lowercase();
        self.window_blocklist
            .iter()
            .find(|entry| !entry.is_empty() && lower.contains(&entry.to_lowercase()))
            .map(|s| s.as_str())
    }
}

// ============================================================
// Loading
// ============================================================

impl EngineConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Rejected {}: {}; using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds.hysteresis()?;
        if !(0.0..=100.0).contains(&self.thresholds.cpu_ceiling) {
            return Err(Error::Config(format!(
                "cpu_ceiling {} outside 0-100",
                self.thresholds.cpu_ceiling
            )));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(Error::Config("heartbeat.interval_ms must be > 0".into()));
        }
        if self.dream.cycle_interval_secs == 0 || self.dream.task_timeout_secs == 0 {
            return Err(Error::Config("dream intervals must be > 0".into()));
        }
        if self.maintenance.interval_secs == 0 {
            return Err(Error::Config("maintenance.interval_secs must be > 0".into()));
        }
        if self.timeouts.knowledge_secs == 0 || self.timeouts.plugin_secs == 0 {
            return Err(Error::Config("knowledge and plugin timeouts must be > 0".into()));
        }
        if self.bus.capacity == 0 {
            return Err(Error::Config("bus.capacity must be > 0".into()));
        }
        if self.budget.daily_budget_usd < 0.0 || self.budget.price_per_million_tokens < 0.0 {
            return Err(Error::Config("budget and price must be non-negative".into()));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }

    pub fn dream_cycle_interval(&self) -> Duration {
        Duration::from_secs(self.dream.cycle_interval_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.dream.task_timeout_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance.interval_secs)
    }

    pub fn maintenance_timeout(&self) -> Duration {
        Duration::from_secs(self.maintenance.timeout_secs)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.sensor_ms)
    }

    pub fn briefing_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.briefing_secs)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.persist_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.notify_secs)
    }

    pub fn knowledge_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.knowledge_secs)
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.plugin_secs)
    }

    pub fn librarian_dir(&self) -> PathBuf {
        expand_tilde(&self.dream.librarian_dir)
    }
}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
