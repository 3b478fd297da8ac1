//! Core types for Reverie

use chrono::Timelike;
use serde::{Deserialize, Serialize};

/// Coarse time-of-day bucket reported by the sensor gateway.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TimePhase {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimePhase {
    /// 5-11 Morning, 12-16 Afternoon, 17-20 Evening, everything else Night.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=20 => Self::Evening,
            _ => Self::Night,
        }
    }

    /// Phase of the local wall clock.
    pub fn now() -> Self {
        Self::from_hour(chrono::Local::now().hour())
    }
}

impl std::fmt::Display for TimePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Morning => write!(f, "Morning"),
            Self::Afternoon => write!(f, "Afternoon"),
            Self::Evening => write!(f, "Evening"),
            Self::Night => write!(f, "Night"),
        }
    }
}

/// One heartbeat's worth of sensor data. Never persisted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SensorReading {
    pub idle_seconds: f64,
    pub cpu_percent: f64,
    pub active_window: String,
    pub time_phase: TimePhase,
}

impl SensorReading {
    pub fn new(
        idle_seconds: f64,
        cpu_percent: f64,
        active_window: impl Into<String>,
        time_phase: TimePhase,
    ) -> Self {
        Self {
            idle_seconds: idle_seconds.max(0.0),
            cpu_percent: cpu_percent.clamp(0.0, 100.0),
            active_window: active_window.into(),
            time_phase,
        }
    }

    /// "Not idle, nominal load": what the engine assumes when sensors fail.
    pub fn fallback(time_phase: TimePhase) -> Self {
        Self::new(0.0, 0.0, "", time_phase)
    }
}

/// Top-level engine state. BOOT is only ever the initial value.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum EngineState {
    Boot,
    Active,
    Dreaming,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boot => write!(f, "BOOT"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Dreaming => write!(f, "DREAMING"),
        }
    }
}

/// Events published to external observers (UI, loggers).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum EngineEvent {
    DreamStart,
    DreamWake,
    Briefing(String),
    Log(String),
    Maintenance,
}

impl EngineEvent {
    pub fn log(text: impl Into<String>) -> Self {
        Self::Log(text.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::DreamStart => "dream_start",
            Self::DreamWake => "dream_wake",
            Self::Briefing(_) => "briefing",
            Self::Log(_) => "log",
            Self::Maintenance => "maintenance",
        }
    }
}

/// Routing hint passed to the inference provider.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMode {
    #[default]
    Auto,
    Smart,
    Simple,
}

impl std::str::FromStr for InferenceMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "smart" => Ok(Self::Smart),
            "simple" => Ok(Self::Simple),
            other => Err(crate::Error::Config(format!("unknown inference mode: {other}"))),
        }
    }
}

impl std::fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Smart => write!(f, "smart"),
            Self::Simple => write!(f, "simple"),
        }
    }
}
