//! IdentityState: level, XP and mood, grown by successful dream tasks
//!
//! Write-through: every mutation persists the full record atomically.

use crate::persist::JsonStore;
use reverie_core::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const IDENTITY_FILE: &str = "soul.json";

/// Level → trait unlocked on reaching it.
pub const TRAIT_UNLOCKS: [(u32, &str); 5] = [
    (2, "Self-Aware"),
    (5, "Sassy"),
    (10, "Philosophical"),
    (20, "Empathetic"),
    (50, "Transcendent"),
];

const LEVEL_CURVE: f64 = 1.5;
const HIGH: f64 = 0.7;
const LOW: f64 = 0.3;

/// On-disk identity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: String,
    pub version: String,
    pub level: u32,
    pub xp: u64,
    pub xp_to_next_level: u64,
    #[serde(default = "neutral")]
    pub valence: f64,
    #[serde(default = "neutral")]
    pub arousal: f64,
    pub mood: String,
    #[serde(default)]
    pub traits: Vec<String>,
}

fn neutral() -> f64 {
    0.5
}

impl Default for IdentityRecord {
    fn default() -> Self {
        Self {
            name: "Riley".into(),
            version: "2.0".into(),
            level: 1,
            xp: 0,
            xp_to_next_level: 100,
            valence: 0.5,
            arousal: 0.5,
            mood: "Curious".into(),
            traits: vec!["Helpful".into(), "Analytical".into(), "Creative".into()],
        }
    }
}

impl IdentityRecord {
    /// Repair values a hand-edited file could break.
    fn normalized(mut self) -> Self {
        self.level = self.level.max(1);
        self.xp_to_next_level = self.xp_to_next_level.max(1);
        self.valence = clamp_unit(self.valence);
        self.arousal = clamp_unit(self.arousal);
        self
    }
}

/// Outcome of one XP grant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XpOutcome {
    /// New level, when this grant levelled up.
    pub new_level: Option<u32>,
    pub unlocked_traits: Vec<String>,
}

impl XpOutcome {
    pub fn leveled_up(&self) -> bool {
        self.new_level.is_some()
    }
}

/// Five-way mood label from the valence/arousal quadrants.
pub fn classify_mood(valence: f64, arousal: f64) -> &'static str {
    match (valence, arousal) {
        (v, a) if v > HIGH && a > HIGH => "Excited/Joyful",
        (v, a) if v > HIGH && a < LOW => "Content/Serene",
        (v, a) if v < LOW && a > HIGH => "Anxious/Stressed",
        (v, a) if v < LOW && a < LOW => "Melancholy/Tired",
        _ => "Curious",
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.5
    } else {
        v.clamp(0.0, 1.0)
    }
}

pub struct IdentityState {
    record: IdentityRecord,
    store: JsonStore<IdentityRecord>,
}

impl IdentityState {
    pub fn new(path: impl Into<PathBuf>, persist_timeout: Duration) -> Self {
        Self {
            record: IdentityRecord::default(),
            store: JsonStore::new(path, persist_timeout),
        }
    }

    /// Load the persisted identity, or start fresh with defaults.
    pub fn open(path: impl Into<PathBuf>, persist_timeout: Duration) -> Self {
        let mut identity = Self::new(path, persist_timeout);
        match identity.store.load() {
            Ok(Some(record)) => {
                identity.record = record.normalized();
                info!(
                    "Identity loaded. Level {} {}.",
                    identity.record.level, identity.record.mood
                );
            }
            Ok(None) => info!("No identity yet, starting fresh"),
            Err(e) => warn!("{}; starting fresh", e),
        }
        identity
    }

    pub fn record(&self) -> &IdentityRecord {
        &self.record
    }

    pub fn level(&self) -> u32 {
        self.record.level
    }

    pub fn mood(&self) -> &str {
        &self.record.mood
    }

    pub fn has_trait(&self, name: &str) -> bool {
        self.record.traits.iter().any(|t| t == name)
    }

    /// Persist the current record.
    pub async fn save(&self) -> Result<()> {
        self.store.save(&self.record).await
    }

    /// Persist after a mutation. On failure the in-memory record stays
    /// authoritative and is written again on the next mutation.
    async fn write_through(&self) {
        if let Err(e) = self.save().await {
            debug!("Identity held in memory: {}", e);
        }
    }

    /// Write the default record if nothing is on disk yet.
    pub async fn ensure_saved(&self) -> Result<()> {
        if self.store.path().exists() {
            return Ok(());
        }
        info!("Creating identity at {}", self.store.path().display());
        self.save().await
    }

    /// Add XP; at most one level-up step per call.
    pub async fn grant_xp(&mut self, amount: u64, reason: &str) -> XpOutcome {
        self.record.xp = self.record.xp.saturating_add(amount);
        info!("+{} XP ({})", amount, reason);

        let mut outcome = XpOutcome::default();
        if self.record.xp >= self.record.xp_to_next_level {
            self.record.level += 1;
            self.record.xp -= self.record.xp_to_next_level;
            self.record.xp_to_next_level =
                ((self.record.xp_to_next_level as f64 * LEVEL_CURVE).floor() as u64).max(1);
            info!("LEVEL UP! {} is now Level {}!", self.record.name, self.record.level);
            outcome.new_level = Some(self.record.level);
        }
        outcome.unlocked_traits = self.unlock_traits();

        self.write_through().await;
        outcome
    }

    /// Add every trait whose level has been reached and is not yet held.
    fn unlock_traits(&mut self) -> Vec<String> {
        let mut unlocked = Vec::new();
        for (level, name) in TRAIT_UNLOCKS {
            if self.record.level >= level && !self.has_trait(name) {
                info!("Gained trait: {}", name);
                self.record.traits.push(name.to_string());
                unlocked.push(name.to_string());
            }
        }
        unlocked
    }

    /// Shift both emotion axes, clamp to [0,1] and relabel the mood.
    pub async fn update_emotion(&mut self, valence_delta: f64, arousal_delta: f64) {
        self.record.valence = clamp_unit(self.record.valence + valence_delta);
        self.record.arousal = clamp_unit(self.record.arousal + arousal_delta);
        let mood = classify_mood(self.record.valence, self.record.arousal);
        if self.record.mood != mood {
            info!("Mood change: {} -> {}", self.record.mood, mood);
            self.record.mood = mood.to_string();
        }
        self.write_through().await;
    }

    /// Force a mood label without touching the axes.
    pub async fn set_mood(&mut self, mood: &str) {
        if self.record.mood != mood {
            info!("Mood change: {} -> {}", self.record.mood, mood);
            self.record.mood = mood.to_string();
            self.write_through().await;
        }
    }

    /// Delete the persisted record and return to defaults in memory.
    pub async fn reset(&mut self) -> Result<()> {
        self.record = IdentityRecord::default();
        self.store.remove().await
    }
}
