//! Reverie Consciousness: the always-running presence loop
//!
//! Architecture:
//! - StateController: heartbeat-driven BOOT/ACTIVE/DREAMING machine with hysteresis
//! - DreamScheduler: while idle, picks one weighted background task per cycle
//! - BudgetLedger: persistent spend ledger gating every task
//! - IdentityState: level/XP/mood record grown by successful tasks
//! - EventBus: bounded, non-blocking fan-out to observers
//!
//! Trigger: the heartbeat only. Nothing mutates engine state between ticks.

pub mod bus;
pub mod config;
pub mod controller;
pub mod engine;
pub mod identity;
pub mod ledger;
pub mod persist;
pub mod plugins;
pub mod scheduler;
pub mod senses;
pub mod tasks;

pub use bus::EventBus;
pub use config::{expand_tilde, EngineConfig, Hysteresis};
pub use controller::{ControllerParts, StateController, BRIEFING_FALLBACK};
pub use engine::{Collaborators, Engine, EngineHandle};
pub use identity::{IdentityRecord, IdentityState, XpOutcome, IDENTITY_FILE};
pub use ledger::{Admission, BudgetLedger, SafetyGuard, LEDGER_FILE};
pub use plugins::{builtin_plugins, Plugin, PluginContext, PluginRegistry};
pub use scheduler::{CycleOutcome, DrawSource, DreamScheduler, ScriptedDraws};
pub use senses::read_sensors;
pub use tasks::{default_tasks, Curiosity, DreamTask, Librarian, Reflection};
