//! Collaborator interfaces consumed by the engine
//!
//! The engine never knows how sensors are read, how text is generated, or
//! where memories live. Hosts plug those in through these traits.

use crate::error::Result;
use crate::types::{InferenceMode, TimePhase};

/// Workstation activity sensors. Each field is queried independently; the
/// engine treats any unreadable activity field as "user present".
#[async_trait::async_trait]
pub trait SensorGateway: Send + Sync {
    async fn idle_seconds(&self) -> Result<f64>;
    async fn cpu_percent(&self) -> Result<f64>;
    async fn active_window_title(&self) -> Result<String>;

    async fn time_phase(&self) -> Result<TimePhase> {
        Ok(TimePhase::now())
    }
}

/// Text generation, opaque to the core. Only dream tasks call it.
#[async_trait::async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn generate(&self, prompt: &str, mode: InferenceMode) -> Result<String>;
}

/// Long-term memory: episodic log plus concept notes.
#[async_trait::async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn log_episode(&self, source: &str, text: &str) -> Result<()>;
    async fn recall(&self, query: &str) -> Result<String>;
    async fn learn(&self, name: &str, content: &str, links: &[String]) -> Result<()>;
}

/// Supplies the schedule text shown when the user returns.
#[async_trait::async_trait]
pub trait BriefingProvider: Send + Sync {
    async fn upcoming_events(&self) -> Result<String>;
}

/// Hourly housekeeping. Failures are logged, never propagated.
#[async_trait::async_trait]
pub trait MaintenanceHook: Send + Sync {
    async fn run(&self) -> Result<()>;
}

/// Desktop notification sink. Fire-and-forget.
#[async_trait::async_trait]
pub trait NotifierHook: Send + Sync {
    async fn notify(&self, title: &str, message: &str) -> Result<()>;
}

/// Maintenance hook that does nothing.
pub struct NoopMaintenance;

#[async_trait::async_trait]
impl MaintenanceHook for NoopMaintenance {
    async fn run(&self) -> Result<()> {
        Ok(())
    }
}

/// Notifier that drops every notification.
pub struct NoopNotifier;

#[async_trait::async_trait]
impl NotifierHook for NoopNotifier {
    async fn notify(&self, _title: &str, _message: &str) -> Result<()> {
        Ok(())
    }
}
