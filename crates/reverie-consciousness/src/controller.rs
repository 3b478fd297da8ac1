//! StateController: the heartbeat-driven BOOT/ACTIVE/DREAMING machine
//!
//! One `tick` per heartbeat. The controller owns the engine state and every
//! piece of mutable engine data (ledger, identity, scheduler), so nothing
//! changes between ticks and no locking is needed.

use crate::bus::EventBus;
use crate::config::{EngineConfig, Hysteresis, ThresholdConfig};
use crate::identity::IdentityState;
use crate::ledger::BudgetLedger;
use crate::plugins::{PluginContext, PluginRegistry};
use crate::scheduler::{record_episode, CycleOutcome, DreamScheduler};
use reverie_core::{
    BriefingProvider, EngineEvent, EngineState, KnowledgeStore, MaintenanceHook, NotifierHook,
    Result, SensorReading,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const BRIEFING_FALLBACK: &str = "Calendar Module Offline";

/// Everything the controller drives, assembled by the engine.
pub struct ControllerParts {
    pub ledger: BudgetLedger,
    pub identity: IdentityState,
    pub scheduler: DreamScheduler,
    pub plugins: PluginRegistry,
    pub bus: EventBus,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub briefing: Arc<dyn BriefingProvider>,
    pub maintenance: Arc<dyn MaintenanceHook>,
    pub notifier: Arc<dyn NotifierHook>,
}

/// Why the controller left DREAMING.
#[derive(Debug, Clone, PartialEq)]
pub enum WakeReason {
    UserReturned,
    /// CPU over the ceiling or a blocklisted window appeared mid-dream.
    GuardViolated(String),
}

pub struct StateController {
    state: EngineState,
    hysteresis: Hysteresis,
    thresholds: ThresholdConfig,
    ledger: BudgetLedger,
    identity: IdentityState,
    scheduler: DreamScheduler,
    plugins: PluginRegistry,
    bus: EventBus,
    knowledge: Arc<dyn KnowledgeStore>,
    briefing: Arc<dyn BriefingProvider>,
    maintenance: Arc<dyn MaintenanceHook>,
    notifier: Arc<dyn NotifierHook>,
    briefing_timeout: Duration,
    notify_timeout: Duration,
    knowledge_timeout: Duration,
    maintenance_interval: Duration,
    maintenance_timeout: Duration,
    last_maintenance: Option<Instant>,
    last_cycle: Option<CycleOutcome>,
}

impl StateController {
    /// Fails only if the configured thresholds would allow flapping.
    pub fn new(config: &EngineConfig, parts: ControllerParts) -> Result<Self> {
        Ok(Self {
            state: EngineState::Boot,
            hysteresis: config.thresholds.hysteresis()?,
            thresholds: config.thresholds.clone(),
            ledger: parts.ledger,
            identity: parts.identity,
            scheduler: parts.scheduler,
            plugins: parts.plugins,
            bus: parts.bus,
            knowledge: parts.knowledge,
            briefing: parts.briefing,
            maintenance: parts.maintenance,
            notifier: parts.notifier,
            briefing_timeout: config.briefing_timeout(),
            notify_timeout: config.notify_timeout(),
            knowledge_timeout: config.knowledge_timeout(),
            maintenance_interval: config.maintenance_interval(),
            maintenance_timeout: config.maintenance_timeout(),
            last_maintenance: None,
            last_cycle: None,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    pub fn identity(&self) -> &IdentityState {
        &self.identity
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Outcome of the most recent dream cycle that was due.
    pub fn last_cycle(&self) -> Option<&CycleOutcome> {
        self.last_cycle.as_ref()
    }

    pub async fn tick(&mut self, reading: &SensorReading) -> EngineState {
        self.tick_at(Instant::now(), reading).await
    }

    /// Evaluate one heartbeat at `now`. Never fails.
    pub async fn tick_at(&mut self, now: Instant, reading: &SensorReading) -> EngineState {
        if self.maintenance_due(now) {
            self.run_maintenance(now).await;
        }

        match self.state {
            EngineState::Boot | EngineState::Active => {
                if self.ready_to_dream(reading) {
                    self.enter_dream(reading).await;
                }
            }
            EngineState::Dreaming => {
                if let Some(reason) = self.wake_reason(reading) {
                    self.wake(reading, reason).await;
                } else {
                    let outcome = self
                        .scheduler
                        .tick_at(now, &mut self.ledger, &mut self.identity, &self.bus, &self.knowledge)
                        .await;
                    if outcome != CycleOutcome::NotDue {
                        self.last_cycle = Some(outcome);
                    }
                }
            }
        }
        self.state
    }

    /// CPU or blocklist reason that forbids dreaming right now.
    fn guard_violation(&self, reading: &SensorReading) -> Option<String> {
        if reading.cpu_percent > self.thresholds.cpu_ceiling {
            return Some(format!(
                "CPU {:.0}% above ceiling {:.0}%",
                reading.cpu_percent, self.thresholds.cpu_ceiling
            ));
        }
        self.thresholds
            .blocked_by(&reading.active_window)
            .map(|entry| format!("blocked window '{}'", entry))
    }

    fn ready_to_dream(&self, reading: &SensorReading) -> bool {
        if reading.idle_seconds < self.hysteresis.enter_idle_secs() {
            return false;
        }
        match self.guard_violation(reading) {
            Some(reason) => {
                debug!("Idle but not dreaming: {}", reason);
                false
            }
            None => true,
        }
    }

    fn wake_reason(&self, reading: &SensorReading) -> Option<WakeReason> {
        if reading.idle_seconds < self.hysteresis.wake_idle_secs() {
            return Some(WakeReason::UserReturned);
        }
        if self.thresholds.revalidate_while_dreaming {
            return self.guard_violation(reading).map(WakeReason::GuardViolated);
        }
        None
    }

    async fn enter_dream(&mut self, reading: &SensorReading) {
        let from = self.state;
        self.state = EngineState::Dreaming;
        info!("Entering Dream Mode (idle {:.0}s)", reading.idle_seconds);
        self.bus.publish(EngineEvent::DreamStart);
        self.scheduler.reset_cycle();
        self.record("NERVOUS_SYSTEM", "User went idle. Entering Dream Mode.").await;
        self.run_plugins(from, reading).await;
    }

    async fn wake(&mut self, reading: &SensorReading, reason: WakeReason) {
        let from = self.state;
        self.state = EngineState::Active;
        match &reason {
            WakeReason::UserReturned => info!("Waking up: user returned"),
            WakeReason::GuardViolated(why) => info!("Waking up early: {}", why),
        }
        self.bus.publish(EngineEvent::DreamWake);

        let events = self.fetch_briefing().await;
        let briefing = format!("Welcome back. Here is your schedule:\n{}", events);
        self.bus.publish(EngineEvent::Briefing(briefing.clone()));
        self.notify("Reverie", briefing);

        self.record(
            "NERVOUS_SYSTEM",
            &format!("User returned. Waking up. Phase: {}", reading.time_phase),
        )
        .await;
        self.run_plugins(from, reading).await;
    }

    async fn fetch_briefing(&self) -> String {
        match tokio::time::timeout(self.briefing_timeout, self.briefing.upcoming_events()).await {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                warn!("Briefing provider failed: {}", e);
                BRIEFING_FALLBACK.to_string()
            }
            Err(_) => {
                warn!("Briefing provider timed out after {:?}", self.briefing_timeout);
                BRIEFING_FALLBACK.to_string()
            }
        }
    }

    /// Fire-and-forget: the heartbeat never waits on the notifier.
    fn notify(&self, title: &'static str, message: String) {
        let notifier = self.notifier.clone();
        let timeout = self.notify_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, notifier.notify(title, &message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Notification failed: {}", e),
                Err(_) => warn!("Notification timed out"),
            }
        });
    }

    async fn record(&self, source: &str, text: &str) {
        record_episode(self.knowledge.as_ref(), self.knowledge_timeout, source, text).await;
    }

    async fn run_plugins(&self, from: EngineState, reading: &SensorReading) {
        if self.plugins.is_empty() {
            return;
        }
        let ctx = PluginContext {
            state: self.state,
            transition: (from, self.state),
            reading: reading.clone(),
        };
        for line in self.plugins.check_triggers(&ctx).await {
            self.bus.publish(EngineEvent::Log(line));
        }
    }

    fn maintenance_due(&self, now: Instant) -> bool {
        match self.last_maintenance {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.maintenance_interval,
        }
    }

    /// Publish `Maintenance` and run the hook. Failures stop here.
    async fn run_maintenance(&mut self, now: Instant) {
        self.last_maintenance = Some(now);
        info!("Running scheduled maintenance");
        self.bus.publish(EngineEvent::Maintenance);
        match tokio::time::timeout(self.maintenance_timeout, self.maintenance.run()).await {
            Ok(Ok(())) => debug!("Maintenance complete"),
            Ok(Err(e)) => {
                warn!("Maintenance failed: {}", e);
                self.bus.publish(EngineEvent::log(format!("Maintenance failed: {}", e)));
            }
            Err(_) => {
                warn!("Maintenance timed out after {:?}", self.maintenance_timeout);
                self.bus.publish(EngineEvent::log("Maintenance timed out"));
            }
        }
    }
}
