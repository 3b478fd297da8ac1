//! Plugin registry: optional reactions to state transitions
//!
//! Plugins are discovered once at startup. A factory that errors or panics,
//! or a plugin whose trigger or execution fails, is logged and skipped.
//! `execute` runs on its own tokio task under a timeout, so a plugin that
//! panics or hangs never reaches the heartbeat.

use reverie_core::{EngineState, Result, SensorReading};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// What a plugin sees on each transition.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub state: EngineState,
    /// `(from, to)` for the transition that just happened.
    pub transition: (EngineState, EngineState),
    pub reading: SensorReading,
}

#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `execute` should run for this context.
    fn trigger(&self, ctx: &PluginContext) -> bool;

    /// Returns a line for the event log; empty means nothing to say.
    async fn execute(&self, ctx: &PluginContext) -> Result<String>;
}

pub type PluginFactory = fn() -> Result<Box<dyn Plugin>>;

pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    timeout: Duration,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self { plugins: Vec::new(), timeout: DEFAULT_PLUGIN_TIMEOUT }
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound on each `execute` call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Instantiate every factory, skipping those that panic.
    pub fn discover(factories: &[PluginFactory]) -> Self {
        let mut registry = Self::new();
        for (i, factory) in factories.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(factory)) {
                Ok(Ok(plugin)) => {
                    info!("Loaded plugin: {}", plugin.name());
                    registry.plugins.push(Arc::from(plugin));
                }
                Ok(Err(e)) => warn!("Plugin factory #{} failed: {}", i, e),
                Err(_) => warn!("Plugin factory #{} panicked; skipped", i),
            }
        }
        registry
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(Arc::from(plugin));
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    /// Run every triggered plugin and collect the lines they produced.
    pub async fn check_triggers(&self, ctx: &PluginContext) -> Vec<String> {
        let mut lines = Vec::new();
        for plugin in &self.plugins {
            let triggered =
                catch_unwind(AssertUnwindSafe(|| plugin.trigger(ctx))).unwrap_or_else(|_| {
                    warn!("Plugin {} panicked in trigger", plugin.name());
                    false
                });
            if !triggered {
                continue;
            }
            match self.execute_isolated(plugin.clone(), ctx.clone()).await {
                Some(line) if !line.trim().is_empty() => lines.push(line),
                _ => {}
            }
        }
        lines
    }

    async fn execute_isolated(
        &self,
        plugin: Arc<dyn Plugin>,
        ctx: PluginContext,
    ) -> Option<String> {
        let name = plugin.name().to_string();
        let mut handle = tokio::spawn(async move { plugin.execute(&ctx).await });
        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(line))) => Some(line),
            Ok(Ok(Err(e))) => {
                warn!("Plugin {} failed: {}", name, e);
                None
            }
            Ok(Err(join_err)) => {
                warn!("Plugin {} aborted: {}", name, join_err);
                None
            }
            Err(_) => {
                handle.abort();
                warn!("Plugin {} timed out after {:?}", name, self.timeout);
                None
            }
        }
    }
}

/// Greets the user by time of day when they come back.
pub struct PhaseGreeting;

#[async_trait::async_trait]
impl Plugin for PhaseGreeting {
    fn name(&self) -> &str {
        "PhaseGreeting"
    }

    fn trigger(&self, ctx: &PluginContext) -> bool {
        ctx.transition == (EngineState::Dreaming, EngineState::Active)
    }

    async fn execute(&self, ctx: &PluginContext) -> Result<String> {
        let phase = ctx.reading.time_phase.to_string().to_lowercase();
        Ok(format!("Good {}.", phase))
    }
}

fn phase_greeting() -> Result<Box<dyn Plugin>> {
    Ok(Box::new(PhaseGreeting))
}

/// Factories compiled into the engine.
pub fn builtin_plugins() -> Vec<PluginFactory> {
    vec![phase_greeting]
}
