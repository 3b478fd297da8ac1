//! Engine: wires collaborators into a controller and runs the heartbeat
//!
//! The loop races every sensor read, tick and sleep against a
//! `CancellationToken`, so `EngineHandle::stop` returns within one heartbeat.

use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::controller::{ControllerParts, StateController};
use crate::identity::{IdentityState, IDENTITY_FILE};
use crate::ledger::{BudgetLedger, LEDGER_FILE};
use crate::plugins::{builtin_plugins, PluginRegistry};
use crate::scheduler::{DrawSource, DreamScheduler};
use crate::senses::read_sensors;
use crate::tasks::{default_tasks, DreamTask};
use reverie_core::{
    BriefingProvider, EngineState, InferenceProvider, KnowledgeStore, MaintenanceHook,
    NotifierHook, Result, SensorGateway,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Host-provided implementations of every external interface.
#[derive(Clone)]
pub struct Collaborators {
    pub sensors: Arc<dyn SensorGateway>,
    pub inference: Arc<dyn InferenceProvider>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub briefing: Arc<dyn BriefingProvider>,
    pub maintenance: Arc<dyn MaintenanceHook>,
    pub notifier: Arc<dyn NotifierHook>,
}

pub struct Engine {
    config: EngineConfig,
    state_dir: PathBuf,
    sensors: Arc<dyn SensorGateway>,
    controller: StateController,
}

impl Engine {
    /// Load persisted state from `state_dir` and build the default task set.
    pub fn new(config: EngineConfig, collaborators: Collaborators, state_dir: &Path) -> Result<Self> {
        let tasks = default_tasks(
            &config,
            collaborators.inference.clone(),
            collaborators.knowledge.clone(),
        );
        Self::with_tasks(config, collaborators, state_dir, tasks, None)
    }

    /// Build with an explicit task registry and, optionally, a scripted draw source.
    pub fn with_tasks(
        config: EngineConfig,
        collaborators: Collaborators,
        state_dir: &Path,
        tasks: Vec<Arc<dyn DreamTask>>,
        draws: Option<Box<dyn DrawSource>>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(state_dir)?;

        let persist_timeout = config.persist_timeout();
        let ledger = BudgetLedger::open(
            state_dir.join(LEDGER_FILE),
            config.budget.daily_budget_usd,
            config.budget.price_per_million_tokens,
            persist_timeout,
        );
        let identity = IdentityState::open(state_dir.join(IDENTITY_FILE), persist_timeout);

        let scheduler = match draws {
            Some(draws) => DreamScheduler::with_draws(
                tasks,
                config.dream_cycle_interval(),
                config.task_timeout(),
                draws,
            ),
            None => DreamScheduler::new(tasks, config.dream_cycle_interval(), config.task_timeout()),
        }
        .with_knowledge_timeout(config.knowledge_timeout());
        info!("Dream tasks: {}", scheduler.task_names().join(", "));

        let plugins =
            PluginRegistry::discover(&builtin_plugins()).with_timeout(config.plugin_timeout());
        let bus = EventBus::new(config.bus.capacity);

        let controller = StateController::new(
            &config,
            ControllerParts {
                ledger,
                identity,
                scheduler,
                plugins,
                bus,
                knowledge: collaborators.knowledge,
                briefing: collaborators.briefing,
                maintenance: collaborators.maintenance,
                notifier: collaborators.notifier,
            },
        )?;

        Ok(Self {
            config,
            state_dir: state_dir.to_path_buf(),
            sensors: collaborators.sensors,
            controller,
        })
    }

    /// Subscribe here before `spawn` to see the first events.
    pub fn bus(&self) -> &EventBus {
        self.controller.bus()
    }

    pub fn controller(&self) -> &StateController {
        &self.controller
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Start the heartbeat loop on the runtime.
    pub fn spawn(self) -> EngineHandle {
        let token = CancellationToken::new();
        let bus = self.controller.bus().clone();
        let (state_tx, state_rx) = watch::channel(self.controller.state());
        let join = tokio::spawn(self.run(token.clone(), state_tx));
        EngineHandle {
            bus,
            token,
            state: state_rx,
            join: Some(join),
        }
    }

    async fn run(mut self, token: CancellationToken, state_tx: watch::Sender<EngineState>) {
        info!(
            "Consciousness engine started (heartbeat {:?}, state dir {})",
            self.config.heartbeat_interval(),
            self.state_dir.display()
        );
        if let Err(e) = self.controller.identity().ensure_saved().await {
            warn!("Identity not persisted yet: {}", e);
        }

        let interval = self.config.heartbeat_interval();
        let sensor_timeout = self.config.sensor_timeout();
        loop {
            if token.is_cancelled() {
                break;
            }
            let reading = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                reading = read_sensors(self.sensors.as_ref(), sensor_timeout) => reading,
            };
            debug!(
                "Heartbeat: idle {:.0}s cpu {:.0}% window '{}'",
                reading.idle_seconds, reading.cpu_percent, reading.active_window
            );
            let state = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                state = self.controller.tick(&reading) => state,
            };
            state_tx.send_replace(state);

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("Consciousness engine stopped");
    }
}

/// Control surface for a running engine.
pub struct EngineHandle {
    bus: EventBus,
    token: CancellationToken,
    state: watch::Receiver<EngineState>,
    join: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// State after the most recent heartbeat.
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    /// Stop the loop, wait for it, then close the bus. Nothing is published
    /// after this returns.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!("Engine loop ended abnormally: {}", e);
            }
        }
        self.bus.close();
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
