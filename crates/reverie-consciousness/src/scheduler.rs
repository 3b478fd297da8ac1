//! DreamScheduler: one weighted background task per dream cycle
//!
//! Selection is inverse-CDF over the registry's cumulative weights. The draw
//! source is injectable so selection can be scripted in tests.

use crate::bus::EventBus;
use crate::identity::IdentityState;
use crate::ledger::BudgetLedger;
use crate::tasks::DreamTask;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reverie_core::{EngineEvent, Error, KnowledgeStore};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Source of uniform draws in [0, 1).
pub trait DrawSource: Send + Sync {
    fn next_draw(&mut self) -> f64;
}

impl DrawSource for StdRng {
    fn next_draw(&mut self) -> f64 {
        self.gen::<f64>()
    }
}

/// Replays a fixed sequence of draws, then repeats the last one.
#[derive(Debug, Clone)]
pub struct ScriptedDraws {
    draws: VecDeque<f64>,
    last: f64,
}

impl ScriptedDraws {
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self { draws: draws.into_iter().collect(), last: 0.0 }
    }
}

impl DrawSource for ScriptedDraws {
    fn next_draw(&mut self) -> f64 {
        if let Some(d) = self.draws.pop_front() {
            self.last = d;
        }
        self.last
    }
}

/// Running sum of weights, normalized so the last entry is exactly 1.0.
pub fn cumulative_weights(weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    if total <= 0.0 {
        return vec![1.0; weights.len()];
    }
    let mut acc = 0.0;
    let mut out: Vec<f64> = weights
        .iter()
        .map(|w| {
            if w.is_finite() && *w > 0.0 {
                acc += w / total;
            }
            acc
        })
        .collect();
    if let Some(last) = out.last_mut() {
        *last = 1.0;
    }
    out
}

/// First index whose cumulative weight exceeds `u`.
pub fn select_index(u: f64, cumulative: &[f64]) -> Option<usize> {
    if cumulative.is_empty() {
        return None;
    }
    let u = u.clamp(0.0, 1.0);
    Some(
        cumulative
            .iter()
            .position(|c| u < *c)
            .unwrap_or(cumulative.len() - 1),
    )
}

/// What a cycle did, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The cycle interval has not elapsed yet.
    NotDue,
    /// The registry is empty.
    Idle,
    /// The ledger refused the spend.
    Denied { task: String },
    /// Ran and produced text. XP was granted.
    Completed { task: String, xp: u64, leveled_up: bool },
    /// Ran and produced nothing.
    Empty { task: String },
    Failed { task: String, error: String },
}

pub const DEFAULT_KNOWLEDGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort episode write. A failing or stalled store is logged and
/// skipped.
pub(crate) async fn record_episode(
    knowledge: &dyn KnowledgeStore,
    timeout: Duration,
    source: &str,
    text: &str,
) {
    match tokio::time::timeout(timeout, knowledge.log_episode(source, text)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Could not record {} episode: {}", source, e),
        Err(_) => warn!("Recording {} episode timed out after {:?}", source, timeout),
    }
}

pub struct DreamScheduler {
    tasks: Vec<Arc<dyn DreamTask>>,
    cumulative: Vec<f64>,
    interval: Duration,
    task_timeout: Duration,
    knowledge_timeout: Duration,
    last_cycle: Option<Instant>,
    draws: Box<dyn DrawSource>,
}

impl DreamScheduler {
    pub fn new(tasks: Vec<Arc<dyn DreamTask>>, interval: Duration, task_timeout: Duration) -> Self {
        Self::with_draws(tasks, interval, task_timeout, Box::new(StdRng::from_entropy()))
    }

    pub fn with_draws(
        tasks: Vec<Arc<dyn DreamTask>>,
        interval: Duration,
        task_timeout: Duration,
        draws: Box<dyn DrawSource>,
    ) -> Self {
        let weights: Vec<f64> = tasks.iter().map(|t| t.weight()).collect();
        Self {
            cumulative: cumulative_weights(&weights),
            tasks,
            interval,
            task_timeout,
            knowledge_timeout: DEFAULT_KNOWLEDGE_TIMEOUT,
            last_cycle: None,
            draws,
        }
    }

    /// Bound on the level-up episode write.
    pub fn with_knowledge_timeout(mut self, timeout: Duration) -> Self {
        self.knowledge_timeout = timeout;
        self
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name().to_string()).collect()
    }

    /// Forget the last cycle so the next dream starts immediately.
    pub fn reset_cycle(&mut self) {
        self.last_cycle = None;
    }

    pub fn is_due_at(&self, now: Instant) -> bool {
        match self.last_cycle {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Pick the next task from one draw.
    pub fn choose(&mut self) -> Option<Arc<dyn DreamTask>> {
        let u = self.draws.next_draw();
        select_index(u, &self.cumulative).map(|i| self.tasks[i].clone())
    }

    pub async fn tick(
        &mut self,
        ledger: &mut BudgetLedger,
        identity: &mut IdentityState,
        bus: &EventBus,
        knowledge: &Arc<dyn KnowledgeStore>,
    ) -> CycleOutcome {
        self.tick_at(Instant::now(), ledger, identity, bus, knowledge).await
    }

    /// Run at most one task if a cycle is due at `now`.
    pub async fn tick_at(
        &mut self,
        now: Instant,
        ledger: &mut BudgetLedger,
        identity: &mut IdentityState,
        bus: &EventBus,
        knowledge: &Arc<dyn KnowledgeStore>,
    ) -> CycleOutcome {
        if !self.is_due_at(now) {
            return CycleOutcome::NotDue;
        }
        self.last_cycle = Some(now);

        let Some(task) = self.choose() else {
            return CycleOutcome::Idle;
        };
        let name = task.name().to_string();

        let admission = ledger.admit(task.estimated_tokens()).await;
        if !admission.allowed {
            bus.publish(EngineEvent::log(format!(
                "Budget limit reached (${:.4} / ${:.2}); skipping {}",
                admission.cumulative_usd,
                ledger.daily_budget(),
                name
            )));
            return CycleOutcome::Denied { task: name };
        }

        info!("Dreaming: running {}", name);
        match self.run_isolated(task.clone()).await {
            Ok(text) if !text.trim().is_empty() => {
                let xp = task.xp_reward();
                let outcome = identity.grant_xp(xp, &name).await;
                bus.publish(EngineEvent::log(format!("{} completed: {}", name, text.trim())));
                if let Some(level) = outcome.new_level {
                    let announcement = format!("LEVEL UP! Now level {}", level);
                    bus.publish(EngineEvent::log(announcement.clone()));
                    let timeout = self.knowledge_timeout;
                    record_episode(knowledge.as_ref(), timeout, "SOUL", &announcement).await;
                    identity.update_emotion(0.1, 0.1).await;
                }
                for t in &outcome.unlocked_traits {
                    bus.publish(EngineEvent::log(format!("Gained trait: {}", t)));
                }
                CycleOutcome::Completed { task: name, xp, leveled_up: outcome.leveled_up() }
            }
            Ok(_) => {
                debug!("{} produced nothing", name);
                CycleOutcome::Empty { task: name }
            }
            Err(e) => {
                warn!("Dream task {} failed: {}", name, e);
                bus.publish(EngineEvent::log(format!("{} failed: {}", name, e)));
                CycleOutcome::Failed { task: name, error: e.to_string() }
            }
        }
    }

    /// Run a task on its own tokio task so a panic or a hang cannot reach
    /// the heartbeat. Hangs are aborted at the task timeout.
    async fn run_isolated(&self, task: Arc<dyn DreamTask>) -> reverie_core::Result<String> {
        let name = task.name().to_string();
        let mut handle = tokio::spawn(async move { task.run().await });
        match tokio::time::timeout(self.task_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(Error::task(&name, format!("task aborted: {}", join_err))),
            Err(_) => {
                handle.abort();
                Err(Error::timeout(&name, self.task_timeout))
            }
        }
    }
}
