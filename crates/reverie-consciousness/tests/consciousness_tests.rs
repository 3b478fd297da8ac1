//! Integration tests for reverie-consciousness: state machine, scheduling,
//! ledger, identity and the engine loop

use reverie_consciousness::*;
use reverie_core::*;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;

// ===========================================================================
// Fakes
// ===========================================================================

#[derive(Default)]
struct MemoryKnowledge {
    episodes: Mutex<Vec<(String, String)>>,
    recall_text: String,
}

impl MemoryKnowledge {
    fn episodes_from(&self, source: &str) -> Vec<String> {
        self.episodes
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == source)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl KnowledgeStore for MemoryKnowledge {
    async fn log_episode(&self, source: &str, text: &str) -> Result<()> {
        self.episodes.lock().unwrap().push((source.into(), text.into()));
        Ok(())
    }
    async fn recall(&self, _query: &str) -> Result<String> {
        Ok(self.recall_text.clone())
    }
    async fn learn(&self, _name: &str, _content: &str, _links: &[String]) -> Result<()> {
        Ok(())
    }
}

/// A vault that never answers.
struct StalledKnowledge;

#[async_trait::async_trait]
impl KnowledgeStore for StalledKnowledge {
    async fn log_episode(&self, _source: &str, _text: &str) -> Result<()> {
        std::future::pending().await
    }
    async fn recall(&self, _query: &str) -> Result<String> {
        std::future::pending().await
    }
    async fn learn(&self, _name: &str, _content: &str, _links: &[String]) -> Result<()> {
        std::future::pending().await
    }
}

struct CannedInference {
    reply: String,
    calls: AtomicUsize,
}

impl CannedInference {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self { reply: reply.into(), calls: AtomicUsize::new(0) })
    }
}

#[async_trait::async_trait]
impl InferenceProvider for CannedInference {
    async fn generate(&self, _prompt: &str, _mode: InferenceMode) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

struct Schedule(Option<&'static str>);

#[async_trait::async_trait]
impl BriefingProvider for Schedule {
    async fn upcoming_events(&self) -> Result<String> {
        match self.0 {
            Some(text) => Ok(text.into()),
            None => Err(Error::Briefing("calendar unreachable".into())),
        }
    }
}

#[derive(Default)]
struct CountingMaintenance {
    runs: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait::async_trait]
impl MaintenanceHook for CountingMaintenance {
    async fn run(&self) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::hook("maintenance", "vault locked"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Reply(&'static str),
    Fail,
    Panic,
    Hang,
}

struct FixedTask {
    name: &'static str,
    weight: f64,
    tokens: u64,
    xp: u64,
    behavior: Behavior,
    runs: AtomicUsize,
}

impl FixedTask {
    fn new(name: &'static str, weight: f64, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self { name, weight, tokens: 300, xp: 10, behavior, runs: AtomicUsize::new(0) })
    }

    fn with_cost(name: &'static str, tokens: u64, xp: u64) -> Arc<Self> {
        Arc::new(Self {
            name,
            weight: 1.0,
            tokens,
            xp,
            behavior: Behavior::Reply("done"),
            runs: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl DreamTask for FixedTask {
    fn name(&self) -> &str {
        self.name
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn estimated_tokens(&self) -> u64 {
        self.tokens
    }

    fn xp_reward(&self) -> u64 {
        self.xp
    }

    async fn run(&self) -> Result<String> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Reply(text) => Ok(text.into()),
            Behavior::Fail => Err(Error::task(self.name, "model unavailable")),
            Behavior::Panic => panic!("task blew up"),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("too late".into())
            }
        }
    }
}

fn one(task: &Arc<FixedTask>) -> Vec<Arc<dyn DreamTask>> {
    vec![task.clone() as Arc<dyn DreamTask>]
}

struct Rig {
    controller: StateController,
    events: mpsc::Receiver<EngineEvent>,
    knowledge: Arc<MemoryKnowledge>,
    maintenance: Arc<CountingMaintenance>,
    t0: Instant,
}

impl Rig {
    fn at(&self, secs: u64) -> Instant {
        self.t0 + Duration::from_secs(secs)
    }

    async fn feed(&mut self, secs: u64, idle: f64, cpu: f64, window: &str) -> EngineState {
        let reading = SensorReading::new(idle, cpu, window, TimePhase::Evening);
        let now = self.at(secs);
        self.controller.tick_at(now, &reading).await
    }

    fn drain(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(e) = self.events.try_recv() {
            out.push(e);
        }
        out
    }
}

fn scenario_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.thresholds.enter_idle_secs = 10.0;
    config.thresholds.wake_idle_secs = 5.0;
    config
}

fn rig(
    dir: &Path,
    config: &EngineConfig,
    tasks: Vec<Arc<dyn DreamTask>>,
    draws: Vec<f64>,
    briefing: Schedule,
) -> Rig {
    let knowledge = Arc::new(MemoryKnowledge::default());
    let maintenance = Arc::new(CountingMaintenance::default());
    let bus = EventBus::new(config.bus.capacity);
    let events = bus.subscribe_channel();
    let parts = ControllerParts {
        ledger: BudgetLedger::open(
            dir.join(LEDGER_FILE),
            config.budget.daily_budget_usd,
            config.budget.price_per_million_tokens,
            config.persist_timeout(),
        ),
        identity: IdentityState::open(dir.join(IDENTITY_FILE), config.persist_timeout()),
        scheduler: DreamScheduler::with_draws(
            tasks,
            config.dream_cycle_interval(),
            config.task_timeout(),
            Box::new(ScriptedDraws::new(draws)),
        ),
        plugins: PluginRegistry::discover(&builtin_plugins()),
        bus,
        knowledge: knowledge.clone(),
        briefing: Arc::new(briefing),
        maintenance: maintenance.clone(),
        notifier: Arc::new(NoopNotifier),
    };
    Rig {
        controller: StateController::new(config, parts).unwrap(),
        events,
        knowledge,
        maintenance,
        t0: Instant::now(),
    }
}

fn count(events: &[EngineEvent], kind: &str) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

fn logs(events: &[EngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Log(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}

// ===========================================================================
// State machine
// ===========================================================================

#[tokio::test]
async fn idle_below_threshold_never_dreams_then_wakes_with_briefing() {
    let tmp = TempDir::new().unwrap();
    let mut rig = rig(tmp.path(), &scenario_config(), vec![], vec![], Schedule(Some("10:00 Standup")));

    for (i, idle) in [0.0, 3.0, 9.0].into_iter().enumerate() {
        assert_eq!(rig.feed(i as u64, idle, 20.0, "Finder").await, EngineState::Boot);
    }
    let events = rig.drain();
    assert_eq!(count(&events, "dream_start"), 0);

    assert_eq!(rig.feed(3, 15.0, 20.0, "Finder").await, EngineState::Dreaming);
    let events = rig.drain();
    assert_eq!(count(&events, "dream_start"), 1);

    assert_eq!(rig.feed(4, 3.0, 20.0, "Finder").await, EngineState::Active);
    let events = rig.drain();
    assert_eq!(count(&events, "dream_wake"), 1);
    assert_eq!(count(&events, "briefing"), 1);
    assert!(events.contains(&EngineEvent::Briefing(
        "Welcome back. Here is your schedule:\n10:00 Standup".into()
    )));
    assert!(logs(&events).contains(&"Good evening.".to_string()));

    let nervous = rig.knowledge.episodes_from("NERVOUS_SYSTEM");
    assert_eq!(nervous.len(), 2);
    assert_eq!(nervous[0], "User went idle. Entering Dream Mode.");
    assert_eq!(nervous[1], "User returned. Waking up. Phase: Evening");
}

#[tokio::test]
async fn idle_between_thresholds_keeps_current_state() {
    let tmp = TempDir::new().unwrap();
    let mut rig = rig(tmp.path(), &scenario_config(), vec![], vec![], Schedule(Some("")));

    rig.feed(0, 15.0, 10.0, "Finder").await;
    // 7s is below enter but not below wake: still dreaming.
    assert_eq!(rig.feed(1, 7.0, 10.0, "Finder").await, EngineState::Dreaming);
    assert_eq!(rig.feed(2, 4.9, 10.0, "Finder").await, EngineState::Active);
    // And 7s from ACTIVE does not re-enter.
    assert_eq!(rig.feed(3, 7.0, 10.0, "Finder").await, EngineState::Active);
}

#[tokio::test]
async fn blocklisted_windows_prevent_dreaming() {
    let tmp = TempDir::new().unwrap();
    let mut rig = rig(tmp.path(), &EngineConfig::default(), vec![], vec![], Schedule(Some("")));

    for (i, window) in ["Steam", "VSCode", "main.rs - Visual Studio Code", "zoom meeting"]
        .into_iter()
        .enumerate()
    {
        assert_eq!(rig.feed(i as u64, 10_000.0, 5.0, window).await, EngineState::Boot);
    }
    assert_eq!(count(&rig.drain(), "dream_start"), 0);
}

#[tokio::test]
async fn high_cpu_prevents_dreaming() {
    let tmp = TempDir::new().unwrap();
    let mut rig = rig(tmp.path(), &EngineConfig::default(), vec![], vec![], Schedule(Some("")));

    assert_eq!(rig.feed(0, 10_000.0, 85.0, "Finder").await, EngineState::Boot);
    assert_eq!(rig.feed(1, 10_000.0, 60.0, "Finder").await, EngineState::Dreaming);
}

#[tokio::test]
async fn guard_violation_mid_dream_forces_wake() {
    let tmp = TempDir::new().unwrap();
    let mut rig = rig(tmp.path(), &scenario_config(), vec![], vec![], Schedule(Some("")));

    rig.feed(0, 400.0, 10.0, "Finder").await;
    assert_eq!(rig.feed(1, 410.0, 10.0, "Steam").await, EngineState::Active);
    let events = rig.drain();
    assert_eq!(count(&events, "dream_wake"), 1);
}

#[tokio::test]
async fn guard_revalidation_can_be_disabled() {
    let tmp = TempDir::new().unwrap();
    let mut config = scenario_config();
    config.thresholds.revalidate_while_dreaming = false;
    let mut rig = rig(tmp.path(), &config, vec![], vec![], Schedule(Some("")));

    rig.feed(0, 400.0, 10.0, "Finder").await;
    assert_eq!(rig.feed(1, 410.0, 95.0, "Steam").await, EngineState::Dreaming);
}

#[tokio::test]
async fn failing_briefing_falls_back() {
    let tmp = TempDir::new().unwrap();
    let mut rig = rig(tmp.path(), &scenario_config(), vec![], vec![], Schedule(None));

    rig.feed(0, 400.0, 10.0, "Finder").await;
    rig.feed(1, 0.0, 10.0, "Finder").await;
    let events = rig.drain();
    assert!(events.contains(&EngineEvent::Briefing(format!(
        "Welcome back. Here is your schedule:\n{}",
        BRIEFING_FALLBACK
    ))));
}

// ===========================================================================
// Maintenance
// ===========================================================================

#[tokio::test]
async fn maintenance_fires_once_per_interval() {
    let tmp = TempDir::new().unwrap();
    let mut rig = rig(tmp.path(), &EngineConfig::default(), vec![], vec![], Schedule(Some("")));

    for secs in [0, 1_800, 3_599, 3_600, 3_601, 7_199, 7_200] {
        rig.feed(secs, 0.0, 10.0, "Finder").await;
    }
    assert_eq!(rig.maintenance.runs.load(Ordering::SeqCst), 3);
    assert_eq!(count(&rig.drain(), "maintenance"), 3);
}

#[tokio::test]
async fn maintenance_failure_is_contained() {
    let tmp = TempDir::new().unwrap();
    let mut rig = rig(tmp.path(), &EngineConfig::default(), vec![], vec![], Schedule(Some("")));
    rig.maintenance.fail.store(true, Ordering::SeqCst);

    assert_eq!(rig.feed(0, 0.0, 10.0, "Finder").await, EngineState::Boot);
    let events = rig.drain();
    assert_eq!(count(&events, "maintenance"), 1);
    assert!(logs(&events).iter().any(|l| l.starts_with("Maintenance failed")));
}

// ===========================================================================
// Dream scheduling
// ===========================================================================

#[tokio::test]
async fn scripted_draws_select_tasks_in_order() {
    let tmp = TempDir::new().unwrap();
    let librarian = FixedTask::new("Librarian", 0.3, Behavior::Reply("Proposed: tidy"));
    let reflection = FixedTask::new("Reflection", 0.2, Behavior::Reply("Insight: rest"));
    let curiosity = FixedTask::new("Curiosity", 0.5, Behavior::Reply("Stars are old"));
    let tasks: Vec<Arc<dyn DreamTask>> = vec![librarian.clone(), reflection.clone(), curiosity.clone()];
    let mut rig = rig(tmp.path(), &scenario_config(), tasks, vec![0.1, 0.4, 0.9], Schedule(Some("")));

    rig.feed(100, 400.0, 10.0, "Finder").await;
    let mut picked = Vec::new();
    for secs in [101, 105, 111, 115, 121] {
        rig.feed(secs, 400.0, 10.0, "Finder").await;
        if let Some(CycleOutcome::Completed { task, .. }) = rig.controller.last_cycle() {
            if picked.last() != Some(task) {
                picked.push(task.clone());
            }
        }
    }
    assert_eq!(picked, vec!["Librarian", "Reflection", "Curiosity"]);
    assert_eq!(librarian.runs.load(Ordering::SeqCst), 1);
    assert_eq!(reflection.runs.load(Ordering::SeqCst), 1);
    assert_eq!(curiosity.runs.load(Ordering::SeqCst), 1);
    assert_eq!(rig.controller.identity().record().xp, 30);
}

#[tokio::test]
async fn scheduler_does_not_run_outside_dreams() {
    let tmp = TempDir::new().unwrap();
    let task = FixedTask::new("Curiosity", 1.0, Behavior::Reply("thought"));
    let mut rig = rig(tmp.path(), &scenario_config(), one(&task), vec![0.5], Schedule(Some("")));

    for secs in 0..30 {
        rig.feed(secs, 0.0, 10.0, "Finder").await;
    }
    assert_eq!(task.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn budget_denial_skips_task_but_charges() {
    let tmp = TempDir::new().unwrap();
    let mut config = scenario_config();
    config.budget.daily_budget_usd = 0.0001;
    let task = FixedTask::with_cost("Librarian", 500, 5);
    let mut rig = rig(tmp.path(), &config, one(&task), vec![0.1], Schedule(Some("")));

    rig.feed(0, 400.0, 10.0, "Finder").await;
    rig.feed(1, 400.0, 10.0, "Finder").await;

    assert_eq!(
        rig.controller.last_cycle(),
        Some(&CycleOutcome::Denied { task: "Librarian".into() })
    );
    assert_eq!(task.runs.load(Ordering::SeqCst), 0);
    assert_eq!(rig.controller.identity().record().xp, 0);
    assert!((rig.controller.ledger().current_spend() - 0.000175).abs() < 1e-12);
    assert!(logs(&rig.drain()).iter().any(|l| l.starts_with("Budget limit reached")));
}

#[tokio::test]
async fn failing_and_panicking_tasks_are_contained() {
    let tmp = TempDir::new().unwrap();
    let failing = FixedTask::new("Reflection", 0.5, Behavior::Fail);
    let panicking = FixedTask::new("Curiosity", 0.5, Behavior::Panic);
    let tasks: Vec<Arc<dyn DreamTask>> = vec![failing, panicking];
    let mut rig = rig(tmp.path(), &scenario_config(), tasks, vec![0.1, 0.9], Schedule(Some("")));

    rig.feed(0, 400.0, 10.0, "Finder").await;
    rig.feed(1, 400.0, 10.0, "Finder").await;
    assert!(matches!(rig.controller.last_cycle(), Some(CycleOutcome::Failed { task, .. }) if task == "Reflection"));
    rig.feed(12, 400.0, 10.0, "Finder").await;
    assert!(matches!(rig.controller.last_cycle(), Some(CycleOutcome::Failed { task, .. }) if task == "Curiosity"));

    assert_eq!(rig.controller.state(), EngineState::Dreaming);
    assert_eq!(rig.controller.identity().record().xp, 0);
    let failures: Vec<String> = logs(&rig.drain()).into_iter().filter(|l| l.contains("failed")).collect();
    assert_eq!(failures.len(), 2);
}

#[tokio::test]
async fn hanging_task_is_bounded_by_timeout() {
    let tmp = TempDir::new().unwrap();
    let mut config = scenario_config();
    config.dream.task_timeout_secs = 1;
    let task = FixedTask::new("Curiosity", 1.0, Behavior::Hang);
    let mut rig = rig(tmp.path(), &config, one(&task), vec![0.5], Schedule(Some("")));

    rig.feed(0, 400.0, 10.0, "Finder").await;
    let started = Instant::now();
    rig.feed(1, 400.0, 10.0, "Finder").await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(rig.controller.last_cycle(), Some(CycleOutcome::Failed { .. })));
}

#[tokio::test]
async fn empty_result_grants_no_xp() {
    let tmp = TempDir::new().unwrap();
    let task = FixedTask::new("Reflection", 1.0, Behavior::Reply("   "));
    let mut rig = rig(tmp.path(), &scenario_config(), one(&task), vec![0.5], Schedule(Some("")));

    rig.feed(0, 400.0, 10.0, "Finder").await;
    rig.feed(1, 400.0, 10.0, "Finder").await;
    assert_eq!(
        rig.controller.last_cycle(),
        Some(&CycleOutcome::Empty { task: "Reflection".into() })
    );
    assert_eq!(rig.controller.identity().record().xp, 0);
}

#[tokio::test]
async fn level_up_from_task_announces_and_lifts_mood() {
    let tmp = TempDir::new().unwrap();
    let task = FixedTask::with_cost("Reflection", 10, 100);
    let mut rig = rig(tmp.path(), &scenario_config(), one(&task), vec![0.5], Schedule(Some("")));

    rig.feed(0, 400.0, 10.0, "Finder").await;
    rig.feed(1, 400.0, 10.0, "Finder").await;

    let record = rig.controller.identity().record().clone();
    assert_eq!(record.level, 2);
    assert_eq!(record.xp, 0);
    assert_eq!(record.xp_to_next_level, 150);
    assert!((record.valence - 0.6).abs() < 1e-9);
    assert!((record.arousal - 0.6).abs() < 1e-9);

    let lines = logs(&rig.drain());
    assert!(lines.iter().any(|l| l == "LEVEL UP! Now level 2"));
    assert!(lines.iter().any(|l| l == "Gained trait: Self-Aware"));
    assert_eq!(rig.knowledge.episodes_from("SOUL").len(), 1);
}

// ===========================================================================
// Ledger
// ===========================================================================

#[tokio::test]
async fn ledger_charges_even_when_denying() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(LEDGER_FILE);
    let mut ledger = BudgetLedger::open(&path, 1.0, 0.35, Duration::from_secs(5));

    let first = ledger.admit(500_000).await;
    assert!(first.allowed);
    assert!((first.cost_usd - 0.175).abs() < 1e-9);

    let second = ledger.admit(3_000_000).await;
    assert!(!second.allowed);
    assert!((second.cost_usd - 1.05).abs() < 1e-9);
    assert!((second.cumulative_usd - 1.225).abs() < 1e-9);
    assert!((ledger.current_spend() - 1.225).abs() < 1e-9);

    let reopened = BudgetLedger::open(&path, 1.0, 0.35, Duration::from_secs(5));
    assert!((reopened.current_spend() - 1.225).abs() < 1e-9);

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!((raw["current_spend"].as_f64().unwrap() - 1.225).abs() < 1e-9);
}

#[tokio::test]
async fn ledger_spend_is_monotonic_until_reset() {
    let tmp = TempDir::new().unwrap();
    let mut ledger = BudgetLedger::open(tmp.path().join(LEDGER_FILE), 1.0, 0.35, Duration::from_secs(5));

    let mut last = 0.0;
    for tokens in [0, 10, 1_000_000, 7, 2_500_000] {
        let a = ledger.admit(tokens).await;
        assert!(a.cumulative_usd >= last);
        assert_eq!(a.allowed, a.cumulative_usd <= 1.0);
        last = a.cumulative_usd;
    }
    ledger.reset().await.unwrap();
    assert_eq!(ledger.current_spend(), 0.0);
}

// ===========================================================================
// Identity
// ===========================================================================

#[tokio::test]
async fn level_up_unlocks_self_aware_once() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(IDENTITY_FILE);
    let mut identity = IdentityState::open(&path, Duration::from_secs(5));

    let outcome = identity.grant_xp(100, "test").await;
    assert_eq!(outcome.new_level, Some(2));
    assert_eq!(outcome.unlocked_traits, vec!["Self-Aware".to_string()]);
    assert_eq!(identity.record().xp, 0);
    assert_eq!(identity.record().xp_to_next_level, 150);

    let again = identity.grant_xp(10, "test").await;
    assert!(!again.leveled_up());
    assert!(again.unlocked_traits.is_empty());
    let self_aware = identity.record().traits.iter().filter(|t| *t == "Self-Aware").count();
    assert_eq!(self_aware, 1);

    let reloaded = IdentityState::open(&path, Duration::from_secs(5));
    assert_eq!(reloaded.level(), 2);
    assert_eq!(reloaded.record().xp, 10);
}

#[tokio::test]
async fn emotion_is_clamped_and_relabelled() {
    let tmp = TempDir::new().unwrap();
    let mut identity = IdentityState::open(tmp.path().join(IDENTITY_FILE), Duration::from_secs(5));

    identity.update_emotion(5.0, 5.0).await;
    assert_eq!(identity.record().valence, 1.0);
    assert_eq!(identity.record().arousal, 1.0);
    assert_eq!(identity.mood(), "Excited/Joyful");

    identity.update_emotion(-5.0, -5.0).await;
    assert_eq!(identity.mood(), "Melancholy/Tired");
}

// ===========================================================================
// Tasks
// ===========================================================================

#[tokio::test]
async fn librarian_returns_only_proposals() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("invoice.pdf"), b"x").unwrap();
    std::fs::write(tmp.path().join("cat.png"), b"x").unwrap();
    let knowledge = Arc::new(MemoryKnowledge::default());

    let inference = CannedInference::new("Proposed: Move invoice.pdf to Documents");
    let task = Librarian::new(tmp.path().to_path_buf(), inference, knowledge.clone(), SafetyGuard::default());
    assert_eq!(task.run().await.unwrap(), "Proposed: Move invoice.pdf to Documents");
    assert_eq!(knowledge.episodes_from("LIBRARIAN").len(), 1);

    let chatty = CannedInference::new("These look like documents.");
    let task = Librarian::new(tmp.path().to_path_buf(), chatty, knowledge.clone(), SafetyGuard::default());
    assert_eq!(task.run().await.unwrap(), "");
}

#[tokio::test]
async fn librarian_blocks_unsafe_proposals() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("junk.tmp"), b"x").unwrap();
    let knowledge = Arc::new(MemoryKnowledge::default());

    let inference = CannedInference::new("Proposed: rm -rf the whole folder");
    let task = Librarian::new(tmp.path().to_path_buf(), inference, knowledge.clone(), SafetyGuard::default());
    assert!(task.run().await.is_err());
    assert!(knowledge.episodes_from("LIBRARIAN").is_empty());
}

#[tokio::test]
async fn librarian_with_empty_folder_skips_inference() {
    let tmp = TempDir::new().unwrap();
    let inference = CannedInference::new("Proposed: nothing");
    let task = Librarian::new(
        tmp.path().join("missing"),
        inference.clone(),
        Arc::new(MemoryKnowledge::default()),
        SafetyGuard::default(),
    );
    assert_eq!(task.run().await.unwrap(), "");
    assert_eq!(inference.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reflection_needs_memories() {
    let inference = CannedInference::new("Insight: the user works late.");
    let empty = Reflection::new(inference.clone(), Arc::new(MemoryKnowledge::default()));
    assert_eq!(empty.run().await.unwrap(), "");
    assert_eq!(inference.calls.load(Ordering::SeqCst), 0);

    let knowledge = Arc::new(MemoryKnowledge {
        recall_text: "- 23:10 user edited notes".into(),
        ..Default::default()
    });
    let task = Reflection::new(inference, knowledge.clone());
    assert_eq!(task.run().await.unwrap(), "Insight: the user works late.");
    assert_eq!(knowledge.episodes_from("REFLECTION"), vec!["Insight: the user works late."]);
}

#[tokio::test]
async fn curiosity_records_subconscious_thought() {
    let knowledge = Arc::new(MemoryKnowledge::default());
    let task = Curiosity::new(
        vec!["Tide pools".into()],
        CannedInference::new("Small worlds teach big lessons."),
        knowledge.clone(),
    );
    assert_eq!(task.run().await.unwrap(), "Small worlds teach big lessons.");
    assert_eq!(
        knowledge.episodes_from("SUBCONSCIOUS"),
        vec!["Dreamt about 'Tide pools': Small worlds teach big lessons."]
    );
}

#[test]
fn default_registry_weights() {
    let config = EngineConfig::default();
    let tasks = default_tasks(
        &config,
        CannedInference::new(""),
        Arc::new(MemoryKnowledge::default()),
    );
    let summary: Vec<(String, f64, u64, u64)> = tasks
        .iter()
        .map(|t| (t.name().to_string(), t.weight(), t.estimated_tokens(), t.xp_reward()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Librarian".to_string(), 0.3, 500, 5),
            ("Reflection".to_string(), 0.2, 1_000, 15),
            ("Curiosity".to_string(), 0.5, 300, 10),
        ]
    );
}

#[tokio::test]
async fn stalled_knowledge_store_does_not_freeze_transitions() {
    let tmp = TempDir::new().unwrap();
    let mut config = scenario_config();
    config.timeouts.knowledge_secs = 1;
    let bus = EventBus::new(config.bus.capacity);
    let mut events = bus.subscribe_channel();
    let task = FixedTask::with_cost("Reflection", 10, 100);
    let parts = ControllerParts {
        ledger: BudgetLedger::open(
            tmp.path().join(LEDGER_FILE),
            config.budget.daily_budget_usd,
            config.budget.price_per_million_tokens,
            config.persist_timeout(),
        ),
        identity: IdentityState::open(tmp.path().join(IDENTITY_FILE), config.persist_timeout()),
        scheduler: DreamScheduler::with_draws(
            one(&task),
            config.dream_cycle_interval(),
            config.task_timeout(),
            Box::new(ScriptedDraws::new([0.5])),
        )
        .with_knowledge_timeout(config.knowledge_timeout()),
        plugins: PluginRegistry::new(),
        bus,
        knowledge: Arc::new(StalledKnowledge),
        briefing: Arc::new(Schedule(Some("standup"))),
        maintenance: Arc::new(NoopMaintenance),
        notifier: Arc::new(NoopNotifier),
    };
    let mut controller = StateController::new(&config, parts).unwrap();
    let t0 = Instant::now();
    let idle = SensorReading::new(15.0, 10.0, "Finder", TimePhase::Evening);
    let back = SensorReading::new(0.0, 10.0, "Finder", TimePhase::Evening);

    let bounded = Duration::from_secs(3);
    let state = tokio::time::timeout(bounded, controller.tick_at(t0, &idle)).await.unwrap();
    assert_eq!(state, EngineState::Dreaming);

    // Level-up writes a SOUL episode to the stalled store.
    let at = t0 + Duration::from_secs(1);
    let state = tokio::time::timeout(bounded, controller.tick_at(at, &idle))
        .await
        .unwrap();
    assert_eq!(state, EngineState::Dreaming);
    assert_eq!(controller.identity().record().level, 2);

    let at = t0 + Duration::from_secs(2);
    let state = tokio::time::timeout(bounded, controller.tick_at(at, &back))
        .await
        .unwrap();
    assert_eq!(state, EngineState::Active);

    let mut seen = Vec::new();
    while let Ok(e) = events.try_recv() {
        seen.push(e);
    }
    assert_eq!(count(&seen, "dream_start"), 1);
    assert_eq!(count(&seen, "briefing"), 1);
}

// ===========================================================================
// Engine loop
// ===========================================================================

struct SteadySensors {
    idle: Mutex<f64>,
}

#[async_trait::async_trait]
impl SensorGateway for SteadySensors {
    async fn idle_seconds(&self) -> Result<f64> {
        Ok(*self.idle.lock().unwrap())
    }
    async fn cpu_percent(&self) -> Result<f64> {
        Ok(5.0)
    }
    async fn active_window_title(&self) -> Result<String> {
        Ok("Finder".into())
    }
}

/// Reports a long idle time but cannot read CPU or the focused window.
struct BlindSensors;

#[async_trait::async_trait]
impl SensorGateway for BlindSensors {
    async fn idle_seconds(&self) -> Result<f64> {
        Ok(10_000.0)
    }
    async fn cpu_percent(&self) -> Result<f64> {
        Err(Error::sensor("cpu counters unavailable"))
    }
    async fn active_window_title(&self) -> Result<String> {
        Err(Error::sensor("no display"))
    }
}

fn collaborators(sensors: Arc<dyn SensorGateway>) -> Collaborators {
    Collaborators {
        sensors,
        inference: CannedInference::new("thought"),
        knowledge: Arc::new(MemoryKnowledge::default()),
        briefing: Arc::new(Schedule(Some("nothing today"))),
        maintenance: Arc::new(NoopMaintenance),
        notifier: Arc::new(NoopNotifier),
    }
}

#[tokio::test]
async fn engine_dreams_and_stops_within_a_heartbeat() {
    let tmp = TempDir::new().unwrap();
    let mut config = scenario_config();
    config.heartbeat.interval_ms = 20;
    let sensors = Arc::new(SteadySensors { idle: Mutex::new(500.0) });

    let task = FixedTask::new("Curiosity", 1.0, Behavior::Reply("a thought"));
    let engine = Engine::with_tasks(
        config,
        collaborators(sensors.clone()),
        tmp.path(),
        one(&task),
        Some(Box::new(ScriptedDraws::new([0.5])) as Box<dyn DrawSource>),
    )
    .unwrap();
    let mut rx = engine.bus().subscribe_channel();
    let handle = engine.spawn();

    let mut state = handle.watch_state();
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == EngineState::Dreaming))
        .await
        .unwrap()
        .unwrap();

    *sensors.idle.lock().unwrap() = 0.0;
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == EngineState::Active))
        .await
        .unwrap()
        .unwrap();

    let bus = handle.bus().clone();
    tokio::time::timeout(Duration::from_secs(1), handle.stop()).await.unwrap();
    assert!(bus.is_closed());
    assert!(tmp.path().join(IDENTITY_FILE).exists());

    let mut seen = Vec::new();
    while let Some(event) = rx.recv().await {
        seen.push(event);
    }
    assert_eq!(count(&seen, "dream_start"), 1);
    assert_eq!(count(&seen, "dream_wake"), 1);

    // Nothing gets through once stopped.
    let mut late = bus.subscribe_channel();
    bus.publish(EngineEvent::DreamStart);
    assert!(late.recv().await.is_none());
}

#[tokio::test]
async fn engine_rejects_flapping_thresholds() {
    let tmp = TempDir::new().unwrap();
    let mut config = EngineConfig::default();
    config.thresholds.wake_idle_secs = config.thresholds.enter_idle_secs;
    let sensors = Arc::new(SteadySensors { idle: Mutex::new(0.0) });
    assert!(Engine::new(config, collaborators(sensors), tmp.path()).is_err());
}

#[tokio::test]
async fn unreadable_sensors_keep_engine_awake() {
    let tmp = TempDir::new().unwrap();
    let mut config = scenario_config();
    config.heartbeat.interval_ms = 10;
    let engine = Engine::new(config, collaborators(Arc::new(BlindSensors)), tmp.path()).unwrap();
    let mut rx = engine.bus().subscribe_channel();
    let handle = engine.spawn();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_ne!(handle.state(), EngineState::Dreaming);
    handle.stop().await;

    let mut seen = Vec::new();
    while let Some(event) = rx.recv().await {
        seen.push(event);
    }
    assert_eq!(count(&seen, "dream_start"), 0);
}
