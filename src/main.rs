//! reverie: a background presence that dreams while you are away
//!
//! Usage:
//!   reverie                  → run the engine (Ctrl-C to stop)
//!   reverie --json-events    → also print every engine event as a JSON line
//!   reverie status           → show the identity record
//!   reverie budget           → show spend against the budget
//!   reverie reset-budget     → zero the spend ledger
//!   reverie reset-identity   → forget level, XP and mood
//!   reverie dump-config      → print the default config as TOML

use clap::{Parser, Subcommand};
use reverie::{AgendaBriefing, DesktopNotifier, MarkdownVault, SystemSensors, VaultMaintenance};
use reverie_consciousness::{
    expand_tilde, BudgetLedger, Collaborators, Engine, EngineConfig, IdentityState, IDENTITY_FILE,
    LEDGER_FILE,
};
use reverie_llm::{GeminiProvider, HybridRouter, LlmProvider, OllamaProvider};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CONFIG_FILE: &str = "reverie.toml";

#[derive(Parser)]
#[command(
    name = "reverie",
    about = "Background presence agent: dreams while you are idle, briefs you when you return",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// State directory (or set REVERIE_HOME; default ~/.reverie)
    #[arg(long, global = true)]
    state_dir: Option<String>,

    /// Config file (default <state-dir>/reverie.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Print every engine event as one JSON line on stdout
    #[arg(long, default_value_t = false)]
    json_events: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine until interrupted
    Run,
    /// Show the identity record
    Status,
    /// Show cumulative spend against the budget
    Budget,
    /// Clear the persisted spend
    ResetBudget,
    /// Delete the identity record; defaults are recreated on next start
    ResetIdentity,
    /// Print the default config as TOML
    DumpConfig,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("reverie v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(Commands::DumpConfig) => {
            print!("{}", EngineConfig::default().to_toml());
            return Ok(());
        }
        _ => {}
    }

    let _guard = init_tracing(&cli)?;
    let state_dir = resolve_state_dir(cli.state_dir.as_deref());
    std::fs::create_dir_all(&state_dir)?;
    let config_path = cli
        .config
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(|| state_dir.join(CONFIG_FILE));
    let config = EngineConfig::load(&config_path);

    match cli.command {
        None | Some(Commands::Run) => run(&cli, config, &state_dir).await?,
        Some(Commands::Status) => {
            let identity = IdentityState::open(state_dir.join(IDENTITY_FILE), config.persist_timeout());
            let r = identity.record();
            println!("{} v{}", r.name, r.version);
            println!("Level {} ({} / {} XP)", r.level, r.xp, r.xp_to_next_level);
            println!("Mood: {} (valence {:.2}, arousal {:.2})", r.mood, r.valence, r.arousal);
            println!("Traits: {}", r.traits.join(", "));
        }
        Some(Commands::Budget) => {
            let ledger = open_ledger(&config, &state_dir);
            println!(
                "Spent ${:.4} of ${:.2} (${:.4} remaining)",
                ledger.current_spend(),
                ledger.daily_budget(),
                ledger.remaining()
            );
        }
        Some(Commands::ResetBudget) => {
            let mut ledger = open_ledger(&config, &state_dir);
            ledger.reset().await?;
            println!("Budget ledger reset to $0");
        }
        Some(Commands::ResetIdentity) => {
            let mut identity = IdentityState::open(state_dir.join(IDENTITY_FILE), config.persist_timeout());
            identity.reset().await?;
            println!("Identity cleared");
        }
        Some(Commands::Version) | Some(Commands::DumpConfig) => {}
    }

    Ok(())
}

fn init_tracing(cli: &Cli) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "reverie=info".into());
    let human = (!cli.json_logs).then(|| fmt::layer().with_writer(std::io::stderr));
    let json = cli.json_logs.then(|| fmt::layer().json().with_writer(std::io::stderr));

    let (file, guard) = match cli.log_file.as_deref().map(expand_tilde) {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir)?;
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("--log-file needs a file name"))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(human)
        .with(json)
        .with(file)
        .init();
    Ok(guard)
}

fn resolve_state_dir(flag: Option<&str>) -> PathBuf {
    flag.map(expand_tilde)
        .or_else(|| std::env::var("REVERIE_HOME").ok().map(|p| expand_tilde(&p)))
        .unwrap_or_else(|| expand_tilde("~/.reverie"))
}

fn open_ledger(config: &EngineConfig, state_dir: &Path) -> BudgetLedger {
    BudgetLedger::open(
        state_dir.join(LEDGER_FILE),
        config.budget.daily_budget_usd,
        config.budget.price_per_million_tokens,
        config.persist_timeout(),
    )
}

fn build_inference(config: &EngineConfig) -> HybridRouter {
    let local: Arc<dyn LlmProvider> =
        Arc::new(OllamaProvider::new(&config.llm.local_model).with_base_url(&config.llm.local_url));
    let cloud = GeminiProvider::from_env(&config.llm.cloud_model)
        .map(|p| Arc::new(p) as Arc<dyn LlmProvider>);
    if cloud.is_none() {
        info!("GEMINI_API_KEY not set, cloud inference disabled");
    }
    HybridRouter::new(cloud, Some(local), config.llm.max_tokens)
}

async fn run(cli: &Cli, config: EngineConfig, state_dir: &Path) -> anyhow::Result<()> {
    let vault = Arc::new(MarkdownVault::in_state_dir(state_dir));
    vault.init().await?;

    let collaborators = Collaborators {
        sensors: Arc::new(SystemSensors::new()),
        inference: Arc::new(build_inference(&config)),
        knowledge: vault.clone(),
        briefing: Arc::new(AgendaBriefing::in_state_dir(state_dir)),
        maintenance: Arc::new(VaultMaintenance::new(vault.clone())),
        notifier: Arc::new(DesktopNotifier::default()),
    };

    info!("State dir: {}", state_dir.display());
    let engine = Engine::new(config, collaborators, state_dir)?;

    let printer = cli.json_events.then(|| {
        engine.bus().subscribe(|event| match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Could not encode event: {}", e),
        })
    });

    let handle = engine.spawn();
    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, stopping");
    handle.stop().await;

    if let Some(printer) = printer {
        // Drains whatever was queued before the bus closed.
        let _ = printer.await;
    }
    Ok(())
}
