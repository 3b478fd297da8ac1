//! Dream tasks: the fixed registry of background work run while idle
//!
//! Each task returns `Ok(text)` on success. An empty string means "ran, but
//! produced nothing worth rewarding"; only non-empty results earn XP.

use crate::config::EngineConfig;
use crate::ledger::SafetyGuard;
use rand::seq::SliceRandom;
use reverie_core::{Error, InferenceMode, InferenceProvider, KnowledgeStore, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// A weighted background task. Configuration is immutable once built.
#[async_trait::async_trait]
pub trait DreamTask: Send + Sync {
    fn name(&self) -> &str;

    /// Selection weight; the registry's weights sum to 1.0.
    fn weight(&self) -> f64;

    /// Tokens charged to the ledger before the task may run.
    fn estimated_tokens(&self) -> u64;

    /// XP granted on a non-empty result.
    fn xp_reward(&self) -> u64;

    async fn run(&self) -> Result<String>;
}

/// Best-effort episode logging: a memory failure never fails the task.
async fn record_episode(knowledge: &dyn KnowledgeStore, source: &str, text: &str) {
    if let Err(e) = knowledge.log_episode(source, text).await {
        warn!("Could not record {} episode: {}", source, e);
    }
}

// ============================================================
// Librarian
// ============================================================

/// Looks at a cluttered folder and proposes (never performs) a tidy-up.
pub struct Librarian {
    dir: PathBuf,
    inference: Arc<dyn InferenceProvider>,
    knowledge: Arc<dyn KnowledgeStore>,
    guard: SafetyGuard,
}

impl Librarian {
    pub const NAME: &'static str = "Librarian";

    pub fn new(
        dir: PathBuf,
        inference: Arc<dyn InferenceProvider>,
        knowledge: Arc<dyn KnowledgeStore>,
        guard: SafetyGuard,
    ) -> Self {
        Self { dir, inference, knowledge, guard }
    }

    async fn list_files(&self) -> Vec<String> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) => {
                info!("Librarian: cannot read {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };
        let mut files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        files.sort();
        files
    }
}

#[async_trait::async_trait]
impl DreamTask for Librarian {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn weight(&self) -> f64 {
        0.3
    }

    fn estimated_tokens(&self) -> u64 {
        500
    }

    fn xp_reward(&self) -> u64 {
        5
    }

    async fn run(&self) -> Result<String> {
        let files = self.list_files().await;
        if files.is_empty() {
            info!("Librarian: nothing to organize in {}", self.dir.display());
            return Ok(String::new());
        }
        info!("Librarian: scanning {} files in {}", files.len(), self.dir.display());

        let prompt = format!(
            "I have a folder with these files: {}.\n\
             Based on these filenames, propose a folder structure to organize them.\n\
             Do NOT move them. Just propose the plan in 1 short sentence format like:\n\
             \"Proposed: Move [file] to [Folder], [file] to [Folder]\".\n\
             Keep it simple.",
            files.join(", ")
        );
        let proposal = self.inference.generate(&prompt, InferenceMode::Simple).await?;
        let proposal = proposal.trim().to_string();

        if !self.guard.validate(&proposal) {
            return Err(Error::task(Self::NAME, "proposal blocked by safety guard"));
        }

        record_episode(
            self.knowledge.as_ref(),
            "LIBRARIAN",
            &format!("Observed mess in {}. Proposal: {}", self.dir.display(), proposal),
        )
        .await;

        if proposal.contains("Proposed:") {
            Ok(proposal)
        } else {
            Ok(String::new())
        }
    }
}

// ============================================================
// Reflection
// ============================================================

/// Reads recent memories and distills one insight.
pub struct Reflection {
    inference: Arc<dyn InferenceProvider>,
    knowledge: Arc<dyn KnowledgeStore>,
}

impl Reflection {
    pub const NAME: &'static str = "Reflection";
    const RECALL_QUERY: &'static str = "recent interactions or journal entries";

    pub fn new(inference: Arc<dyn InferenceProvider>, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        Self { inference, knowledge }
    }
}

#[async_trait::async_trait]
impl DreamTask for Reflection {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn weight(&self) -> f64 {
        0.2
    }

    fn estimated_tokens(&self) -> u64 {
        1_000
    }

    fn xp_reward(&self) -> u64 {
        15
    }

    async fn run(&self) -> Result<String> {
        let recent = self.knowledge.recall(Self::RECALL_QUERY).await?;
        if recent.trim().is_empty() {
            info!("Reflection: no memories to reflect on");
            return Ok(String::new());
        }

        let prompt = format!(
            "You are an AI assistant reflecting on your recent performance.\n\
             Here are your recent memory logs:\n{}\n\n\
             Based on this, what is ONE key insight about the user or your own behavior?\n\
             Answer in 1 sentence. Start with \"Insight:\".",
            recent.trim()
        );
        let insight = self.inference.generate(&prompt, InferenceMode::Auto).await?;
        let insight = insight.trim().to_string();
        if !insight.is_empty() {
            record_episode(self.knowledge.as_ref(), "REFLECTION", &insight).await;
        }
        Ok(insight)
    }
}

// ============================================================
// Curiosity
// ============================================================

/// Wanders to a random topic and writes a short thought about it.
pub struct Curiosity {
    topics: Vec<String>,
    inference: Arc<dyn InferenceProvider>,
    knowledge: Arc<dyn KnowledgeStore>,
}

impl Curiosity {
    pub const NAME: &'static str = "Curiosity";

    pub fn new(
        topics: Vec<String>,
        inference: Arc<dyn InferenceProvider>,
        knowledge: Arc<dyn KnowledgeStore>,
    ) -> Self {
        Self { topics, inference, knowledge }
    }

    fn pick_topic(&self) -> Option<String> {
        self.topics.choose(&mut rand::thread_rng()).cloned()
    }
}

#[async_trait::async_trait]
impl DreamTask for Curiosity {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn weight(&self) -> f64 {
        0.5
    }

    fn estimated_tokens(&self) -> u64 {
        300
    }

    fn xp_reward(&self) -> u64 {
        10
    }

    async fn run(&self) -> Result<String> {
        let Some(topic) = self.pick_topic() else {
            return Ok(String::new());
        };
        info!("Dreaming: wandering thought '{}'", topic);

        let prompt = format!(
            "Write a short, insightful thought (2 sentences) about: {}. Be philosophical yet technical.",
            topic
        );
        let thought = self.inference.generate(&prompt, InferenceMode::Auto).await?;
        let thought = thought.trim().to_string();
        if !thought.is_empty() {
            record_episode(
                self.knowledge.as_ref(),
                "SUBCONSCIOUS",
                &format!("Dreamt about '{}': {}", topic, thought),
            )
            .await;
        }
        Ok(thought)
    }
}

/// The fixed registry, in selection order: Librarian, Reflection, Curiosity.
pub fn default_tasks(
    config: &EngineConfig,
    inference: Arc<dyn InferenceProvider>,
    knowledge: Arc<dyn KnowledgeStore>,
) -> Vec<Arc<dyn DreamTask>> {
    vec![
        Arc::new(Librarian::new(
            config.librarian_dir(),
            inference.clone(),
            knowledge.clone(),
            SafetyGuard::default(),
        )),
        Arc::new(Reflection::new(inference.clone(), knowledge.clone())),
        Arc::new(Curiosity::new(config.dream.curiosity_topics.clone(), inference, knowledge)),
    ]
}
