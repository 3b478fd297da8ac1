//! MarkdownVault: an Obsidian-style knowledge graph on disk
//!
//! ```text
//! knowledge_graph/
//!   concepts/<name>.md     front matter + body + [[wikilinks]]
//!   logs/YYYY-MM-DD.md     one "- HH:MM:SS [SOURCE] text" line per episode
//!   assets/
//! ```

use chrono::Local;
use reverie_core::{Error, KnowledgeStore, MaintenanceHook, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub const VAULT_DIR: &str = "knowledge_graph";

/// Episode lines returned by `recall`.
const RECENT_EPISODES: usize = 10;

const UNSAFE_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// File stem for a concept name.
pub fn sanitize_concept_name(name: &str) -> String {
    name.trim().replace(UNSAFE_CHARS, "_")
}

fn knowledge_err(context: &str, e: std::io::Error) -> Error {
    Error::Knowledge(format!("{context}: {e}"))
}

/// Counts reported by maintenance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VaultStats {
    pub concepts: usize,
    pub logs: usize,
    pub assets: usize,
}

pub struct MarkdownVault {
    root: PathBuf,
}

impl MarkdownVault {
    /// Vault rooted at `<state_dir>/knowledge_graph`.
    pub fn in_state_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(VAULT_DIR))
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn concepts_dir(&self) -> PathBuf {
        self.root.join("concepts")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join("assets")
    }

    /// Create the directory layout.
    pub async fn init(&self) -> Result<()> {
        for dir in [self.concepts_dir(), self.logs_dir(), self.assets_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| knowledge_err(&dir.display().to_string(), e))?;
        }
        debug!("Vault ready at {}", self.root.display());
        Ok(())
    }

    pub async fn concept(&self, name: &str) -> Option<String> {
        let path = self.concepts_dir().join(format!("{}.md", sanitize_concept_name(name)));
        tokio::fs::read_to_string(path).await.ok()
    }

    pub async fn stats(&self) -> Result<VaultStats> {
        Ok(VaultStats {
            concepts: count_files(&self.concepts_dir(), Some("md")).await?,
            logs: count_files(&self.logs_dir(), Some("md")).await?,
            assets: count_files(&self.assets_dir(), None).await?,
        })
    }

    async fn concept_matches(&self, query: &str) -> Result<Vec<String>> {
        let needle = query.to_lowercase();
        let mut matches = Vec::new();
        for path in list_files(&self.concepts_dir(), Some("md")).await? {
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            if stem.to_lowercase().contains(&needle) {
                matches.push(stem);
                continue;
            }
            if let Ok(content) = tokio::fs::read_to_string(&path).await {
                if content.to_lowercase().contains(&needle) {
                    matches.push(stem);
                }
            }
        }
        matches.sort();
        Ok(matches)
    }

    /// Last `limit` episode lines across the newest daily logs.
    async fn recent_episodes(&self, limit: usize) -> Result<Vec<String>> {
        let mut logs = list_files(&self.logs_dir(), Some("md")).await?;
        // YYYY-MM-DD names sort chronologically.
        logs.sort();
        let mut lines = Vec::new();
        for path in logs.iter().rev() {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| knowledge_err(&path.display().to_string(), e))?;
            let mut day: Vec<String> = content
                .lines()
                .filter(|l| l.starts_with("- "))
                .map(String::from)
                .collect();
            day.extend(lines);
            lines = day;
            if lines.len() >= limit {
                break;
            }
        }
        let skip = lines.len().saturating_sub(limit);
        Ok(lines.into_iter().skip(skip).collect())
    }
}

async fn list_files(dir: &Path, extension: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(knowledge_err(&dir.display().to_string(), e)),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| knowledge_err(&dir.display().to_string(), e))?
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let wanted = match extension {
            Some(ext) => path.extension().is_some_and(|e| e == ext),
            None => true,
        };
        if wanted {
            files.push(path);
        }
    }
    Ok(files)
}

async fn count_files(dir: &Path, extension: Option<&str>) -> Result<usize> {
    Ok(list_files(dir, extension).await?.len())
}

#[async_trait::async_trait]
impl KnowledgeStore for MarkdownVault {
    async fn log_episode(&self, source: &str, text: &str) -> Result<()> {
        let now = Local::now();
        let day = now.format("%Y-%m-%d").to_string();
        let dir = self.logs_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| knowledge_err("create logs dir", e))?;

        let path = dir.join(format!("{day}.md"));
        let fresh = !path.exists();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| knowledge_err(&path.display().to_string(), e))?;

        let mut entry = String::new();
        if fresh {
            entry.push_str(&format!("# Daily Log: {day}\n\n"));
        }
        let flat = text.replace('\n', " ");
        entry.push_str(&format!("- {} [{}] {}\n", now.format("%H:%M:%S"), source, flat.trim()));
        file.write_all(entry.as_bytes())
            .await
            .map_err(|e| knowledge_err("append episode", e))?;
        file.flush().await.map_err(|e| knowledge_err("flush episode", e))?;
        Ok(())
    }

    async fn recall(&self, query: &str) -> Result<String> {
        let concepts = self.concept_matches(query).await?;
        let episodes = self.recent_episodes(RECENT_EPISODES).await?;

        let mut out = String::new();
        if !concepts.is_empty() {
            out.push_str(&format!("Related concepts: {}\n", concepts.join(", ")));
        }
        if !episodes.is_empty() {
            out.push_str("Recent episodes:\n");
            out.push_str(&episodes.join("\n"));
            out.push('\n');
        }
        Ok(out)
    }

    async fn learn(&self, name: &str, content: &str, links: &[String]) -> Result<()> {
        let dir = self.concepts_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| knowledge_err("create concepts dir", e))?;

        let mut body = format!(
            "---\ncreated: {}\ntags: [concept]\n---\n\n{}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            content
        );
        if !links.is_empty() {
            body.push_str("\n\n## Related Concepts\n");
            for link in links {
                body.push_str(&format!("- [[{link}]]\n"));
            }
        }

        let path = dir.join(format!("{}.md", sanitize_concept_name(name)));
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| knowledge_err(&path.display().to_string(), e))?;
        info!("Learned: {}", name);
        Ok(())
    }
}

/// Hourly "organizing memories" pass over the vault.
pub struct VaultMaintenance {
    vault: Arc<MarkdownVault>,
}

impl VaultMaintenance {
    pub fn new(vault: Arc<MarkdownVault>) -> Self {
        Self { vault }
    }
}

#[async_trait::async_trait]
impl MaintenanceHook for VaultMaintenance {
    async fn run(&self) -> Result<()> {
        self.vault.init().await?;
        let stats = self.vault.stats().await?;
        info!(
            "Organizing memories: {} concepts, {} daily logs, {} assets",
            stats.concepts, stats.logs, stats.assets
        );
        Ok(())
    }
}
