//! HybridRouter: picks local or cloud per prompt
//!
//! Cheap prompts stay on the local model; long or analytical ones go to the
//! cloud when a key is configured. Implements the core `InferenceProvider`.

use crate::provider::LlmProvider;
use reverie_core::{Error, InferenceMode, InferenceProvider, Result};
use std::sync::Arc;
use tracing::{info, warn};

const COMPLEX_KEYWORDS: [&str; 9] = [
    "analyze",
    "explain",
    "complex",
    "detailed",
    "research",
    "comprehensive",
    "elaborate",
    "philosophy",
    "nuanced",
];

const SIMPLE_KEYWORDS: [&str; 6] = ["what is", "define", "list", "short", "brief", "quick"];

/// Prompts longer than this always count as complex.
const LONG_PROMPT_CHARS: usize = 200;

/// Resolve `Auto` into `Smart` or `Simple` for this prompt.
pub fn classify_complexity(prompt: &str) -> InferenceMode {
    if prompt.chars().count() > LONG_PROMPT_CHARS {
        return InferenceMode::Smart;
    }
    let lower = prompt.to_lowercase();
    let has_complex = COMPLEX_KEYWORDS.iter().any(|k| lower.contains(k));
    let has_simple = SIMPLE_KEYWORDS.iter().any(|k| lower.contains(k));
    if has_complex && !has_simple {
        InferenceMode::Smart
    } else {
        InferenceMode::Simple
    }
}

pub struct HybridRouter {
    cloud: Option<Arc<dyn LlmProvider>>,
    local: Option<Arc<dyn LlmProvider>>,
    max_tokens: u32,
}

impl HybridRouter {
    pub fn new(
        cloud: Option<Arc<dyn LlmProvider>>,
        local: Option<Arc<dyn LlmProvider>>,
        max_tokens: u32,
    ) -> Self {
        info!(
            "Hybrid router: cloud={} local={}",
            cloud.as_ref().map(|p| p.model()).unwrap_or("-"),
            local.as_ref().map(|p| p.model()).unwrap_or("-"),
        );
        Self { cloud, local, max_tokens }
    }

    /// Backend that would serve `prompt` in `mode`, without calling it.
    pub fn route(&self, prompt: &str, mode: InferenceMode) -> Option<&Arc<dyn LlmProvider>> {
        let complexity = match mode {
            InferenceMode::Auto => classify_complexity(prompt),
            other => other,
        };
        if complexity == InferenceMode::Smart {
            if let Some(cloud) = &self.cloud {
                return Some(cloud);
            }
        }
        self.local.as_ref().or(self.cloud.as_ref())
    }
}

#[async_trait::async_trait]
impl InferenceProvider for HybridRouter {
    async fn generate(&self, prompt: &str, mode: InferenceMode) -> Result<String> {
        let provider = self
            .route(prompt, mode)
            .ok_or_else(|| Error::Inference("no LLM backend available".into()))?;
        info!("Routing {} prompt to {}", mode, provider.name());
        provider.complete(prompt, self.max_tokens).await.map_err(|e| {
            warn!("{} generation failed: {}", provider.name(), e);
            e.into()
        })
    }
}
