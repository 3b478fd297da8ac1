//! Reverie LLM - Local and cloud text generation behind one router

pub mod gemini;
pub mod ollama;
pub mod provider;
pub mod router;

pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use provider::{LlmError, LlmProvider, LlmResult};
pub use router::{classify_complexity, HybridRouter};
