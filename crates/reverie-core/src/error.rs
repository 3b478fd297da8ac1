//! Error types for Reverie
//!
//! None of these are fatal to the control loop. The engine logs them and
//! applies the documented fallback for each kind.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("sensor error: {0}")]
    Sensor(String),

    #[error("task error: {task} - {message}")]
    TaskExecution { task: String, message: String },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("knowledge store error: {0}")]
    Knowledge(String),

    #[error("briefing error: {0}")]
    Briefing(String),

    #[error("hook error: {hook} - {message}")]
    Hook { hook: String, message: String },

    #[error("timed out after {secs:.1}s: {what}")]
    Timeout { what: String, secs: f64 },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn sensor(message: impl Into<String>) -> Self {
        Self::Sensor(message.into())
    }

    pub fn task(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TaskExecution {
            task: task.into(),
            message: message.into(),
        }
    }

    pub fn hook(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hook {
            hook: hook.into(),
            message: message.into(),
        }
    }

    pub fn timeout(what: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            secs: duration.as_secs_f64(),
        }
    }

    /// Whether this error came from a collaborator exceeding its time bound.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
