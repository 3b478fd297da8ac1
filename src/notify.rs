//! DesktopNotifier: `notify-send` on Linux, `osascript` on macOS

use crate::command;
use reverie_core::{Error, NotifierHook, Result};
use tracing::info;

pub struct DesktopNotifier {
    os: &'static str,
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self { os: std::env::consts::OS }
    }
}

/// AppleScript string literal body.
fn applescript_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait::async_trait]
impl NotifierHook for DesktopNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        let sent = match self.os {
            "linux" => command::run("notify-send", &[title, message]).await.map(|_| ()),
            "macos" => {
                let script = format!(
                    "display notification \"{}\" with title \"{}\"",
                    applescript_escape(message),
                    applescript_escape(title)
                );
                command::run("osascript", &["-e", &script]).await.map(|_| ())
            }
            _ => Ok(()),
        };
        sent.map_err(|e| Error::hook("notifier", e.to_string()))?;
        info!("Notified: {}", title);
        Ok(())
    }
}
