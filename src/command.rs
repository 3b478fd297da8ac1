use reverie_core::{Error, Result};
use tokio::process::Command;

/// Run a helper program and return its trimmed stdout.
pub(crate) async fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::sensor(format!("{program} exec failed: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::sensor(format!("{program} error: {}", stderr.trim())))
    }
}
