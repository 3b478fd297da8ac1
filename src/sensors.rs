//! Workstation sensors backed by platform helper programs
//!
//! Linux: `xprintidle`, `xdotool` and `/proc/stat`. macOS: `ioreg`,
//! `osascript` and `ps`. Anything else reports a sensor error and the engine
//! falls back to its defaults.

use crate::command;
use reverie_core::{Error, Result, SensorGateway};
use std::time::Duration;

const CPU_SAMPLE: Duration = Duration::from_millis(250);

pub struct SystemSensors {
    os: &'static str,
    cpu_sample: Duration,
}

impl Default for SystemSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSensors {
    pub fn new() -> Self {
        Self { os: std::env::consts::OS, cpu_sample: CPU_SAMPLE }
    }

    fn unsupported(&self, what: &str) -> Error {
        Error::sensor(format!("{} not supported on {}", what, self.os))
    }
}

#[async_trait::async_trait]
impl SensorGateway for SystemSensors {
    async fn idle_seconds(&self) -> Result<f64> {
        match self.os {
            "linux" => {
                let ms = command::run("xprintidle", &[]).await?;
                parse_number(&ms).map(|ms| ms / 1000.0)
            }
            "macos" => {
                let out = command::run("ioreg", &["-c", "IOHIDSystem"]).await?;
                parse_hid_idle_ns(&out).map(|ns| ns / 1_000_000_000.0)
            }
            _ => Err(self.unsupported("idle time")),
        }
    }

    async fn cpu_percent(&self) -> Result<f64> {
        match self.os {
            "linux" => {
                let first = read_proc_stat().await?;
                tokio::time::sleep(self.cpu_sample).await;
                let second = read_proc_stat().await?;
                Ok(first.busy_percent_until(&second))
            }
            "macos" => {
                let out = command::run("ps", &["-A", "-o", "%cpu"]).await?;
                let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
                Ok(sum_ps_column(&out) / cores as f64)
            }
            _ => Err(self.unsupported("cpu load")),
        }
    }

    async fn active_window_title(&self) -> Result<String> {
        match self.os {
            "linux" => command::run("xdotool", &["getactivewindow", "getwindowname"]).await,
            "macos" => {
                command::run(
                    "osascript",
                    &[
                        "-e",
                        "tell application \"System Events\" to get name of first application process whose frontmost is true",
                    ],
                )
                .await
            }
            _ => Err(self.unsupported("active window")),
        }
    }
}

fn parse_number(text: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| Error::sensor(format!("not a number: '{}'", text.trim())))
}

/// `"HIDIdleTime" = 1234567890` from `ioreg` output, in nanoseconds.
fn parse_hid_idle_ns(ioreg: &str) -> Result<f64> {
    let line = ioreg
        .lines()
        .find(|l| l.contains("HIDIdleTime"))
        .ok_or_else(|| Error::sensor("HIDIdleTime missing from ioreg output"))?;
    let value = line.rsplit(['=', ' ']).next().unwrap_or_default();
    parse_number(value)
}

fn sum_ps_column(ps: &str) -> f64 {
    ps.lines().skip(1).filter_map(|l| l.trim().parse::<f64>().ok()).sum()
}

/// Aggregate jiffies from the `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

impl CpuTimes {
    fn parse(stat: &str) -> Result<Self> {
        let line = stat
            .lines()
            .find(|l| l.starts_with("cpu "))
            .ok_or_else(|| Error::sensor("no aggregate cpu line in /proc/stat"))?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 4 {
            return Err(Error::sensor("short cpu line in /proc/stat"));
        }
        // idle + iowait
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        Ok(Self { idle, total: fields.iter().sum() })
    }

    fn busy_percent_until(&self, later: &CpuTimes) -> f64 {
        let total = later.total.saturating_sub(self.total);
        if total == 0 {
            return 0.0;
        }
        let idle = later.idle.saturating_sub(self.idle);
        (total.saturating_sub(idle) as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

async fn read_proc_stat() -> Result<CpuTimes> {
    let stat = tokio::fs::read_to_string("/proc/stat")
        .await
        .map_err(|e| Error::sensor(format!("/proc/stat: {e}")))?;
    CpuTimes::parse(&stat)
}
