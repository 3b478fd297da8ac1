//! Sensor sampling that fails toward "user present"
//!
//! Every probe is bounded by the sensor timeout. If idle, cpu or window
//! cannot be read, the whole reading falls back to "not idle, nominal load"
//! so the engine stays ACTIVE. The phase falls back to the local clock.

use reverie_core::{Result, SensorGateway, SensorReading, TimePhase};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

async fn probe<T>(what: &str, timeout: Duration, fut: impl Future<Output = Result<T>>) -> Option<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!("Sensor {} failed: {}", what, e);
            None
        }
        Err(_) => {
            warn!("Sensor {} timed out after {:?}", what, timeout);
            None
        }
    }
}

/// Sample all four fields. Never fails.
pub async fn read_sensors(gateway: &dyn SensorGateway, timeout: Duration) -> SensorReading {
    let idle = probe("idle", timeout, gateway.idle_seconds()).await;
    let cpu = probe("cpu", timeout, gateway.cpu_percent()).await;
    let window = probe("window", timeout, gateway.active_window_title()).await;
    let phase = probe("phase", timeout, gateway.time_phase())
        .await
        .unwrap_or_else(TimePhase::now);

    match (idle, cpu, window) {
        (Some(idle), Some(cpu), Some(window)) if idle.is_finite() && cpu.is_finite() => {
            SensorReading::new(idle, cpu, window, phase)
        }
        _ => {
            debug!("Incomplete sensor reading; treating user as present");
            SensorReading::fallback(phase)
        }
    }
}
