//! BudgetLedger: persistent spend accounting that gates every dream task
//!
//! Spend is charged before the verdict, so a denied request still counts.
//! Nothing resets the total except an explicit `reset()`.

use crate::persist::JsonStore;
use reverie_core::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LEDGER_FILE: &str = "safety_ledger.json";

/// On-disk ledger record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub current_spend: f64,
}

/// Verdict for one spend request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub allowed: bool,
    /// Estimated cost charged by this request.
    pub cost_usd: f64,
    /// Cumulative spend after the charge.
    pub cumulative_usd: f64,
}

pub struct BudgetLedger {
    record: LedgerRecord,
    daily_budget_usd: f64,
    price_per_million_tokens: f64,
    store: JsonStore<LedgerRecord>,
}

impl BudgetLedger {
    pub fn new(
        path: impl Into<PathBuf>,
        daily_budget_usd: f64,
        price_per_million_tokens: f64,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            record: LedgerRecord::default(),
            daily_budget_usd,
            price_per_million_tokens,
            store: JsonStore::new(path, persist_timeout),
        }
    }

    /// Load the persisted spend. Missing or corrupt files start from zero.
    pub fn open(
        path: impl Into<PathBuf>,
        daily_budget_usd: f64,
        price_per_million_tokens: f64,
        persist_timeout: Duration,
    ) -> Self {
        let mut ledger = Self::new(path, daily_budget_usd, price_per_million_tokens, persist_timeout);
        match ledger.store.load() {
            Ok(Some(record)) => {
                ledger.record.current_spend = sanitize_spend(record.current_spend);
                info!("Ledger loaded: ${:.4} spent", ledger.record.current_spend);
            }
            Ok(None) => info!("No ledger at {}, starting at $0", ledger.store.path().display()),
            Err(e) => warn!("{}; starting ledger at $0", e),
        }
        ledger
    }

    pub fn current_spend(&self) -> f64 {
        self.record.current_spend
    }

    pub fn daily_budget(&self) -> f64 {
        self.daily_budget_usd
    }

    pub fn remaining(&self) -> f64 {
        (self.daily_budget_usd - self.record.current_spend).max(0.0)
    }

    /// Estimated dollar cost of `tokens`.
    pub fn estimate_cost(&self, tokens: u64) -> f64 {
        tokens as f64 / 1_000_000.0 * self.price_per_million_tokens
    }

    /// Charge the estimate, persist, then decide.
    ///
    /// A persistence failure does not change the verdict: the in-memory total
    /// stays authoritative and is written again on the next call.
    pub async fn admit(&mut self, estimated_tokens: u64) -> Admission {
        let cost = self.estimate_cost(estimated_tokens);
        self.record.current_spend += cost;
        if let Err(e) = self.store.save(&self.record).await {
            debug!("Spend ${:.4} held in memory: {}", self.record.current_spend, e);
        }

        let allowed = self.record.current_spend <= self.daily_budget_usd;
        if !allowed {
            warn!(
                "Budget exceeded: ${:.4} / ${:.2}",
                self.record.current_spend, self.daily_budget_usd
            );
        }
        Admission {
            allowed,
            cost_usd: cost,
            cumulative_usd: self.record.current_spend,
        }
    }

    /// External reset: the only way the total returns to zero.
    pub async fn reset(&mut self) -> Result<()> {
        info!("Ledger reset (was ${:.4})", self.record.current_spend);
        self.record.current_spend = 0.0;
        self.store.save(&self.record).await
    }
}

fn sanitize_spend(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

const BANNED_PHRASES: [&str; 3] = ["delete system", "rm -rf", "format drive"];

/// Keyword screen for actions proposed by background tasks.
#[derive(Debug, Clone)]
pub struct SafetyGuard {
    banned: Vec<String>,
}

impl Default for SafetyGuard {
    fn default() -> Self {
        Self { banned: BANNED_PHRASES.iter().map(|s| s.to_string()).collect() }
    }
}

impl SafetyGuard {
    pub fn with_phrases(phrases: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { banned: phrases.into_iter().map(|p| p.into().to_lowercase()).collect() }
    }

    /// Whether `action` is free of banned phrases.
    pub fn validate(&self, action: &str) -> bool {
        let lower = action.to_lowercase();
        match self.banned.iter().find(|p| lower.contains(p.as_str())) {
            Some(phrase) => {
                warn!("Blocked action (matched '{}'): {}", phrase, action);
                false
            }
            None => true,
        }
    }
}
