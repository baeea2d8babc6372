//! Token and cost accounting per task.
//!
//! Costs use [`Decimal`] -- no floating-point drift in the running
//! totals. Prices are configured per million tokens; backends that do
//! not report usage simply record zero-token calls, which still show up
//! in the call counts.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

/// Running totals for one task name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCost {
    /// Number of calls made.
    pub calls: u64,
    /// Prompt tokens reported by the backend.
    pub prompt_tokens: u64,
    /// Completion tokens reported by the backend.
    pub completion_tokens: u64,
    /// Accumulated cost.
    pub cost: Decimal,
}

/// Per-task cost accounting.
#[derive(Debug, Clone)]
pub struct CostTracker {
    /// Price per million prompt tokens.
    prompt_price: Decimal,
    /// Price per million completion tokens.
    completion_price: Decimal,
    totals: BTreeMap<String, TaskCost>,
}

impl CostTracker {
    /// Create a tracker with prices per million tokens.
    pub const fn new(prompt_price: Decimal, completion_price: Decimal) -> Self {
        Self {
            prompt_price,
            completion_price,
            totals: BTreeMap::new(),
        }
    }

    /// Record one call's token usage for a task.
    pub fn record(&mut self, task: &str, prompt_tokens: u64, completion_tokens: u64) {
        let entry = self.totals.entry(task.to_owned()).or_default();
        entry.calls = entry.calls.saturating_add(1);
        entry.prompt_tokens = entry.prompt_tokens.saturating_add(prompt_tokens);
        entry.completion_tokens = entry.completion_tokens.saturating_add(completion_tokens);

        let million = Decimal::from(1_000_000_u64);
        let prompt_cost = self.prompt_price * Decimal::from(prompt_tokens) / million;
        let completion_cost = self.completion_price * Decimal::from(completion_tokens) / million;
        entry.cost += prompt_cost + completion_cost;
    }

    /// Totals for one task, if it was ever recorded.
    pub fn task(&self, task: &str) -> Option<&TaskCost> {
        self.totals.get(task)
    }

    /// Total accumulated cost across all tasks.
    pub fn total_cost(&self) -> Decimal {
        self.totals.values().map(|t| t.cost).sum()
    }

    /// Total calls across all tasks.
    pub fn total_calls(&self) -> u64 {
        self.totals.values().map(|t| t.calls).fold(0, u64::saturating_add)
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new(Decimal::ZERO, Decimal::ZERO)
    }
}
