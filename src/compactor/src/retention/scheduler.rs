//! Per-table trim frequency throttling.
//!
//! Large, cold tables do not need to be scanned every time the chain
//! advances. A table with multiplier `n` is trimmed on every `n`-th
//! opportunity; skipped opportunities only delay reclamation.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct TrimScheduler {
    multipliers: HashMap<String, u32>,
    counters: HashMap<String, u32>,
}

impl TrimScheduler {
    pub fn new(multipliers: HashMap<String, u32>) -> Self {
        Self {
            multipliers,
            counters: HashMap::new(),
        }
    }

    /// Multiplier for a table, 1 when not configured.
    pub fn multiplier(&self, table: &str) -> u32 {
        self.multipliers.get(table).copied().unwrap_or(1).max(1)
    }

    /// Count one opportunity for `table` and report whether it should run now.
    pub fn should_run(&mut self, table: &str) -> bool {
        let multiplier = self.multiplier(table);
        let counter = self.counters.entry(table.to_string()).or_insert(0);
        *counter += 1;
        if *counter >= multiplier {
            *counter = 0;
            true
        } else {
            false
        }
    }
}
