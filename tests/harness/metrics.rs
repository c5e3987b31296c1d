// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Outcome collection for abuse simulation.

use std::collections::HashMap;

/// Gate outcome for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Admitted,
    Limited,
}

/// Collects outcomes during a simulation.
#[derive(Debug, Default)]
pub struct SimulationMetrics {
    outcomes: HashMap<Outcome, usize>,
    requests_per_identity: HashMap<String, usize>,
    /// Retry hints handed out, in seconds
    retry_hints: Vec<u64>,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admitted(&mut self, identity: &str) {
        self.record(Outcome::Admitted, identity);
    }

    pub fn limited(&mut self, identity: &str, retry_after_secs: u64) {
        self.record(Outcome::Limited, identity);
        self.retry_hints.push(retry_after_secs);
    }

    fn record(&mut self, outcome: Outcome, identity: &str) {
        *self.outcomes.entry(outcome).or_insert(0) += 1;
        *self.requests_per_identity.entry(identity.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.outcomes.values().sum()
    }

    /// Ratio of limited to total requests.
    pub fn block_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        self.count(Outcome::Limited) as f64 / total as f64
    }

    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            total_requests: self.total_requests(),
            admitted: self.count(Outcome::Admitted),
            limited: self.count(Outcome::Limited),
            block_rate: self.block_rate(),
            unique_identities: self.requests_per_identity.len(),
            max_retry_after_secs: self.retry_hints.iter().copied().max().unwrap_or(0),
        }
    }
}

/// Summary of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub total_requests: usize,
    pub admitted: usize,
    pub limited: usize,
    pub block_rate: f64,
    pub unique_identities: usize,
    pub max_retry_after_secs: u64,
}

impl std::fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Abuse Simulation Report ===")?;
        writeln!(f, "Total Requests:    {}", self.total_requests)?;
        writeln!(f, "Admitted:          {}", self.admitted)?;
        writeln!(f, "Limited:           {}", self.limited)?;
        writeln!(f, "Block Rate:        {:.1}%", self.block_rate * 100.0)?;
        writeln!(f, "Unique Identities: {}", self.unique_identities)?;
        writeln!(f, "Max Retry-After:   {} s", self.max_retry_after_secs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_rate() {
        let mut metrics = SimulationMetrics::new();
        for _ in 0..3 {
            metrics.admitted("ip:10.0.0.1");
        }
        for _ in 0..7 {
            metrics.limited("ip:10.0.0.1", 42);
        }

        let report = metrics.report();
        assert!((report.block_rate - 0.7).abs() < 0.01);
        assert_eq!(report.unique_identities, 1);
        assert_eq!(report.max_retry_after_secs, 42);
    }
}
