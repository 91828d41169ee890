use crate::balance::BalanceStrategyKind;
use crate::core::{TraceEvent, WorkerFailure};
use crate::execution::ExecutionKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Correct,
    RaceObserved,
    Failed,
}

impl Classification {
    /// Any worker failure wins over a balance comparison.
    pub fn classify(expected: i64, final_balance: i64, failures: &[WorkerFailure]) -> Self {
        if !failures.is_empty() {
            Self::Failed
        } else if final_balance == expected {
            Self::Correct
        } else {
            Self::RaceObserved
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Correct => "CORRECT",
            Self::RaceObserved => "RACE_OBSERVED",
            Self::Failed => "FAILED",
        })
    }
}

/// Outcome of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// 0 is the sequential baseline
    pub index: usize,
    pub execution: ExecutionKind,
    pub balance: BalanceStrategyKind,
    pub workers: usize,
    pub amount: i64,
    pub expected: i64,
    pub final_balance: i64,
    pub entries_count: u64,
    pub entries_sum: i64,
    pub trace: Vec<TraceEvent>,
    pub classification: Classification,
    pub failures: Vec<WorkerFailure>,
    pub elapsed: Duration,
}

impl TrialResult {
    pub fn is_baseline(&self) -> bool {
        self.index == 0
    }

    /// Balance missing relative to the ledger.
    pub fn lost(&self) -> i64 {
        self.entries_sum - self.final_balance
    }

    pub fn has_partial_operation(&self) -> bool {
        self.failures.iter().any(|failure| failure.error.is_partial())
    }
}

impl fmt::Display for TrialResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.is_baseline() {
            "Baseline".to_string()
        } else {
            format!("Trial {}", self.index)
        };
        writeln!(
            f,
            "=== {}: {} / {} (workers={}, amount={}) ===",
            label, self.execution, self.balance, self.workers, self.amount
        )?;
        for event in &self.trace {
            writeln!(f, "{}", event)?;
        }
        writeln!(f, "Output: {}", self.final_balance)?;
        writeln!(
            f,
            "Expected: {}  entries: {}  ledger sum: {}",
            self.expected, self.entries_count, self.entries_sum
        )?;
        for failure in &self.failures {
            writeln!(f, "  failure {}", failure)?;
        }
        write!(f, "Result: {} ({} ms)", self.classification, self.elapsed.as_millis())
    }
}

/// Classification counts over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub trials: usize,
    pub correct: usize,
    pub race_observed: usize,
    pub failed: usize,
}

impl Summary {
    pub fn from_results(results: &[TrialResult]) -> Self {
        results.iter().fold(Self::default(), |mut summary, result| {
            summary.trials += 1;
            match result.classification {
                Classification::Correct => summary.correct += 1,
                Classification::RaceObserved => summary.race_observed += 1,
                Classification::Failed => summary.failed += 1,
            }
            summary
        })
    }

    /// Races are findings, not failures.
    pub fn passed(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} trial(s): {} CORRECT, {} RACE_OBSERVED, {} FAILED",
            self.trials, self.correct, self.race_observed, self.failed
        )
    }
}

/// Machine-readable run output for `--json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub results: Vec<TrialResult>,
    pub summary: Summary,
}

impl Report {
    pub fn new(results: Vec<TrialResult>) -> Self {
        let summary = Summary::from_results(&results);
        Self { results, summary }
    }
}
