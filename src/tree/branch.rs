//! Branches
//!
//! A branch is one root-to-leaf path through the tree, materialized as a
//! list of step clones. It is owned by exactly one execution unit while it
//! runs, so its state needs no locking.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::model::StepId;
use super::step::Step;
use crate::error::ConfigError;

/// How often a branch should run. Ordered `Low < Med < High`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Low,
    #[default]
    Med,
    High,
}

impl FromStr for Frequency {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Frequency::Low),
            "med" => Ok(Frequency::Med),
            "high" => Ok(Frequency::High),
            _ => Err(ConfigError::invalid("minFrequency", s, "expected high, med or low")),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Frequency::Low => "low",
            Frequency::Med => "med",
            Frequency::High => "high",
        };
        write!(f, "{}", name)
    }
}

/// Final outcome of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BranchStatus::Pending => "pending",
            BranchStatus::Running => "running",
            BranchStatus::Passed => "passed",
            BranchStatus::Failed => "failed",
            BranchStatus::Skipped => "skipped",
        };
        write!(f, "{}", name)
    }
}

/// One linear execution path.
#[derive(Debug, Clone)]
pub struct Branch {
    pub steps: Vec<Step>,
    /// Stable identity derived from the step sequence
    pub hash: String,
    /// Branches sharing a key never run at the same time
    pub non_parallel_keys: Vec<StepId>,
    pub frequency: Frequency,
    pub groups: Vec<String>,
    pub is_only: bool,
    pub is_debug: bool,

    pub status: BranchStatus,
    pub elapsed: Option<Duration>,
}

impl Branch {
    pub fn new(steps: Vec<Step>) -> Self {
        let hash = hash_steps(&steps);
        let is_only = steps.iter().any(|s| s.modifiers.only);
        let is_debug = steps.iter().any(|s| s.modifiers.debug);

        Self {
            steps,
            hash,
            non_parallel_keys: Vec::new(),
            frequency: Frequency::default(),
            groups: Vec::new(),
            is_only,
            is_debug,
            status: BranchStatus::Pending,
            elapsed: None,
        }
    }

    pub fn with_non_parallel_keys(mut self, mut keys: Vec<StepId>) -> Self {
        keys.sort();
        keys.dedup();
        self.non_parallel_keys = keys;
        self
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    /// Index of the next step to run.
    ///
    /// There is none once a step failed unexpectedly or a to-do/manual step
    /// was reached.
    pub fn next_ready_index(&self) -> Option<usize> {
        for (i, step) in self.steps.iter().enumerate() {
            if step.failed_unexpectedly() || step.is_placeholder_skip() {
                return None;
            }
            if !step.state.is_complete() {
                return Some(i);
            }
        }
        None
    }

    pub fn next_ready_step(&self) -> Option<&Step> {
        self.next_ready_index().map(|i| &self.steps[i])
    }

    pub fn is_complete(&self) -> bool {
        matches!(
            self.status,
            BranchStatus::Passed | BranchStatus::Failed | BranchStatus::Skipped
        )
    }

    pub fn is_passed(&self) -> bool {
        self.status == BranchStatus::Passed
    }

    pub fn is_failed(&self) -> bool {
        self.status == BranchStatus::Failed
    }

    /// Derives the final status from the step outcomes.
    pub fn finalize(&mut self, elapsed: Option<Duration>) {
        self.status = if self.steps.iter().any(Step::failed_unexpectedly) {
            BranchStatus::Failed
        } else if self.steps.iter().any(Step::is_placeholder_skip) {
            BranchStatus::Skipped
        } else {
            BranchStatus::Passed
        };
        self.elapsed = elapsed;
    }

    /// Short form of the hash for log lines.
    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(12)]
    }
}

/// SHA-256 over the identity of every step, hex encoded.
pub fn hash_steps(steps: &[Step]) -> String {
    let mut hasher = Sha256::new();
    for step in steps {
        hasher.update(step.filename.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(step.line.unwrap_or(0).to_le_bytes());
        hasher.update(step.text.as_bytes());
        hasher.update([0u8]);
        hasher.update(step.code_block.as_deref().unwrap_or("").as_bytes());
        hasher.update([1u8]);
    }
    format!("{:x}", hasher.finalize())
}
