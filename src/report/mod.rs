//! Run Reports
//!
//! A [`Reporter`] is told when a run (or a debug action) starts and stops.
//! [`JsonReporter`] writes a snapshot of the tree's branches to a JSON file
//! on every stop, which is also what `--rerun-not-passed` reads back.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::tree::{Branch, BranchStatus, Step, StepDataMode, Tree};

/// Receives run lifecycle notifications.
pub trait Reporter: Send {
    fn start(&mut self, tree: &Tree) -> Result<(), ReportError>;
    fn stop(&mut self, tree: &Tree) -> Result<(), ReportError>;
}

/// Serialized form of a finished (or interrupted) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub time_started: Option<DateTime<Utc>>,
    /// `-1` while the run is paused
    pub elapsed_ms: Option<i64>,
    pub is_debug: bool,
    pub summary: ReportSummary,
    #[serde(default)]
    pub before_everything: Vec<StepReport>,
    #[serde(default)]
    pub after_everything: Vec<StepReport>,
    pub branches: Vec<BranchReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchReport {
    pub hash: String,
    pub status: String,
    pub elapsed_ms: Option<i64>,
    pub groups: Vec<String>,
    /// Left empty when the step data mode excludes this branch
    #[serde(default)]
    pub steps: Vec<StepReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub text: String,
    pub location: String,
    pub passed: bool,
    pub failed: bool,
    pub skipped: bool,
    pub as_expected: bool,
    pub error: Option<String>,
    pub log: Option<String>,
    pub elapsed_ms: Option<i64>,
}

impl RunReport {
    pub fn from_tree(tree: &Tree) -> Self {
        let mut summary = ReportSummary {
            total: tree.branches.len(),
            ..ReportSummary::default()
        };
        for branch in &tree.branches {
            match branch.status {
                BranchStatus::Passed => summary.passed += 1,
                BranchStatus::Failed => summary.failed += 1,
                BranchStatus::Skipped => summary.skipped += 1,
                BranchStatus::Pending | BranchStatus::Running => summary.pending += 1,
            }
        }

        Self {
            time_started: tree.time_started,
            elapsed_ms: tree.elapsed.as_millis(),
            is_debug: tree.is_debug,
            summary,
            before_everything: tree.before_everything.iter().map(StepReport::new).collect(),
            after_everything: tree.after_everything.iter().map(StepReport::new).collect(),
            branches: tree
                .branches
                .iter()
                .map(|b| BranchReport::new(b, tree.step_data_mode))
                .collect(),
        }
    }
}

impl BranchReport {
    fn new(branch: &Branch, mode: StepDataMode) -> Self {
        let keep_steps = match mode {
            StepDataMode::All => true,
            StepDataMode::Fail => branch.is_failed(),
            StepDataMode::None => false,
        };

        Self {
            hash: branch.hash.clone(),
            status: branch.status.to_string(),
            elapsed_ms: branch.elapsed.map(|d| d.as_millis() as i64),
            groups: branch.groups.clone(),
            steps: if keep_steps {
                branch.steps.iter().map(StepReport::new).collect()
            } else {
                Vec::new()
            },
        }
    }
}

impl StepReport {
    fn new(step: &Step) -> Self {
        let log = step.state.log.trim_end();
        Self {
            text: step.text.clone(),
            location: step.location().to_string(),
            passed: step.state.is_passed,
            failed: step.state.is_failed,
            skipped: step.state.is_skipped,
            as_expected: step.state.as_expected,
            error: step.state.error.as_ref().map(|e| e.to_string()),
            log: (!log.is_empty()).then(|| log.to_string()),
            elapsed_ms: step.state.elapsed.map(|d| d.as_millis() as i64),
        }
    }
}

/// Writes [`RunReport`] snapshots to a JSON file.
#[derive(Debug, Clone)]
pub struct JsonReporter {
    path: PathBuf,
}

impl JsonReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> ReportError {
        ReportError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl Reporter for JsonReporter {
    fn start(&mut self, _tree: &Tree) -> Result<(), ReportError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }

    fn stop(&mut self, tree: &Tree) -> Result<(), ReportError> {
        let report = RunReport::from_tree(tree);
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(&self.path, json).map_err(|e| self.io_error(e))?;

        debug!("Saved report to {}", self.path.display());
        Ok(())
    }
}

/// Hashes of the branches a previous report recorded as passed.
pub fn load_passed_hashes(path: &Path) -> Result<HashSet<String>, ReportError> {
    let content = fs::read_to_string(path).map_err(|source| ReportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let report: RunReport = serde_json::from_str(&content)?;

    let passed: HashSet<String> = report
        .branches
        .into_iter()
        .filter(|b| b.status == BranchStatus::Passed.to_string())
        .map(|b| b.hash)
        .collect();

    info!("Loaded {} passed branch(es) from {}", passed.len(), path.display());
    Ok(passed)
}
