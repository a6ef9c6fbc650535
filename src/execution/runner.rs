//! Test Runner
//!
//! The [`Runner`] drives a generated tree through its lifecycle:
//!
//! 1. before-everything hooks, one at a time
//! 2. branches, spread over `min(max_instances, branches)` execution units
//! 3. after-everything hooks, one at a time
//!
//! A run can pause (debug step, or a failure with pause-on-fail). While
//! paused, the caller can step through the paused branch, re-run the last
//! step, inject new steps, resume with [`Runner::run`] or [`Runner::stop`].

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::Utc;
use log::{debug, info, warn};

use super::config::RunConfig;
use super::context::{RunContext, RunSettings};
use super::instance::{RunInstance, UnitEvent};
use super::queue::BranchQueue;
use super::step::StepExecutor;
use crate::error::RunError;
use crate::report::{load_passed_hashes, Reporter};
use crate::tree::{Elapsed, Step, Tree};

/// Id given to the unit that runs hooks.
const HOOK_UNIT: usize = usize::MAX;

/// Requests a cooperative stop from another thread.
///
/// Units notice it at their next step boundary. The owner of the
/// [`Runner`] still calls [`Runner::stop`] to tear the run down.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Runner {
    tree: Tree,
    config: RunConfig,
    context: RunContext,
    reporter: Option<Box<dyn Reporter>>,
    instances: Vec<RunInstance>,
    /// Branches no unit has picked up yet
    pending: BTreeSet<usize>,
    started: Instant,
    torn_down: bool,
}

impl Runner {
    /// Generates the tree's branches and prepares a run.
    ///
    /// Fails without running anything (hooks included) if generation fails.
    pub fn new(
        mut tree: Tree,
        config: RunConfig,
        executor: Arc<dyn StepExecutor>,
    ) -> Result<Self, RunError> {
        let mut options = config.generate_options();
        if config.rerun_not_passed {
            match load_passed_hashes(&config.report_path) {
                Ok(passed) => options.skip_hashes = passed,
                Err(e) => warn!("Running every branch, previous report unavailable: {}", e),
            }
        }

        tree.generate(&options)?;
        tree.step_data_mode = config.step_data_mode;
        tree.is_express_debug = config.express_debug;

        let settings = RunSettings::from_config(&config, tree.is_debug);
        if settings.pause_on_fail && !config.pause_on_fail {
            info!("Debug branch present, pausing on failure");
        }

        let pending = (0..tree.branches.len()).collect();
        Ok(Self {
            context: RunContext::new(settings, executor),
            tree,
            config,
            reporter: None,
            instances: Vec::new(),
            pending,
            started: Instant::now(),
            torn_down: false,
        })
    }

    /// Attaches a report writer, unless reports are disabled.
    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        if self.config.no_report {
            debug!("Reports disabled, ignoring reporter");
            return self;
        }
        self.context.settings.reporting = true;
        self.reporter = Some(reporter);
        self
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.context.stop_flag())
    }

    /// Starts the run, or resumes it from a pause.
    ///
    /// Returns `Ok(true)` when nothing is left to run and `Ok(false)` when the
    /// run paused with steps remaining.
    pub fn run(&mut self) -> Result<bool, RunError> {
        if self.has_stopped() {
            return Err(RunError::Stopped);
        }

        self.tree.time_started = Some(Utc::now());
        self.started = Instant::now();
        self.start_reporter()?;

        if self.has_paused() {
            self.dispatch();
            if self.has_paused() {
                self.tree.elapsed = Elapsed::Unmeasurable;
            } else {
                self.end();
            }
        } else {
            if self.run_before_everything() {
                let parallelism = self.config.max_instances.min(self.pending.len());
                info!(
                    "Running {} branch(es) on {} unit(s)",
                    self.pending.len(),
                    parallelism
                );
                self.instances = (0..parallelism).map(RunInstance::new).collect();
                self.dispatch();
            } else {
                warn!("Before-everything hooks did not pass, skipping branches");
            }
            self.end();
        }

        self.stop_reporter()?;
        Ok(self.next_ready_step().is_none())
    }

    /// Runs units on scoped threads until the queue drains, or they stop or pause.
    ///
    /// When resuming, only the paused unit runs.
    fn dispatch(&mut self) {
        let paused_unit = self.instances.iter().position(RunInstance::is_paused);
        let resume_index = paused_unit.and_then(|u| self.instances[u].branch_index());

        let mut resume = None;
        let mut queued = VecDeque::new();
        for (index, branch) in self.tree.branches.iter_mut().enumerate() {
            if Some(index) == resume_index {
                resume = Some(branch);
            } else if self.pending.contains(&index) {
                queued.push_back((index, branch));
            }
        }

        let queue = BranchQueue::new(queued);
        let ctx = &self.context;
        let (tx, rx) = channel();

        thread::scope(|scope| {
            for unit in self.instances.iter_mut() {
                let resume = match paused_unit {
                    Some(paused) if paused == unit.id() => resume.take(),
                    Some(_) => continue,
                    None => None,
                };
                let tx = tx.clone();
                let queue = &queue;
                scope.spawn(move || unit.run(resume, queue, ctx, &tx));
            }
            drop(tx);

            for event in rx {
                log_event(&event);
            }
        });

        self.pending = queue.into_remaining();
    }

    fn end(&mut self) {
        if self.has_stopped() {
            // stop() runs the after-everything hooks
        } else if self.has_paused() {
            self.tree.elapsed = Elapsed::Unmeasurable;
        } else {
            self.run_after_everything();
        }
    }

    /// Runs before-everything hooks until one fails or the run stops.
    fn run_before_everything(&mut self) -> bool {
        let mut unit = RunInstance::new(HOOK_UNIT);
        let mut passed = true;
        for step in self.tree.before_everything.iter_mut() {
            if !unit.run_hook_step(step, &self.context) || self.context.is_stopped() {
                passed = false;
                break;
            }
        }
        unit.close_browser(&self.context);
        passed
    }

    /// Runs every after-everything hook; failures do not stop the rest.
    fn run_after_everything(&mut self) {
        let mut unit = RunInstance::new(HOOK_UNIT);
        for step in self.tree.after_everything.iter_mut() {
            unit.run_hook_step(step, &self.context);
        }
        unit.close_browser(&self.context);

        if self.tree.elapsed != Elapsed::Unmeasurable {
            self.tree.elapsed = Elapsed::Measured(self.started.elapsed());
        }
    }

    /// Stops the run: quits every open browser session and runs the
    /// after-everything hooks. Later calls do nothing.
    ///
    /// Meant for paused or interrupted runs. After a run that ended normally
    /// the after-everything hooks have already run and would run again.
    pub fn stop(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        info!("Stopping run");
        self.context.request_stop();
        self.context.sessions().quit_all();
        self.run_after_everything();

        if let Err(e) = self.stop_reporter() {
            warn!("Failed to write report: {}", e);
        }
    }

    /// Runs the next step of the paused branch.
    ///
    /// Returns true if that completed the branch, in which case the
    /// after-everything hooks have run too.
    pub fn run_one_step(&mut self) -> Result<bool, RunError> {
        let index = self.paused_branch("run a step")?;
        self.start_reporter()?;

        let complete = self.instances[0].run_one_step(&mut self.tree.branches[index], &self.context);
        if complete {
            self.run_after_everything();
        }

        self.stop_reporter()?;
        Ok(complete)
    }

    /// Skips the next step of the paused branch. Returns true if that completed the branch.
    pub fn skip_one_step(&mut self) -> Result<bool, RunError> {
        let index = self.paused_branch("skip a step")?;
        self.start_reporter()?;

        let complete =
            self.instances[0].skip_one_step(&mut self.tree.branches[index], &self.context);
        if complete {
            self.run_after_everything();
        }

        self.stop_reporter()?;
        Ok(complete)
    }

    /// Re-runs the last step of the paused branch without advancing.
    pub fn run_last_step(&mut self) -> Result<&Step, RunError> {
        let index = self.paused_branch("re-run a step")?;
        let branch = &mut self.tree.branches[index];
        let step = self.instances[0]
            .run_last_step(branch, &self.context)
            .ok_or(RunError::NoLastStep)?;
        Ok(&self.tree.branches[index].steps[step])
    }

    /// Runs a step that is not part of the paused branch.
    ///
    /// Function calls are resolved from the position of the paused branch.
    /// Returns the executed steps; the branch itself is left unchanged.
    pub fn inject_step(&mut self, step: Step) -> Result<Vec<Step>, RunError> {
        let index = self.paused_branch("inject a step")?;
        let branch = &self.tree.branches[index];
        let anchor = branch
            .next_ready_index()
            .or(self.instances[0].last_step_index())
            .map(|i| &branch.steps[i]);

        let scope = anchor.and_then(Step::origin);
        let indents = anchor.map(|s| s.branch_indents).unwrap_or(0);
        let steps = self.tree.expand_detached(&step, scope)?;

        Ok(self.instances[0].inject_steps(steps, indents, &self.context))
    }

    fn paused_branch(&self, action: &'static str) -> Result<usize, RunError> {
        if !self.has_paused() {
            return Err(RunError::NotPaused(action));
        }
        self.instances[0]
            .branch_index()
            .ok_or(RunError::NotPaused(action))
    }

    /// True while exactly one unit is active and it is paused.
    pub fn has_paused(&self) -> bool {
        !self.has_stopped() && self.instances.len() == 1 && self.instances[0].is_paused()
    }

    pub fn has_stopped(&self) -> bool {
        self.context.is_stopped()
    }

    /// Next step the first unit would run, if its branch is unfinished.
    pub fn next_ready_step(&self) -> Option<&Step> {
        let index = self.instances.first()?.branch_index()?;
        self.tree.branches[index].next_ready_step()
    }

    /// Last step the first unit ran in its current branch.
    pub fn last_step(&self) -> Option<&Step> {
        let unit = self.instances.first()?;
        let branch = &self.tree.branches[unit.branch_index()?];
        unit.last_step_index().map(|i| &branch.steps[i])
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn start_reporter(&mut self) -> Result<(), RunError> {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.start(&self.tree)?;
        }
        Ok(())
    }

    fn stop_reporter(&mut self) -> Result<(), RunError> {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.stop(&self.tree)?;
        }
        Ok(())
    }
}

fn log_event(event: &UnitEvent) {
    match event {
        UnitEvent::BranchStarted { unit, hash } => {
            debug!("Unit {} picked up branch {}", unit, short(hash));
        }
        UnitEvent::BranchFinished { unit, hash, status } => {
            debug!("Unit {} finished branch {}: {}", unit, short(hash), status);
        }
        UnitEvent::Paused { unit } => info!("Unit {} paused", unit),
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
