//! Execution Units
//!
//! A [`RunInstance`] runs branches one at a time, steps strictly in order.
//! It keeps pulling branches from the queue until none remain, the run is
//! stopped, or it pauses (debug step, or a failure with pause-on-fail).
//! A paused unit keeps its branch index so the runner can resume it.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};

use super::context::{close_session, RunContext, StepContext, Variables};
use super::queue::BranchQueue;
use super::step::StepOutput;
use crate::browser::screenshots::{prune_branch_screenshots, save_screenshot};
use crate::browser::{BrowserSession, Phase};
use crate::error::StepError;
use crate::tree::matching::strip_quotes;
use crate::tree::{ArgumentValue, Branch, BranchStatus, Step, StepDataMode};

/// Progress messages sent from units to the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitEvent {
    BranchStarted {
        unit: usize,
        hash: String,
    },
    BranchFinished {
        unit: usize,
        hash: String,
        status: BranchStatus,
    },
    Paused {
        unit: usize,
    },
}

/// How a pass over a branch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BranchOutcome {
    Finished,
    Paused,
    Stopped,
}

/// One execution unit.
pub struct RunInstance {
    id: usize,
    /// Index into the tree's branch list of the branch being run
    branch: Option<usize>,
    is_paused: bool,
    vars: Variables,
    last_step: Option<usize>,
    /// Debug step the unit already paused in front of
    debug_paused_at: Option<usize>,
    browser: Option<Arc<dyn BrowserSession>>,
    branch_started: Option<Instant>,
}

impl RunInstance {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            branch: None,
            is_paused: false,
            vars: Variables::default(),
            last_step: None,
            debug_paused_at: None,
            browser: None,
            branch_started: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn branch_index(&self) -> Option<usize> {
        self.branch
    }

    pub fn last_step_index(&self) -> Option<usize> {
        self.last_step
    }

    pub fn variables(&self) -> &Variables {
        &self.vars
    }

    /// Runs branches until the queue is drained, the run stops, or this unit pauses.
    ///
    /// `resume` is the branch this unit paused in, if any.
    pub(crate) fn run<'b>(
        &mut self,
        mut resume: Option<&'b mut Branch>,
        queue: &BranchQueue<'b>,
        ctx: &RunContext,
        events: &Sender<UnitEvent>,
    ) {
        self.is_paused = false;

        loop {
            let (branch, holds_keys) = match resume.take() {
                Some(branch) => (branch, false),
                None => match queue.take(|| ctx.is_stopped()) {
                    Some((index, branch)) => {
                        self.start_branch(index, branch, ctx);
                        send(events, UnitEvent::BranchStarted {
                            unit: self.id,
                            hash: branch.hash.clone(),
                        });
                        (branch, true)
                    }
                    None => return,
                },
            };

            let outcome = self.run_branch(branch, ctx);
            if holds_keys {
                queue.release(&branch.non_parallel_keys);
            }

            match outcome {
                BranchOutcome::Finished => {
                    self.finish_branch(branch, ctx);
                    send(events, UnitEvent::BranchFinished {
                        unit: self.id,
                        hash: branch.hash.clone(),
                        status: branch.status,
                    });
                }
                BranchOutcome::Paused => {
                    self.is_paused = true;
                    send(events, UnitEvent::Paused { unit: self.id });
                    return;
                }
                BranchOutcome::Stopped => {
                    debug!("Unit {} stopped in branch {}", self.id, branch.short_hash());
                    return;
                }
            }
        }
    }

    fn start_branch(&mut self, index: usize, branch: &mut Branch, ctx: &RunContext) {
        self.branch = Some(index);
        self.vars.clear();
        for (name, value) in &ctx.settings.global_init {
            self.vars.set_global(name, value);
        }
        self.last_step = None;
        self.debug_paused_at = None;
        self.branch_started = Some(Instant::now());
        branch.status = BranchStatus::Running;
        debug!("Unit {} starting branch {}", self.id, branch.short_hash());
    }

    fn run_branch(&mut self, branch: &mut Branch, ctx: &RunContext) -> BranchOutcome {
        let hash = branch.hash.clone();

        while let Some(i) = branch.next_ready_index() {
            if ctx.is_stopped() {
                return BranchOutcome::Stopped;
            }

            let step = &branch.steps[i];
            if step.modifiers.debug && !ctx.settings.express_debug && self.debug_paused_at != Some(i) {
                self.debug_paused_at = Some(i);
                info!("Paused before debug step '{}'", step.text);
                return BranchOutcome::Paused;
            }

            self.execute_step(&mut branch.steps[i], Some((hash.as_str(), i)), ctx);
            self.last_step = Some(i);

            let step = &branch.steps[i];
            if step.failed_unexpectedly() && ctx.settings.pause_on_fail {
                info!("Paused after failed step '{}'", step.text);
                return BranchOutcome::Paused;
            }
        }
        BranchOutcome::Finished
    }

    pub(crate) fn finish_branch(&mut self, branch: &mut Branch, ctx: &RunContext) {
        branch.finalize(self.branch_started.take().map(|s| s.elapsed()));

        if ctx.settings.step_data_mode == StepDataMode::Fail && !branch.is_failed() {
            match prune_branch_screenshots(&ctx.settings.screenshot_dir, &branch.hash) {
                Ok(removed) => ctx.release_screenshots(removed as i64),
                Err(e) => debug!("Could not prune screenshots of {}: {}", branch.short_hash(), e),
            }
        }

        self.close_browser(ctx);

        info!(
            "Branch {} {} ({} step(s))",
            branch.short_hash(),
            branch.status,
            branch.steps.len()
        );

        self.branch = None;
        self.last_step = None;
        self.debug_paused_at = None;
    }

    /// Finishes the branch if it has no next step. Returns true if it finished.
    fn complete_if_done(&mut self, branch: &mut Branch, ctx: &RunContext) -> bool {
        if branch.next_ready_index().is_some() {
            return false;
        }
        self.finish_branch(branch, ctx);
        self.is_paused = false;
        true
    }

    /// Runs the next step of a paused branch. Returns true if the branch completed.
    pub(crate) fn run_one_step(&mut self, branch: &mut Branch, ctx: &RunContext) -> bool {
        if let Some(i) = branch.next_ready_index() {
            self.debug_paused_at = Some(i);
            let hash = branch.hash.clone();
            self.execute_step(&mut branch.steps[i], Some((hash.as_str(), i)), ctx);
            self.last_step = Some(i);
        }
        self.complete_if_done(branch, ctx)
    }

    /// Marks the next step skipped. Returns true if the branch completed.
    pub(crate) fn skip_one_step(&mut self, branch: &mut Branch, ctx: &RunContext) -> bool {
        if let Some(i) = branch.next_ready_index() {
            let step = &mut branch.steps[i];
            step.state.reset();
            step.state.is_skipped = true;
            step.state.as_expected = true;
            step.append_to_log("Skipped");
            self.last_step = Some(i);
        }
        self.complete_if_done(branch, ctx)
    }

    /// Re-runs the most recently run step in place.
    pub(crate) fn run_last_step(&mut self, branch: &mut Branch, ctx: &RunContext) -> Option<usize> {
        let i = self.last_step?;
        let hash = branch.hash.clone();
        self.execute_step(&mut branch.steps[i], Some((hash.as_str(), i)), ctx);
        Some(i)
    }

    /// Runs steps that are not part of the branch, at the current depth.
    ///
    /// Stops at the first unexpected failure. Returns the executed steps.
    pub(crate) fn inject_steps(
        &mut self,
        steps: Vec<Step>,
        base_indents: usize,
        ctx: &RunContext,
    ) -> Vec<Step> {
        let mut executed = Vec::with_capacity(steps.len());
        for mut step in steps {
            step.branch_indents += base_indents;
            self.execute_step(&mut step, None, ctx);
            let failed = step.failed_unexpectedly();
            executed.push(step);
            if failed {
                break;
            }
        }
        executed
    }

    pub(crate) fn close_browser(&mut self, ctx: &RunContext) {
        if let Some(session) = self.browser.take() {
            close_session(ctx, &session);
        }
    }

    /// Runs a before/after-everything hook. Returns false if it failed.
    pub(crate) fn run_hook_step(&mut self, step: &mut Step, ctx: &RunContext) -> bool {
        self.execute_step(step, None, ctx);
        if step.state.is_failed {
            warn!(
                "Hook '{}' failed: {}",
                step.text,
                step.state.error.as_ref().map(|e| e.to_string()).unwrap_or_default()
            );
            return false;
        }
        true
    }

    /// Executes one step and records its outcome on it.
    ///
    /// `slot` is the branch hash and step ordinal used to name screenshots.
    fn execute_step(&mut self, step: &mut Step, slot: Option<(&str, usize)>, ctx: &RunContext) {
        step.state.reset();
        step.state.is_running = true;
        let started = Instant::now();
        self.vars.enter_depth(step.branch_indents);

        if step.modifiers.to_do || step.modifiers.manual {
            step.state.is_running = false;
            step.state.is_skipped = true;
            step.state.as_expected = true;
            step.append_to_log(if step.modifiers.to_do {
                "To-do step, not run"
            } else {
                "Manual step, not run"
            });
            return;
        }

        let result = match self.bind_arguments(step) {
            Ok(()) => self.perform(step, slot, ctx),
            Err(e) => Err(e),
        };

        match result {
            Ok(output) => {
                if let Some(log) = &output.log {
                    step.append_to_log(log);
                }
                self.apply_bindings(step, output.value.as_deref());
                step.state.is_passed = true;
            }
            Err(e) => {
                step.append_to_log(&e.to_string());
                step.state.error = Some(e);
                step.state.is_failed = true;
            }
        }

        step.state.as_expected = step.state.is_failed == step.modifiers.expected_fail;
        if step.modifiers.expected_fail && step.state.is_passed {
            step.append_to_log("Expected a failure, but the step passed");
        }
        step.state.is_running = false;
        step.state.elapsed = Some(started.elapsed());

        debug!(
            "Step '{}' {} in {:?}",
            step.text,
            if step.state.is_passed { "passed" } else { "failed" },
            step.state.elapsed.unwrap_or_default()
        );
    }

    fn perform(
        &mut self,
        step: &Step,
        slot: Option<(&str, usize)>,
        ctx: &RunContext,
    ) -> Result<StepOutput, StepError> {
        self.capture_screenshot(false, slot, ctx);
        let result = {
            let mut step_ctx = StepContext::new(ctx, &self.vars, &mut self.browser);
            ctx.executor().execute(step, &mut step_ctx)
        };
        self.capture_screenshot(true, slot, ctx);
        result
    }

    /// Makes a call's arguments local variables of the function body.
    fn bind_arguments(&mut self, step: &Step) -> Result<(), StepError> {
        if !step.is_function_call() || step.arguments.is_empty() {
            return Ok(());
        }

        let mut values = Vec::with_capacity(step.arguments.len());
        for argument in &step.arguments {
            let value = match &argument.value {
                ArgumentValue::Literal(text) | ArgumentValue::ElementFinder(text) => text.clone(),
                ArgumentValue::Variable { name, is_local } => self
                    .vars
                    .get_scoped(name, *is_local)
                    .map(str::to_string)
                    .ok_or_else(|| StepError::UndefinedVariable(name.clone()))?,
            };
            values.push((argument.name.as_str(), value));
        }

        let depth = step.branch_indents + 1;
        for (name, value) in values {
            self.vars.set_local(depth, name, &value);
        }
        Ok(())
    }

    /// Assigns the step's `{var} = ...` bindings after it passed.
    fn apply_bindings(&mut self, step: &Step, value: Option<&str>) {
        for binding in &step.vars_being_set {
            let value = if binding.is_literal() {
                strip_quotes(&binding.value)
            } else {
                value.unwrap_or_default().to_string()
            };

            if binding.is_local {
                self.vars.set_local(step.branch_indents, &binding.name, &value);
            } else {
                self.vars.set_global(&binding.name, &value);
            }
        }
    }

    fn capture_screenshot(&self, is_after: bool, slot: Option<(&str, usize)>, ctx: &RunContext) {
        let Some((hash, ordinal)) = slot else {
            return;
        };
        let settings = &ctx.settings;
        if !settings.reporting || settings.step_data_mode == StepDataMode::None {
            return;
        }
        let Some(browser) = &self.browser else {
            return;
        };
        if !ctx.reserve_screenshot() {
            return;
        }

        match browser.take_screenshot(is_after) {
            Ok(Some(shot)) => {
                let phase = Phase::from_is_after(is_after);
                if let Err(e) = save_screenshot(&settings.screenshot_dir, hash, ordinal, phase, &shot)
                {
                    debug!("Could not save screenshot: {}", e);
                    ctx.release_screenshots(1);
                }
            }
            Ok(None) => ctx.release_screenshots(1),
            Err(e) => {
                debug!("Screenshot failed: {}", e);
                ctx.release_screenshots(1);
            }
        }
    }
}

fn send(events: &Sender<UnitEvent>, event: UnitEvent) {
    // the runner may have stopped listening
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::FakeBrowser;
    use crate::execution::context::RunSettings;
    use crate::execution::step::StepExecutor;
    use crate::tree::{Modifier, Step};
    use std::collections::VecDeque;
    use std::sync::mpsc::channel;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Passes every step except ones whose text starts with "fail".
    /// A step named "open browser" opens a fake session.
    #[derive(Default)]
    struct ScriptedExecutor {
        seen: Mutex<Vec<String>>,
    }

    impl StepExecutor for ScriptedExecutor {
        fn execute(&self, step: &Step, ctx: &mut StepContext<'_>) -> Result<StepOutput, StepError> {
            self.seen.lock().unwrap().push(step.text.clone());
            if step.text == "open browser" {
                ctx.open_browser(Arc::new(FakeBrowser::with_screenshots()))?;
            }
            if step.text.starts_with("fail") {
                return Err(StepError::Action("boom".to_string()));
            }
            Ok(StepOutput {
                log: None,
                value: ctx.var("user").map(|u| format!("hello {}", u)),
            })
        }
    }

    fn context(settings: RunSettings) -> (RunContext, Arc<ScriptedExecutor>) {
        let executor = Arc::new(ScriptedExecutor::default());
        (RunContext::new(settings, executor.clone()), executor)
    }

    fn run_all(unit: &mut RunInstance, branches: &mut [Branch], ctx: &RunContext) -> Vec<UnitEvent> {
        let queue = BranchQueue::new(branches.iter_mut().enumerate().collect::<VecDeque<_>>());
        let (tx, rx) = channel();
        unit.run(None, &queue, ctx, &tx);
        drop(tx);
        rx.into_iter().collect()
    }

    #[test]
    fn test_runs_branches_to_completion() {
        let (ctx, executor) = context(RunSettings::default());
        let mut branches = vec![
            Branch::new(vec![Step::new("a"), Step::new("b")]),
            Branch::new(vec![Step::new("c")]),
        ];
        let mut unit = RunInstance::new(0);

        let events = run_all(&mut unit, &mut branches, &ctx);

        assert!(branches.iter().all(Branch::is_passed));
        assert_eq!(*executor.seen.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(events.len(), 4);
        assert!(!unit.is_paused());
        assert_eq!(unit.branch_index(), None);
    }

    #[test]
    fn test_failure_stops_branch_not_siblings() {
        let (ctx, executor) = context(RunSettings::default());
        let mut branches = vec![
            Branch::new(vec![Step::new("fail here"), Step::new("never")]),
            Branch::new(vec![Step::new("ok")]),
        ];
        let mut unit = RunInstance::new(0);
        run_all(&mut unit, &mut branches, &ctx);

        assert!(branches[0].is_failed());
        assert!(branches[1].is_passed());
        assert!(!executor.seen.lock().unwrap().contains(&"never".to_string()));
        assert_eq!(
            branches[0].steps[0].state.error,
            Some(StepError::Action("boom".to_string()))
        );
        assert!(branches[0].steps[0].state.log.contains("boom"));
    }

    #[test]
    fn test_expected_fail_outcomes() {
        let (ctx, _) = context(RunSettings::default());
        let mut branches = vec![
            Branch::new(vec![
                Step::new("fail as planned").with_modifier(Modifier::ExpectedFail),
                Step::new("after"),
            ]),
            Branch::new(vec![Step::new("passes anyway").with_modifier(Modifier::ExpectedFail)]),
        ];
        let mut unit = RunInstance::new(0);
        run_all(&mut unit, &mut branches, &ctx);

        let first = &branches[0].steps[0].state;
        assert!(first.is_failed && first.as_expected);
        assert!(branches[0].is_passed());
        assert!(branches[0].steps[1].state.is_passed);

        let second = &branches[1].steps[0].state;
        assert!(second.is_passed && !second.as_expected);
        assert!(branches[1].is_failed());
    }

    #[test]
    fn test_to_do_skips_branch() {
        let (ctx, executor) = context(RunSettings::default());
        let mut branches = vec![Branch::new(vec![
            Step::new("later").with_modifier(Modifier::ToDo),
            Step::new("unreached"),
        ])];
        let mut unit = RunInstance::new(0);
        run_all(&mut unit, &mut branches, &ctx);

        assert_eq!(branches[0].status, BranchStatus::Skipped);
        assert!(executor.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_pause_on_fail_then_resume() {
        let settings = RunSettings {
            pause_on_fail: true,
            ..RunSettings::default()
        };
        let (ctx, _) = context(settings);
        let mut branches = vec![Branch::new(vec![Step::new("fail"), Step::new("next")])];
        let mut unit = RunInstance::new(0);

        let events = run_all(&mut unit, &mut branches, &ctx);
        assert!(unit.is_paused());
        assert_eq!(unit.branch_index(), Some(0));
        assert_eq!(events.last(), Some(&UnitEvent::Paused { unit: 0 }));
        assert_eq!(branches[0].status, BranchStatus::Running);

        let queue = BranchQueue::new(VecDeque::new());
        let (tx, _rx) = channel();
        unit.run(Some(&mut branches[0]), &queue, &ctx, &tx);
        assert!(!unit.is_paused());
        assert!(branches[0].is_failed());
    }

    #[test]
    fn test_debug_step_pauses_before_running() {
        let (ctx, executor) = context(RunSettings::default());
        let mut branches = vec![Branch::new(vec![
            Step::new("a"),
            Step::new("b").with_modifier(Modifier::Debug),
        ])];
        let mut unit = RunInstance::new(0);
        run_all(&mut unit, &mut branches, &ctx);

        assert!(unit.is_paused());
        assert_eq!(*executor.seen.lock().unwrap(), vec!["a"]);

        assert!(unit.run_one_step(&mut branches[0], &ctx));
        assert_eq!(*executor.seen.lock().unwrap(), vec!["a", "b"]);
        assert!(branches[0].is_passed());
    }

    #[test]
    fn test_express_debug_does_not_pause() {
        let settings = RunSettings {
            express_debug: true,
            ..RunSettings::default()
        };
        let (ctx, _) = context(settings);
        let mut branches = vec![Branch::new(vec![Step::new("b").with_modifier(Modifier::Debug)])];
        let mut unit = RunInstance::new(0);
        run_all(&mut unit, &mut branches, &ctx);

        assert!(!unit.is_paused());
        assert!(branches[0].is_passed());
    }

    #[test]
    fn test_skip_and_rerun() {
        let (ctx, executor) = context(RunSettings::default());
        let mut branch = Branch::new(vec![Step::new("a"), Step::new("b"), Step::new("c")]);
        let mut unit = RunInstance::new(0);

        assert!(!unit.run_one_step(&mut branch, &ctx));
        assert_eq!(unit.run_last_step(&mut branch, &ctx), Some(0));
        assert!(!unit.skip_one_step(&mut branch, &ctx));
        assert!(branch.steps[1].state.is_skipped);
        assert!(unit.run_one_step(&mut branch, &ctx));

        assert_eq!(*executor.seen.lock().unwrap(), vec!["a", "a", "c"]);
        assert!(branch.is_passed());
    }

    #[test]
    fn test_bindings_and_arguments() {
        let (ctx, _) = context(RunSettings::default());
        let mut call = Step::new("Greet {u}").as_function_call();
        call.arguments = crate::tree::matching::extract_arguments("Greet {{user}}", "Greet {u}");
        let mut branch = Branch::new(vec![
            Step::from_text("{u} = 'ann'", None),
            call,
            {
                let mut s = Step::from_text("{greeting} = Say hello", None);
                s.branch_indents = 1;
                s
            },
        ]);
        let mut unit = RunInstance::new(0);

        unit.run_one_step(&mut branch, &ctx);
        unit.run_one_step(&mut branch, &ctx);
        unit.run_one_step(&mut branch, &ctx);

        assert!(branch.is_passed());
        assert_eq!(unit.variables().get("greeting"), Some("hello ann"));
    }

    #[test]
    fn test_branches_start_from_global_init() {
        let mut settings = RunSettings::default();
        settings.global_init.insert("user".to_string(), "ann".to_string());
        let (ctx, _) = context(settings);
        let mut branches = vec![
            Branch::new(vec![
                Step::from_text("{user} = 'bob'", None),
                Step::from_text("{first} = Say hello", None),
            ]),
            Branch::new(vec![Step::from_text("{second} = Say hello", None)]),
        ];
        let mut unit = RunInstance::new(0);

        run_all(&mut unit, &mut branches, &ctx);

        assert!(branches.iter().all(Branch::is_passed));
        assert_eq!(unit.variables().get("first"), None);
        assert_eq!(unit.variables().get("second"), Some("hello ann"));
        assert_eq!(unit.variables().get("user"), Some("ann"));
    }

    #[test]
    fn test_undefined_argument_variable_fails() {
        let (ctx, _) = context(RunSettings::default());
        let mut call = Step::new("Greet {nobody}").as_function_call();
        call.arguments = crate::tree::matching::extract_arguments("Greet {{user}}", "Greet {nobody}");
        let mut branch = Branch::new(vec![call]);
        let mut unit = RunInstance::new(0);

        unit.run_one_step(&mut branch, &ctx);
        assert_eq!(
            branch.steps[0].state.error,
            Some(StepError::UndefinedVariable("nobody".to_string()))
        );
    }

    #[test]
    fn test_screenshots_written_and_pruned() {
        let dir = tempdir().unwrap();
        let settings = RunSettings {
            reporting: true,
            step_data_mode: StepDataMode::Fail,
            screenshot_dir: dir.path().to_path_buf(),
            ..RunSettings::default()
        };
        let (ctx, _) = context(settings);
        let mut branch = Branch::new(vec![Step::new("open browser"), Step::new("look")]);
        let hash = branch.hash.clone();
        let mut unit = RunInstance::new(0);

        unit.run_one_step(&mut branch, &ctx);
        assert!(dir.path().join(format!("{}_0_after.jpg", hash)).exists());
        unit.run_one_step(&mut branch, &ctx);

        // passed in fail-only mode: artifacts and budget are released
        assert!(branch.is_passed());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(ctx.screenshots_taken(), 0);
        assert!(ctx.sessions().is_empty());
    }

    #[test]
    fn test_screenshot_budget_respected() {
        let dir = tempdir().unwrap();
        let settings = RunSettings {
            reporting: true,
            max_screenshots: 1,
            screenshot_dir: dir.path().to_path_buf(),
            ..RunSettings::default()
        };
        let (ctx, _) = context(settings);
        let mut branch = Branch::new(vec![Step::new("open browser"), Step::new("look")]);
        let mut unit = RunInstance::new(0);

        unit.run_one_step(&mut branch, &ctx);
        unit.run_one_step(&mut branch, &ctx);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_inject_steps_leave_branch_untouched() {
        let (ctx, executor) = context(RunSettings::default());
        let mut unit = RunInstance::new(0);

        let executed = unit.inject_steps(
            vec![Step::new("fail injected"), Step::new("not reached")],
            0,
            &ctx,
        );
        assert_eq!(executed.len(), 1);
        assert!(executed[0].state.is_failed);
        assert_eq!(*executor.seen.lock().unwrap(), vec!["fail injected"]);
    }

    #[test]
    fn test_hook_failure_reported() {
        let (ctx, _) = context(RunSettings::default());
        let mut unit = RunInstance::new(0);
        let mut hook = Step::new("fail hook");
        assert!(!unit.run_hook_step(&mut hook, &ctx));
        let mut hook = Step::new("ok hook");
        assert!(unit.run_hook_step(&mut hook, &ctx));
    }
}
