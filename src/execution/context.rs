//! Run Context
//!
//! State shared by every execution unit of one run:
//!
//! - [`RunSettings`]: read-only settings fixed before dispatch
//! - the persistent key/value store and the open-session registry, the only
//!   mutable cross-unit state (each behind its own mutex)
//! - the cooperative stop flag and the screenshot budget counter
//!
//! [`StepContext`] is the per-step view handed to a [`StepExecutor`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use serde_json::Value;

use super::config::{RunConfig, UNLIMITED_SCREENSHOTS};
use super::step::StepExecutor;
use crate::browser::screenshots::SCREENSHOT_DIR;
use crate::browser::{resolve_headless, BrowserConfig, BrowserError, BrowserSession, SessionRegistry};
use crate::tree::StepDataMode;

/// Settings every unit reads during a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub pause_on_fail: bool,
    pub express_debug: bool,
    /// A report writer is attached
    pub reporting: bool,
    pub step_data_mode: StepDataMode,
    pub max_screenshots: i64,
    pub screenshot_dir: PathBuf,
    pub browser: BrowserConfig,
    /// Globals set at the start of every branch
    pub global_init: BTreeMap<String, String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            pause_on_fail: false,
            express_debug: false,
            reporting: false,
            step_data_mode: StepDataMode::All,
            max_screenshots: UNLIMITED_SCREENSHOTS,
            screenshot_dir: PathBuf::from(SCREENSHOT_DIR),
            browser: BrowserConfig {
                headless: true,
                ..BrowserConfig::default()
            },
            global_init: BTreeMap::new(),
        }
    }
}

impl RunSettings {
    pub fn from_config(config: &RunConfig, is_debug: bool) -> Self {
        Self {
            pause_on_fail: config.pause_on_fail || is_debug,
            express_debug: config.express_debug,
            reporting: false,
            step_data_mode: config.step_data_mode,
            max_screenshots: config.max_screenshots,
            screenshot_dir: config.screenshot_dir.clone(),
            browser: BrowserConfig {
                headless: resolve_headless(config.headless, is_debug),
                server_url: config.server_url.clone(),
                ..BrowserConfig::default()
            },
            global_init: config.global_init.clone(),
        }
    }
}

/// Shared state of one run.
pub struct RunContext {
    pub settings: RunSettings,
    executor: Arc<dyn StepExecutor>,
    store: Mutex<HashMap<String, Value>>,
    sessions: SessionRegistry,
    stopped: Arc<AtomicBool>,
    screenshots_taken: AtomicI64,
}

impl RunContext {
    pub fn new(settings: RunSettings, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            settings,
            executor,
            store: Mutex::new(HashMap::new()),
            sessions: SessionRegistry::new(),
            stopped: Arc::new(AtomicBool::new(false)),
            screenshots_taken: AtomicI64::new(0),
        }
    }

    pub fn executor(&self) -> &dyn StepExecutor {
        self.executor.as_ref()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }

    pub fn persistent_get(&self, key: &str) -> Option<Value> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn persistent_set(&self, key: &str, value: Value) {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    pub fn screenshots_taken(&self) -> i64 {
        self.screenshots_taken.load(Ordering::SeqCst)
    }

    /// Claims one slot of the screenshot budget.
    pub(crate) fn reserve_screenshot(&self) -> bool {
        let max = self.settings.max_screenshots;
        self.screenshots_taken
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |taken| {
                (max == UNLIMITED_SCREENSHOTS || taken < max).then_some(taken + 1)
            })
            .is_ok()
    }

    /// Gives back budget slots, e.g. after pruning a branch's screenshots.
    pub(crate) fn release_screenshots(&self, count: i64) {
        let _ = self
            .screenshots_taken
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |taken| {
                Some((taken - count).max(0))
            });
    }
}

/// Variables visible to one execution unit.
///
/// Globals live for the whole branch. Locals are scoped by function depth:
/// scope `n` belongs to steps at branch depth `n`.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    global: HashMap<String, String>,
    locals: Vec<HashMap<String, String>>,
}

impl Variables {
    /// Looks a name up in the current local scope, then in the globals.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.locals
            .last()
            .and_then(|scope| scope.get(name))
            .or_else(|| self.global.get(name))
            .map(String::as_str)
    }

    pub fn get_scoped(&self, name: &str, is_local: bool) -> Option<&str> {
        if is_local {
            self.locals.last().and_then(|s| s.get(name)).map(String::as_str)
        } else {
            self.global.get(name).map(String::as_str)
        }
    }

    pub fn set_global(&mut self, name: &str, value: &str) {
        self.global.insert(name.to_string(), value.to_string());
    }

    /// Sets a local in the scope of `depth`.
    pub fn set_local(&mut self, depth: usize, name: &str, value: &str) {
        while self.locals.len() <= depth {
            self.locals.push(HashMap::new());
        }
        self.locals[depth].insert(name.to_string(), value.to_string());
    }

    /// Makes `depth` the current scope, dropping deeper ones.
    pub(crate) fn enter_depth(&mut self, depth: usize) {
        self.locals.truncate(depth + 1);
        while self.locals.len() < depth + 1 {
            self.locals.push(HashMap::new());
        }
    }

    /// All visible variables; locals shadow globals.
    pub fn visible(&self) -> Vec<(&str, &str)> {
        let mut merged: HashMap<&str, &str> = self
            .global
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if let Some(scope) = self.locals.last() {
            merged.extend(scope.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        let mut vars: Vec<_> = merged.into_iter().collect();
        vars.sort();
        vars
    }

    pub fn clear(&mut self) {
        self.global.clear();
        self.locals.clear();
    }
}

/// What a step's action can see and touch.
pub struct StepContext<'a> {
    run: &'a RunContext,
    vars: &'a Variables,
    browser: &'a mut Option<Arc<dyn BrowserSession>>,
}

impl<'a> StepContext<'a> {
    pub fn new(
        run: &'a RunContext,
        vars: &'a Variables,
        browser: &'a mut Option<Arc<dyn BrowserSession>>,
    ) -> Self {
        Self { run, vars, browser }
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name)
    }

    pub fn variables(&self) -> Vec<(&str, &str)> {
        self.vars.visible()
    }

    pub fn settings(&self) -> &RunSettings {
        &self.run.settings
    }

    pub fn persistent_get(&self, key: &str) -> Option<Value> {
        self.run.persistent_get(key)
    }

    pub fn persistent_set(&self, key: &str, value: Value) {
        self.run.persistent_set(key, value)
    }

    pub fn is_stopped(&self) -> bool {
        self.run.is_stopped()
    }

    /// Opens a session, registers it run-wide and makes it this unit's browser.
    pub fn open_browser(&mut self, session: Arc<dyn BrowserSession>) -> Result<(), BrowserError> {
        session.open(&self.run.settings.browser)?;
        self.run.sessions().register(Arc::clone(&session));
        if let Some(previous) = self.browser.replace(session) {
            close_session(self.run, &previous);
        }
        Ok(())
    }

    pub fn browser(&self) -> Option<Arc<dyn BrowserSession>> {
        self.browser.clone()
    }

    pub fn close_browser(&mut self) {
        if let Some(session) = self.browser.take() {
            close_session(self.run, &session);
        }
    }
}

/// Closes and deregisters a session, ignoring close errors.
pub(crate) fn close_session(run: &RunContext, session: &Arc<dyn BrowserSession>) {
    run.sessions().remove(session);
    if let Err(e) = session.close() {
        debug!("Ignoring error while closing browser session: {}", e);
    }
}
