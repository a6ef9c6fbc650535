//! Browser Collaborator
//!
//! The runner never drives a browser itself. Step executors open sessions
//! through [`BrowserSession`] implementations, and the runner keeps a
//! run-wide [`SessionRegistry`] so that a stop can tear every session down.
//!
//! - [`BrowserSession`]: the adapter contract
//! - [`BrowserConfig`]: launch settings resolved from the run configuration
//! - [`screenshots`]: artifact naming, persistence and pruning

pub mod screenshots;

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use screenshots::{Phase, Screenshot};

/// Error reported by a browser adapter.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[error("{0}")]
pub struct BrowserError(pub String);

impl BrowserError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Settings handed to [`BrowserSession::open`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowserConfig {
    pub name: Option<String>,
    pub headless: bool,
    pub server_url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Resolves the headless tri-state.
///
/// An explicit override always wins. Otherwise sessions are headless unless
/// the tree contains a debug branch.
pub fn resolve_headless(override_value: Option<bool>, is_debug: bool) -> bool {
    override_value.unwrap_or(!is_debug)
}

/// Contract for a browser automation adapter.
pub trait BrowserSession: Send + Sync {
    fn open(&self, config: &BrowserConfig) -> Result<(), BrowserError>;

    fn close(&self) -> Result<(), BrowserError>;

    fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    fn execute_script(&self, script: &str, args: &[Value]) -> Result<Value, BrowserError>;

    fn execute_async_script(&self, script: &str, args: &[Value]) -> Result<Value, BrowserError>;

    /// Captures the current page. `Ok(None)` means nothing was captured.
    fn take_screenshot(&self, is_after_action: bool) -> Result<Option<Screenshot>, BrowserError>;

    fn mock_time(&self, time: DateTime<Utc>) -> Result<(), BrowserError>;

    fn mock_http(&self, method: &str, url: &str, response: &Value) -> Result<(), BrowserError>;

    fn mock_http_configure(&self, config: &Value) -> Result<(), BrowserError>;

    fn mock_time_stop(&self) -> Result<(), BrowserError>;

    fn mock_http_stop(&self) -> Result<(), BrowserError>;

    /// Stops all mocks.
    fn mock_stop(&self) -> Result<(), BrowserError> {
        self.mock_time_stop()?;
        self.mock_http_stop()
    }
}

/// Run-wide list of open sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<Vec<Arc<dyn BrowserSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<dyn BrowserSession>) {
        self.lock().push(session);
    }

    /// Removes a session by identity. Returns false if it was not registered.
    pub fn remove(&self, session: &Arc<dyn BrowserSession>) -> bool {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|s| !Arc::ptr_eq(s, session));
        sessions.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes and forgets every registered session. Close failures are ignored.
    pub fn quit_all(&self) -> usize {
        let sessions: Vec<_> = self.lock().drain(..).collect();
        let count = sessions.len();

        for session in sessions {
            if let Err(e) = session.close() {
                debug!("Ignoring error while closing browser session: {}", e);
            }
        }

        if count > 0 {
            info!("Closed {} browser session(s)", count);
        }
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn BrowserSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// In-memory session used by tests across the crate.
    #[derive(Default)]
    pub struct FakeBrowser {
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
        pub fail_close: bool,
        pub screenshots: bool,
    }

    impl FakeBrowser {
        pub fn with_screenshots() -> Self {
            Self {
                screenshots: true,
                ..Self::default()
            }
        }
    }

    impl BrowserSession for FakeBrowser {
        fn open(&self, _config: &BrowserConfig) -> Result<(), BrowserError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&self) -> Result<(), BrowserError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(BrowserError::new("driver already gone"))
            } else {
                Ok(())
            }
        }

        fn navigate(&self, _url: &str) -> Result<(), BrowserError> {
            Ok(())
        }

        fn execute_script(&self, _script: &str, _args: &[Value]) -> Result<Value, BrowserError> {
            Ok(Value::Null)
        }

        fn execute_async_script(
            &self,
            _script: &str,
            _args: &[Value],
        ) -> Result<Value, BrowserError> {
            Ok(Value::Null)
        }

        fn take_screenshot(&self, _after: bool) -> Result<Option<Screenshot>, BrowserError> {
            if self.screenshots {
                Ok(Some(Screenshot::new(vec![0xff, 0xd8, 0xff], "jpg")))
            } else {
                Ok(None)
            }
        }

        fn mock_time(&self, _time: DateTime<Utc>) -> Result<(), BrowserError> {
            Ok(())
        }

        fn mock_http(&self, _m: &str, _u: &str, _r: &Value) -> Result<(), BrowserError> {
            Ok(())
        }

        fn mock_http_configure(&self, _config: &Value) -> Result<(), BrowserError> {
            Ok(())
        }

        fn mock_time_stop(&self) -> Result<(), BrowserError> {
            Ok(())
        }

        fn mock_http_stop(&self) -> Result<(), BrowserError> {
            Ok(())
        }
    }
}
