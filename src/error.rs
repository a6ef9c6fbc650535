//! Error Types
//!
//! Every fallible layer of the runner has its own error enum:
//!
//! - [`GenerationError`]: fatal problems found while expanding the tree into branches
//! - [`LoadError`]: the tree file could not be read or is malformed
//! - [`ConfigError`]: invalid run configuration values
//! - [`StepError`]: a step's action failed (captured, never propagated past its branch)
//! - [`RunError`]: the runner was driven in a state that does not allow the operation

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::browser::BrowserError;

/// Source position of an authored step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Location {
    pub filename: Option<String>,
    pub line: Option<usize>,
}

impl Location {
    pub fn new(filename: Option<&str>, line: Option<usize>) -> Self {
        Self {
            filename: filename.map(str::to_string),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.filename, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}", file, line),
            (Some(file), None) => write!(f, "{}", file),
            (None, Some(line)) => write!(f, "line {}", line),
            (None, None) => write!(f, "<unknown>"),
        }
    }
}

/// Fatal errors raised while generating branches.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error(
        "the function call '{call}' matches the declaration '{declaration}' only when \
         ignoring case [{location}]"
    )]
    AmbiguousFunctionMatch {
        call: String,
        declaration: String,
        location: Location,
    },

    #[error("function declaration for '{call}' not found [{location}]")]
    FunctionNotFound { call: String, location: Location },

    #[error("the function '{declaration}' calls itself [{location}]")]
    InfiniteRecursion {
        declaration: String,
        location: Location,
    },

    #[error("a debug modifier is not allowed when debugging is disabled [{location}]")]
    DebugNotAllowed { location: Location },

    #[error("an only modifier is not allowed when debugging is disabled [{location}]")]
    OnlyNotAllowed { location: Location },

    #[error("invalid frequency '{value}', expected high, med or low [{location}]")]
    InvalidFrequency { value: String, location: Location },
}

/// Errors while loading a tree file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("step '{text}' is a {hook} hook and must have a code block")]
    HookWithoutCode { text: String, hook: &'static str },

    #[error("group member '{text}' cannot have its own children, attach them to the group")]
    GroupMemberChildren { text: String },

    #[error("step group is empty")]
    EmptyGroup,
}

/// Errors in the run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),

    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// The error captured on a step when its action fails.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
pub enum StepError {
    #[error("{0}")]
    Action(String),

    #[error("script exited with status {code:?}: {stderr}")]
    Script { code: Option<i32>, stderr: String },

    #[error("variable '{0}' is not set")]
    UndefinedVariable(String),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Errors from the report writer.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("report serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by the runner's control operations.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot run a stopped runner")]
    Stopped,

    #[error("must be paused to {0}")]
    NotPaused(&'static str),

    #[error("no step has been run yet")]
    NoLastStep,

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        assert_eq!(Location::new(Some("a.yaml"), Some(4)).to_string(), "a.yaml:4");
        assert_eq!(Location::new(Some("a.yaml"), None).to_string(), "a.yaml");
        assert_eq!(Location::new(None, Some(9)).to_string(), "line 9");
        assert_eq!(Location::default().to_string(), "<unknown>");
    }

    #[test]
    fn test_generation_error_names_both_texts() {
        let err = GenerationError::AmbiguousFunctionMatch {
            call: "step name here".to_string(),
            declaration: "Step name here".to_string(),
            location: Location::new(Some("tree.yaml"), Some(3)),
        };
        let msg = err.to_string();
        assert!(msg.contains("step name here"));
        assert!(msg.contains("Step name here"));
        assert!(msg.contains("tree.yaml:3"));
    }

    #[test]
    fn test_config_error_invalid() {
        let err = ConfigError::invalid("minFrequency", "ultra", "expected high, med or low");
        assert!(err.to_string().contains("ultra"));
    }

    #[test]
    fn test_run_error_from_generation() {
        let err: RunError = GenerationError::DebugNotAllowed {
            location: Location::default(),
        }
        .into();
        assert!(matches!(err, RunError::Generation(_)));
    }
}
