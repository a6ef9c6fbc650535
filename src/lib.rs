//! TreeRunner - Declarative Test Execution Engine
//!
//! Tests are written as a tree of steps. Every root-to-leaf path through the
//! tree becomes a branch: an independent, linear test that runs in parallel
//! with the others. Function declarations, step groups and modifiers shape
//! how the tree expands.
//!
//! # Architecture
//!
//! The library is organized into five main modules:
//!
//! - [`tree`]: The authored step tree, YAML loading and branch generation
//! - [`execution`]: Runner, execution units, configuration and step executors
//! - [`browser`]: The browser session seam and screenshot files
//! - [`report`]: JSON run reports
//! - [`error`]: Error types shared by the modules above
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use treerunner::execution::{RunConfig, Runner, ShellExecutor};
//! use treerunner::load_tree;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a step tree from YAML
//!     let tree = load_tree("login.yaml")?;
//!
//!     // Generate branches and run them
//!     let config = RunConfig::default();
//!     let mut runner = Runner::new(tree, config, Arc::new(ShellExecutor::new()))?;
//!     let complete = runner.run()?;
//!     if !complete {
//!         runner.stop();
//!     }
//!     Ok(())
//! }
//! ```

pub mod browser;
pub mod error;
pub mod execution;
pub mod report;
pub mod tree;

// Re-export commonly used types
pub use execution::{RunConfig, Runner, ShellExecutor};
pub use tree::parser::load_tree;
pub use tree::{Branch, Step, Tree};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "TreeRunner";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "TreeRunner");
    }

    #[test]
    fn test_module_exports_step() {
        let step = Step::new("Open the login page");
        assert_eq!(step.text, "Open the login page");
        assert!(step.vars_being_set.is_empty());
    }

    #[test]
    fn test_module_exports_tree() {
        let tree = Tree::new();
        assert!(tree.branches.is_empty());
        assert_eq!(tree.step_count(), 1);
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
