//! Step Tree
//!
//! This module contains the authored step tree and branch generation:
//!
//! - [`model`]: Arena-backed tree, step groups and run-wide flags
//! - [`step`]: Steps, modifiers, bindings and cloning
//! - [`matching`]: Function call / declaration matching
//! - [`branch`]: Branches produced by generation
//! - [`generator`]: Expansion of the tree into branches
//! - [`parser`]: YAML loader

pub mod branch;
pub mod generator;
pub mod matching;
pub mod model;
pub mod parser;
pub mod step;

pub use branch::{Branch, BranchStatus, Frequency};
pub use generator::GenerateOptions;
pub use matching::{ArgumentValue, FunctionArgument};
pub use model::{Elapsed, GroupId, Node, StepDataMode, StepGroup, StepId, Tree};
pub use parser::{load_tree, parse_tree};
pub use step::{Modifier, Modifiers, Step, StepRole, StepState, VarBinding};
