//! Step Model
//!
//! A [`Step`] is both a node of the authored tree and the unit that gets
//! cloned into branches. Authored steps own their tree links (parent,
//! children, group, resolved declaration); branch clones own none of them
//! and only remember the authored step they came from.
//!
//! # Example
//!
//! ```
//! use treerunner::tree::{Modifier, Step};
//!
//! let step = Step::new("Log in as 'admin'")
//!     .as_function_call()
//!     .with_modifier(Modifier::NonParallel);
//!
//! let clone = step.clone_for_branch();
//! assert!(clone.modifiers.non_parallel);
//! ```

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::matching::{self, FunctionArgument, FunctionMatch, STRING_LITERAL};
use super::model::{GroupId, Node, StepId};
use crate::error::{GenerationError, Location, StepError};

/// Start of a binding: `{var} =` or `{{var}} =`.
static BINDING_HEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\{\{[^{}\\]+\}\}|\{[^{}\\]+\})\s*=\s*").unwrap());

/// One of the eight structural modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    ToDo,
    Manual,
    Debug,
    Only,
    NonParallel,
    Sequential,
    ExpectedFail,
    BuiltIn,
}

impl Modifier {
    pub const ALL: [Modifier; 8] = [
        Modifier::ToDo,
        Modifier::Manual,
        Modifier::Debug,
        Modifier::Only,
        Modifier::NonParallel,
        Modifier::Sequential,
        Modifier::ExpectedFail,
        Modifier::BuiltIn,
    ];
}

/// Structural modifiers of a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub to_do: bool,
    pub manual: bool,
    pub debug: bool,
    pub only: bool,
    pub non_parallel: bool,
    pub sequential: bool,
    pub expected_fail: bool,
    pub built_in: bool,
}

impl Modifiers {
    pub fn get(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::ToDo => self.to_do,
            Modifier::Manual => self.manual,
            Modifier::Debug => self.debug,
            Modifier::Only => self.only,
            Modifier::NonParallel => self.non_parallel,
            Modifier::Sequential => self.sequential,
            Modifier::ExpectedFail => self.expected_fail,
            Modifier::BuiltIn => self.built_in,
        }
    }

    pub fn set(&mut self, modifier: Modifier, value: bool) {
        let flag = match modifier {
            Modifier::ToDo => &mut self.to_do,
            Modifier::Manual => &mut self.manual,
            Modifier::Debug => &mut self.debug,
            Modifier::Only => &mut self.only,
            Modifier::NonParallel => &mut self.non_parallel,
            Modifier::Sequential => &mut self.sequential,
            Modifier::ExpectedFail => &mut self.expected_fail,
            Modifier::BuiltIn => &mut self.built_in,
        };
        *flag = value;
    }

    /// OR-combines every modifier of `other` into `self`.
    pub fn merge(&mut self, other: &Modifiers) {
        for modifier in Modifier::ALL {
            if other.get(modifier) {
                self.set(modifier, true);
            }
        }
    }

    pub fn active(&self) -> Vec<Modifier> {
        Modifier::ALL.into_iter().filter(|m| self.get(*m)).collect()
    }
}

/// What kind of step this is. The roles are mutually exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRole {
    /// Root, code-block steps and literal assignments.
    #[default]
    Plain,
    Textual,
    #[serde(alias = "declaration")]
    FunctionDeclaration,
    #[serde(alias = "call")]
    FunctionCall,
}

/// A `{name} = value` or `{{name}} = value` binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBinding {
    pub name: String,
    /// Source text of the value (a string literal or a function call)
    pub value: String,
    pub is_local: bool,
}

impl VarBinding {
    pub fn is_literal(&self) -> bool {
        matching::is_string_literal(&self.value)
    }

    /// Parses the bindings a step sets.
    ///
    /// Several string literals may be set at once, separated by commas. A
    /// non-literal value is a function call and must be the only binding.
    /// Returns an empty list when the text is not an assignment.
    pub fn parse_all(text: &str) -> Vec<VarBinding> {
        let mut rest = text.trim();
        let mut bindings = Vec::new();

        loop {
            let Some(head) = BINDING_HEAD.captures(rest) else {
                return Vec::new();
            };
            let Some((name, is_local)) = matching::parse_variable(&head[1]) else {
                return Vec::new();
            };
            rest = &rest[head[0].len()..];

            let literal = STRING_LITERAL.find(rest).filter(|m| m.start() == 0);
            match literal {
                Some(m) => {
                    bindings.push(VarBinding {
                        name,
                        value: m.as_str().to_string(),
                        is_local,
                    });
                    rest = rest[m.end()..].trim_start();
                    if rest.is_empty() {
                        return bindings;
                    }
                    match rest.strip_prefix(',') {
                        Some(next) => rest = next.trim_start(),
                        None => return Vec::new(),
                    }
                }
                None => {
                    if !bindings.is_empty() || rest.trim().is_empty() {
                        return Vec::new();
                    }
                    bindings.push(VarBinding {
                        name,
                        value: rest.trim().to_string(),
                        is_local,
                    });
                    return bindings;
                }
            }
        }
    }
}

/// Execution state of a branch clone (or hook step).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepState {
    pub is_running: bool,
    pub is_passed: bool,
    pub is_failed: bool,
    pub is_skipped: bool,
    /// Whether the outcome agrees with the expected-fail modifier
    pub as_expected: bool,
    pub error: Option<StepError>,
    pub log: String,
    pub elapsed: Option<Duration>,
}

impl StepState {
    pub fn is_complete(&self) -> bool {
        self.is_passed || self.is_failed || self.is_skipped
    }

    pub fn reset(&mut self) {
        *self = StepState::default();
    }
}

/// A node of the step tree.
#[derive(Debug, Clone, Default)]
pub struct Step {
    pub filename: Option<String>,
    pub line: Option<usize>,
    pub text: String,
    pub code_block: Option<String>,
    pub comment: Option<String>,
    pub modifiers: Modifiers,
    pub role: StepRole,
    pub vars_being_set: Vec<VarBinding>,

    /// Raw text of the resolved declaration, kept on calls for reporting
    pub function_declaration_text: Option<String>,
    /// Parameters bound when a declaration was merged in
    pub arguments: Vec<FunctionArgument>,
    /// Function nesting depth inside a branch
    pub branch_indents: usize,

    pub(crate) tree_id: Option<StepId>,
    pub(crate) parent: Option<Node>,
    pub(crate) children: Vec<Node>,
    pub(crate) containing_group: Option<GroupId>,
    pub(crate) function_declaration: Option<StepId>,
    pub(crate) origin: Option<StepId>,

    pub state: StepState,
}

impl Step {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into().trim().to_string();
        Self {
            vars_being_set: VarBinding::parse_all(&text),
            text,
            ..Self::default()
        }
    }

    /// Creates a step and infers its role the way authored steps are read.
    ///
    /// Literal-only assignments and code-block steps are plain; everything
    /// else is a function call.
    pub fn from_text(text: impl Into<String>, code_block: Option<String>) -> Self {
        let mut step = Step::new(text);
        let literal_assignment = !step.vars_being_set.is_empty()
            && step.vars_being_set.iter().all(VarBinding::is_literal);

        step.role = if literal_assignment || code_block.is_some() {
            StepRole::Plain
        } else {
            StepRole::FunctionCall
        };
        step.code_block = code_block;
        step
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code_block = Some(code.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_location(mut self, filename: impl Into<String>, line: usize) -> Self {
        self.filename = Some(filename.into());
        self.line = Some(line);
        self
    }

    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.set(modifier, true);
        self
    }

    pub fn with_role(mut self, role: StepRole) -> Self {
        self.role = role;
        self
    }

    pub fn as_function_call(self) -> Self {
        self.with_role(StepRole::FunctionCall)
    }

    pub fn as_function_declaration(self) -> Self {
        self.with_role(StepRole::FunctionDeclaration)
    }

    pub fn as_textual(self) -> Self {
        self.with_role(StepRole::Textual)
    }

    pub fn is_function_call(&self) -> bool {
        self.role == StepRole::FunctionCall
    }

    pub fn is_function_declaration(&self) -> bool {
        self.role == StepRole::FunctionDeclaration
    }

    pub fn is_textual(&self) -> bool {
        self.role == StepRole::Textual
    }

    pub fn location(&self) -> Location {
        Location::new(self.filename.as_deref(), self.line)
    }

    /// Arena index of this step, for authored steps.
    pub fn tree_id(&self) -> Option<StepId> {
        self.tree_id
    }

    /// The authored step this clone descends from.
    pub fn origin(&self) -> Option<StepId> {
        self.origin
    }

    pub fn parent(&self) -> Option<Node> {
        self.parent
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn containing_group(&self) -> Option<GroupId> {
        self.containing_group
    }

    pub fn function_declaration(&self) -> Option<StepId> {
        self.function_declaration
    }

    /// Text used to look up the function this step calls.
    pub fn function_call_text(&self) -> &str {
        match self.vars_being_set.as_slice() {
            [binding] if self.is_function_call() => &binding.value,
            _ => &self.text,
        }
    }

    /// Copies this step for use inside a branch.
    ///
    /// Tree links are dropped; the origin always points at the authored step,
    /// also when cloning a clone.
    pub fn clone_for_branch(&self) -> Step {
        Step {
            parent: None,
            children: Vec::new(),
            containing_group: None,
            function_declaration: None,
            origin: self.origin.or(self.tree_id),
            tree_id: None,
            ..self.clone()
        }
    }

    /// Clones a declaration as a call to itself.
    pub fn clone_as_function_call(&self) -> Step {
        let mut step = self.clone_for_branch();
        step.role = StepRole::FunctionCall;
        step
    }

    /// Resolves this call against `declaration`.
    pub fn merge_in_function_declaration(&mut self, declaration: &Step) {
        self.modifiers.merge(&declaration.modifiers);
        if let Some(code) = &declaration.code_block {
            self.code_block = Some(code.clone());
        }
        self.function_declaration_text = Some(declaration.text.clone());
        self.arguments =
            matching::extract_arguments(&declaration.text, self.function_call_text());
    }

    /// Whether this call refers to `declaration`.
    pub fn is_function_match(&self, declaration: &Step) -> Result<bool, GenerationError> {
        match matching::match_function(self.function_call_text(), &declaration.text) {
            FunctionMatch::Exact => Ok(true),
            FunctionMatch::None => Ok(false),
            FunctionMatch::CaseMismatch => Err(GenerationError::AmbiguousFunctionMatch {
                call: self.function_call_text().to_string(),
                declaration: declaration.text.clone(),
                location: self.location(),
            }),
        }
    }

    pub fn append_to_log(&mut self, text: &str) {
        self.state.log.push_str(text);
        self.state.log.push('\n');
    }

    /// A completed step whose outcome contradicts its expected-fail modifier.
    pub fn failed_unexpectedly(&self) -> bool {
        self.state.is_complete() && !self.state.is_skipped && !self.state.as_expected
    }

    /// A to-do or manual step that was not run.
    pub fn is_placeholder_skip(&self) -> bool {
        self.state.is_skipped && (self.modifiers.to_do || self.modifiers.manual)
    }
}
