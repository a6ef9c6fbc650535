//! Tree Data Model
//!
//! The authored tree is an arena: steps and step groups live in vectors and
//! refer to each other by [`StepId`] / [`GroupId`]. The arena is built once
//! (by the YAML loader or by hand), then [`Tree::generate`] derives the
//! branch list from it.
//!
//! # Example
//!
//! ```
//! use treerunner::tree::{GenerateOptions, Node, Step, Tree};
//!
//! let mut tree = Tree::new();
//! let root = Node::Step(tree.root());
//! let open = tree.add_step(root, Step::new("Open app").with_code("true"));
//! tree.add_group(
//!     Node::Step(open),
//!     vec![
//!         Step::new("Log in").with_code("true"),
//!         Step::new("Sign up").with_code("true"),
//!     ],
//!     false,
//! );
//!
//! tree.generate(&GenerateOptions::default()).unwrap();
//! assert_eq!(tree.branches.len(), 2);
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::branch::Branch;
use super::step::Step;
use crate::error::ConfigError;

/// Index of a step in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StepId(pub usize);

/// Index of a step group in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupId(pub usize);

/// A child slot: either a single step or a group of alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Step(StepId),
    Group(GroupId),
}

/// Sibling steps sharing one parent and one list of children.
#[derive(Debug, Clone, Default)]
pub struct StepGroup {
    pub members: Vec<StepId>,
    pub parent: Option<Node>,
    pub children: Vec<Node>,
    pub is_sequential: bool,
}

/// Elapsed time of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Elapsed {
    #[default]
    NotMeasured,
    Measured(Duration),
    /// The run paused, so wall-clock time says nothing about execution time
    Unmeasurable,
}

impl Elapsed {
    /// Milliseconds, with `-1` for an unmeasurable run.
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Elapsed::NotMeasured => None,
            Elapsed::Measured(d) => Some(d.as_millis() as i64),
            Elapsed::Unmeasurable => Some(-1),
        }
    }
}

/// Which per-step data (screenshots) to keep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepDataMode {
    #[default]
    All,
    /// Only keep data of failed branches
    Fail,
    None,
}

impl FromStr for StepDataMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(StepDataMode::All),
            "fail" => Ok(StepDataMode::Fail),
            "none" => Ok(StepDataMode::None),
            _ => Err(ConfigError::invalid("stepDataMode", s, "expected all, fail or none")),
        }
    }
}

impl fmt::Display for StepDataMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepDataMode::All => "all",
            StepDataMode::Fail => "fail",
            StepDataMode::None => "none",
        };
        write!(f, "{}", name)
    }
}

/// The authored step tree plus the branches derived from it.
#[derive(Debug, Clone)]
pub struct Tree {
    steps: Vec<Step>,
    groups: Vec<StepGroup>,

    pub before_everything: Vec<Step>,
    pub after_everything: Vec<Step>,
    pub branches: Vec<Branch>,

    pub time_started: Option<DateTime<Utc>>,
    pub elapsed: Elapsed,

    /// Set by generation when a debug branch exists
    pub is_debug: bool,
    pub is_express_debug: bool,
    pub step_data_mode: StepDataMode,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Creates a tree holding only the root step.
    pub fn new() -> Self {
        let root = Step {
            tree_id: Some(StepId(0)),
            ..Step::default()
        };

        Self {
            steps: vec![root],
            groups: Vec::new(),
            before_everything: Vec::new(),
            after_everything: Vec::new(),
            branches: Vec::new(),
            time_started: None,
            elapsed: Elapsed::NotMeasured,
            is_debug: false,
            is_express_debug: false,
            step_data_mode: StepDataMode::All,
        }
    }

    pub fn root(&self) -> StepId {
        StepId(0)
    }

    pub fn step(&self, id: StepId) -> &Step {
        &self.steps[id.0]
    }

    pub(crate) fn step_mut(&mut self, id: StepId) -> &mut Step {
        &mut self.steps[id.0]
    }

    pub fn group(&self, id: GroupId) -> &StepGroup {
        &self.groups[id.0]
    }

    /// All authored steps, root first.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Attaches a step under a step or a group.
    pub fn add_step(&mut self, parent: Node, mut step: Step) -> StepId {
        let id = StepId(self.steps.len());
        step.tree_id = Some(id);
        step.parent = Some(parent);
        step.origin = None;
        self.steps.push(step);
        self.children_mut(parent).push(Node::Step(id));
        id
    }

    /// Attaches a group of alternative steps under a step or a group.
    pub fn add_group(&mut self, parent: Node, members: Vec<Step>, is_sequential: bool) -> GroupId {
        let group_id = GroupId(self.groups.len());
        let mut member_ids = Vec::with_capacity(members.len());

        for mut step in members {
            let id = StepId(self.steps.len());
            step.tree_id = Some(id);
            step.parent = None;
            step.containing_group = Some(group_id);
            step.origin = None;
            self.steps.push(step);
            member_ids.push(id);
        }

        self.groups.push(StepGroup {
            members: member_ids,
            parent: Some(parent),
            children: Vec::new(),
            is_sequential,
        });
        self.children_mut(parent).push(Node::Group(group_id));
        group_id
    }

    pub fn add_before_everything(&mut self, step: Step) {
        self.before_everything.push(step);
    }

    pub fn add_after_everything(&mut self, step: Step) {
        self.after_everything.push(step);
    }

    pub fn children_of(&self, node: Node) -> &[Node] {
        match node {
            Node::Step(id) => &self.steps[id.0].children,
            Node::Group(id) => &self.groups[id.0].children,
        }
    }

    fn children_mut(&mut self, node: Node) -> &mut Vec<Node> {
        match node {
            Node::Step(id) => &mut self.steps[id.0].children,
            Node::Group(id) => &mut self.groups[id.0].children,
        }
    }

    /// The node whose children list contains `node`.
    ///
    /// Group members are attached through their group, so their container is
    /// the group's parent.
    pub fn container_of(&self, node: Node) -> Option<Node> {
        match node {
            Node::Step(id) => {
                let step = &self.steps[id.0];
                match step.containing_group {
                    Some(group) => self.groups[group.0].parent,
                    None => step.parent,
                }
            }
            Node::Group(id) => self.groups[id.0].parent,
        }
    }

    /// Containers searched for declarations visible from `from`, innermost first.
    pub fn lexical_scopes(&self, from: StepId) -> Vec<Node> {
        let mut scopes = Vec::new();
        let mut cursor = self.container_of(Node::Step(from));

        while let Some(node) = cursor {
            scopes.push(node);
            cursor = self.container_of(node);
        }

        if scopes.is_empty() {
            scopes.push(Node::Step(self.root()));
        }
        scopes
    }

    /// Function declarations directly inside `container`, including group members.
    pub fn declarations_in(&self, container: Node) -> Vec<StepId> {
        let mut found = Vec::new();
        for child in self.children_of(container) {
            match *child {
                Node::Step(id) if self.step(id).is_function_declaration() => found.push(id),
                Node::Step(_) => {}
                Node::Group(group) => found.extend(
                    self.group(group)
                        .members
                        .iter()
                        .copied()
                        .filter(|id| self.step(*id).is_function_declaration()),
                ),
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tree_has_root() {
        let tree = Tree::new();
        assert_eq!(tree.step_count(), 1);
        assert_eq!(tree.step(tree.root()).tree_id(), Some(StepId(0)));
        assert!(tree.branches.is_empty());
        assert_eq!(tree.elapsed, Elapsed::NotMeasured);
    }

    #[test]
    fn test_add_step_links_parent_and_child() {
        let mut tree = Tree::new();
        let a = tree.add_step(Node::Step(tree.root()), Step::new("A"));
        let b = tree.add_step(Node::Step(a), Step::new("B"));

        assert_eq!(tree.step(b).parent(), Some(Node::Step(a)));
        assert_eq!(tree.step(a).children(), &[Node::Step(b)]);
        assert_eq!(tree.step(b).tree_id(), Some(b));
    }

    #[test]
    fn test_add_group_members() {
        let mut tree = Tree::new();
        let a = tree.add_step(Node::Step(tree.root()), Step::new("A"));
        let g = tree.add_group(Node::Step(a), vec![Step::new("B"), Step::new("C")], false);
        let d = tree.add_step(Node::Group(g), Step::new("D"));

        let group = tree.group(g);
        assert_eq!(group.members.len(), 2);
        assert_eq!(group.parent, Some(Node::Step(a)));
        assert_eq!(group.children, vec![Node::Step(d)]);

        let member = tree.step(group.members[0]);
        assert_eq!(member.containing_group(), Some(g));
        assert_eq!(member.parent(), None);
        assert_eq!(tree.container_of(Node::Step(group.members[0])), Some(Node::Step(a)));
    }

    #[test]
    fn test_lexical_scopes() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.add_step(Node::Step(root), Step::new("A"));
        let g = tree.add_group(Node::Step(a), vec![Step::new("B")], false);
        let d = tree.add_step(Node::Group(g), Step::new("D"));

        assert_eq!(
            tree.lexical_scopes(d),
            vec![Node::Group(g), Node::Step(a), Node::Step(root)]
        );
        assert_eq!(tree.lexical_scopes(root), vec![Node::Step(root)]);
    }

    #[test]
    fn test_declarations_in_container() {
        let mut tree = Tree::new();
        let root = Node::Step(tree.root());
        let decl = tree.add_step(root, Step::new("F").as_function_declaration());
        tree.add_step(root, Step::new("F").as_function_call());
        let g = tree.add_group(
            root,
            vec![Step::new("G").as_function_declaration(), Step::new("X")],
            false,
        );

        let found = tree.declarations_in(root);
        assert_eq!(found, vec![decl, tree.group(g).members[0]]);
    }

    #[test]
    fn test_step_data_mode_parse() {
        assert_eq!("fail".parse::<StepDataMode>().unwrap(), StepDataMode::Fail);
        assert_eq!(" ALL ".parse::<StepDataMode>().unwrap(), StepDataMode::All);
        assert!("sometimes".parse::<StepDataMode>().is_err());
        assert_eq!(StepDataMode::None.to_string(), "none");
    }

    #[test]
    fn test_elapsed_millis() {
        assert_eq!(Elapsed::NotMeasured.as_millis(), None);
        assert_eq!(Elapsed::Unmeasurable.as_millis(), Some(-1));
        assert_eq!(Elapsed::Measured(Duration::from_millis(1500)).as_millis(), Some(1500));
    }
}
