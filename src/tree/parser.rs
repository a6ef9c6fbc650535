//! Tree Loader
//!
//! Reads a step tree from YAML.
//!
//! # Example YAML Format
//!
//! ```yaml
//! before_everything:
//!   - text: Start fixtures server
//!     code: ./fixtures.sh start
//!
//! after_everything:
//!   - text: Stop fixtures server
//!     code: ./fixtures.sh stop
//!
//! steps:
//!   - text: Log in as {{user}}
//!     kind: declaration
//!     code: ./login.sh "$USER"
//!
//!   - text: Open the app
//!     code: ./open.sh
//!     children:
//!       - group:
//!           - text: Log in as 'admin'
//!           - text: Log in as 'guest'
//!         children:
//!           - text: "{frequency} = 'high'"
//!           - text: Check the dashboard
//!             code: ./check.sh
//!             modifiers: [expected_fail]
//! ```
//!
//! Without an explicit `kind`, literal assignments and steps with code are
//! plain steps and everything else is a function call.
//!
//! Each step records the source line of its `text:` key, unless it sets an
//! explicit `line`.

use std::fs;
use std::path::Path;

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::model::{Node, Tree};
use super::step::{Modifier, Step, StepRole};
use crate::error::LoadError;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TreeDocument {
    #[serde(default)]
    before_everything: Vec<StepDocument>,
    #[serde(default)]
    after_everything: Vec<StepDocument>,
    #[serde(default)]
    steps: Vec<NodeDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NodeDocument {
    Group(GroupDocument),
    Step(StepDocument),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupDocument {
    group: Vec<StepDocument>,
    #[serde(default)]
    sequential: bool,
    #[serde(default)]
    children: Vec<NodeDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepDocument {
    text: String,
    #[serde(default)]
    kind: Option<StepRole>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    modifiers: Vec<Modifier>,
    #[serde(default)]
    line: Option<usize>,
    #[serde(default)]
    children: Vec<NodeDocument>,
}

/// Matches a `text:` key, optionally as the first key of a list item.
static TEXT_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:-\s+)*text:\s*(\S.*?)\s*$").unwrap());

/// Source lines of the `text:` keys in a document.
///
/// Steps claim lines in document order by their text, so keys written in
/// any order within a step still find their own line.
struct LineIndex {
    entries: Vec<(usize, String)>,
    claimed: Vec<bool>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let entries: Vec<(usize, String)> = content
            .lines()
            .enumerate()
            .filter_map(|(i, line)| {
                let raw = TEXT_KEY.captures(line)?.get(1)?.as_str();
                let text: String = serde_yaml::from_str(raw).ok()?;
                Some((i + 1, text))
            })
            .collect();
        let claimed = vec![false; entries.len()];
        Self { entries, claimed }
    }

    /// Line of the first unclaimed `text:` key with this value.
    fn claim(&mut self, text: &str) -> Option<usize> {
        let position = self
            .entries
            .iter()
            .zip(self.claimed.iter())
            .position(|((_, t), claimed)| !claimed && t == text)?;
        self.claimed[position] = true;
        Some(self.entries[position].0)
    }
}

impl StepDocument {
    fn to_step(&self, filename: &str, lines: &mut LineIndex) -> Step {
        let mut step = Step::from_text(self.text.as_str(), self.code.clone());
        if let Some(kind) = self.kind {
            step.role = kind;
        }
        step.comment = self.comment.clone();
        step.filename = Some(filename.to_string());
        let source_line = lines.claim(&self.text);
        step.line = self.line.or(source_line);
        for modifier in &self.modifiers {
            step.modifiers.set(*modifier, true);
        }
        step
    }
}

/// Loads a tree from a YAML file.
pub fn load_tree(path: &str) -> Result<Tree, LoadError> {
    info!("Loading tree from: {}", path);

    let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_string(),
        source,
    })?;

    let filename = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path);

    let tree = parse_tree(&content, filename)?;
    info!("Loaded {} step(s)", tree.step_count() - 1);
    Ok(tree)
}

/// Builds a tree from YAML text. `filename` is recorded on every step.
pub fn parse_tree(content: &str, filename: &str) -> Result<Tree, LoadError> {
    let document: TreeDocument =
        serde_yaml::from_str(content).map_err(|source| LoadError::Yaml {
            path: filename.to_string(),
            source,
        })?;

    let mut tree = Tree::new();
    let mut lines = LineIndex::new(content);

    for hook in &document.before_everything {
        tree.add_before_everything(hook_step(hook, filename, &mut lines, "before everything")?);
    }
    for hook in &document.after_everything {
        tree.add_after_everything(hook_step(hook, filename, &mut lines, "after everything")?);
    }

    let root = Node::Step(tree.root());
    add_nodes(&mut tree, root, &document.steps, filename, &mut lines)?;

    debug!(
        "Parsed {} hook(s) and {} step(s) from {}",
        tree.before_everything.len() + tree.after_everything.len(),
        tree.step_count() - 1,
        filename
    );
    Ok(tree)
}

fn hook_step(
    document: &StepDocument,
    filename: &str,
    lines: &mut LineIndex,
    hook: &'static str,
) -> Result<Step, LoadError> {
    if document.code.is_none() {
        return Err(LoadError::HookWithoutCode {
            text: document.text.clone(),
            hook,
        });
    }
    let mut step = document.to_step(filename, lines);
    step.role = StepRole::Plain;
    Ok(step)
}

fn add_nodes(
    tree: &mut Tree,
    parent: Node,
    nodes: &[NodeDocument],
    filename: &str,
    lines: &mut LineIndex,
) -> Result<(), LoadError> {
    for node in nodes {
        match node {
            NodeDocument::Step(document) => {
                let id = tree.add_step(parent, document.to_step(filename, lines));
                add_nodes(tree, Node::Step(id), &document.children, filename, lines)?;
            }
            NodeDocument::Group(group) => {
                if group.group.is_empty() {
                    return Err(LoadError::EmptyGroup);
                }
                if let Some(member) = group.group.iter().find(|m| !m.children.is_empty()) {
                    return Err(LoadError::GroupMemberChildren {
                        text: member.text.clone(),
                    });
                }

                let members = group
                    .group
                    .iter()
                    .map(|m| m.to_step(filename, lines))
                    .collect();
                let id = tree.add_group(parent, members, group.sequential);
                add_nodes(tree, Node::Group(id), &group.children, filename, lines)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::GenerateOptions;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
before_everything:
  - text: Start server
    code: echo start
after_everything:
  - text: Stop server
    code: echo stop
steps:
  - text: Log in as {{user}}
    kind: declaration
    code: echo "$USER"
  - text: Open app
    code: echo open
    line: 9
    children:
      - group:
          - text: Log in as 'admin'
          - text: Log in as 'guest'
        children:
          - text: Check dashboard
            code: echo ok
            modifiers: [expected_fail, non_parallel]
"#;

    #[test]
    fn test_parse_sample() {
        let tree = parse_tree(SAMPLE, "sample.yaml").unwrap();

        assert_eq!(tree.before_everything.len(), 1);
        assert_eq!(tree.after_everything.len(), 1);
        // root, declaration, open, two members, check
        assert_eq!(tree.step_count(), 6);

        let open = tree.steps().find(|s| s.text == "Open app").unwrap();
        assert_eq!(open.line, Some(9));
        assert_eq!(open.filename.as_deref(), Some("sample.yaml"));
        assert_eq!(open.role, StepRole::Plain);

        let declaration = tree.steps().find(|s| s.text == "Log in as {{user}}").unwrap();
        assert!(declaration.is_function_declaration());

        let member = tree.steps().find(|s| s.text == "Log in as 'admin'").unwrap();
        assert!(member.is_function_call());
        assert!(member.containing_group().is_some());

        let check = tree.steps().find(|s| s.text == "Check dashboard").unwrap();
        assert!(check.modifiers.expected_fail);
        assert!(check.modifiers.non_parallel);
    }

    #[test]
    fn test_sample_generates_branches() {
        let mut tree = parse_tree(SAMPLE, "sample.yaml").unwrap();
        tree.generate(&GenerateOptions::default()).unwrap();

        assert_eq!(tree.branches.len(), 2);
        assert_eq!(tree.branches[0].steps[1].text, "Log in as 'admin'");
        assert_eq!(tree.branches[0].steps[1].code_block.as_deref(), Some("echo \"$USER\""));
    }

    #[test]
    fn test_lines_taken_from_source() {
        let tree = parse_tree(SAMPLE, "sample.yaml").unwrap();
        let line_of = |text: &str| tree.steps().find(|s| s.text == text).unwrap().line;

        // SAMPLE starts with a newline
        assert_eq!(line_of("Log in as {{user}}"), Some(9));
        assert_eq!(line_of("Log in as 'admin'"), Some(17));
        assert_eq!(line_of("Log in as 'guest'"), Some(18));
        assert_eq!(line_of("Check dashboard"), Some(20));
        assert_eq!(tree.before_everything[0].line, Some(3));
    }

    #[test]
    fn test_generation_errors_carry_source_line() {
        let yaml = "steps:\n  - text: Step name here\n    kind: declaration\n  - text: step name here\n";
        let mut tree = parse_tree(yaml, "t.yaml").unwrap();

        let err = tree.generate(&GenerateOptions::default()).unwrap_err();
        assert!(err.to_string().contains("t.yaml:4"), "{}", err);
    }

    #[test]
    fn test_repeated_text_gets_each_line() {
        let yaml = r#"steps:
  - code: echo one
    text: Same
  - text: Same
    code: echo two
"#;
        let tree = parse_tree(yaml, "t.yaml").unwrap();
        let lines: Vec<_> = tree.steps().filter(|s| s.text == "Same").map(|s| s.line).collect();
        assert_eq!(lines, vec![Some(3), Some(4)]);
    }

    #[test]
    fn test_hook_requires_code() {
        let yaml = "before_everything:\n  - text: Nothing\n";
        let err = parse_tree(yaml, "t.yaml").unwrap_err();
        assert!(matches!(err, LoadError::HookWithoutCode { .. }));
    }

    #[test]
    fn test_group_member_children_rejected() {
        let yaml = r#"
steps:
  - group:
      - text: A
        code: "true"
        children:
          - text: B
            code: "true"
"#;
        let err = parse_tree(yaml, "t.yaml").unwrap_err();
        assert!(matches!(err, LoadError::GroupMemberChildren { .. }));
    }

    #[test]
    fn test_sequential_group() {
        let yaml = r#"
steps:
  - group:
      - text: A
        code: "true"
      - text: B
        code: "true"
    sequential: true
"#;
        let mut tree = parse_tree(yaml, "t.yaml").unwrap();
        tree.generate(&GenerateOptions::default()).unwrap();
        assert_eq!(tree.branches.len(), 1);
        assert_eq!(tree.branches[0].steps.len(), 2);
    }

    #[test]
    fn test_invalid_yaml() {
        let err = parse_tree("steps: [", "bad.yaml").unwrap_err();
        assert!(matches!(err, LoadError::Yaml { .. }));
    }

    #[test]
    fn test_load_tree_file_not_found() {
        let err = load_tree("/nonexistent/tree.yaml").unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_load_tree_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "steps:\n  - text: Hello\n    code: echo hi").unwrap();

        let tree = load_tree(file.path().to_str().unwrap()).unwrap();
        assert_eq!(tree.step_count(), 2);
    }
}
