//! Branch Generation
//!
//! Walks the authored tree from the root and expands it into linear
//! branches:
//!
//! - a function call is replaced by a clone that inherits the declaration's
//!   modifiers and code, followed by the declaration's body
//! - a step group yields one path per member (or one combined path when
//!   sequential)
//! - a sequential step folds its whole subtree into one path
//!
//! Filters (only, debug, group names, minimum frequency, previously passed
//! hashes) are applied before the branch list is stored on the tree.

use std::collections::HashSet;

use log::{debug, info, warn};

use super::branch::{Branch, Frequency};
use super::matching::strip_quotes;
use super::model::{GroupId, Node, StepId, Tree};
use super::step::Step;
use crate::error::GenerationError;

/// Variable whose value sets a branch's frequency.
pub const FREQUENCY_VAR: &str = "frequency";

/// Variable whose value tags a branch with group names.
pub const GROUP_VAR: &str = "group";

/// Branch selection settings.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Keep only branches tagged with one of these groups
    pub groups: Option<Vec<String>>,
    pub min_frequency: Option<Frequency>,
    /// Reject debug and only modifiers
    pub no_debug: bool,
    /// Hashes of branches to leave out (e.g. ones that passed last time)
    pub skip_hashes: HashSet<String>,
}

/// A candidate branch under construction.
#[derive(Debug, Clone, Default)]
struct Path {
    steps: Vec<Step>,
    keys: Vec<StepId>,
}

impl Path {
    fn single(step: Step, key: Option<StepId>) -> Self {
        Self {
            steps: vec![step],
            keys: key.into_iter().collect(),
        }
    }

    fn concat(mut self, other: &Path) -> Self {
        self.steps.extend(other.steps.iter().cloned());
        self.keys.extend(other.keys.iter().copied());
        self
    }
}

/// Appends every tail to every head.
fn cross(heads: Vec<Path>, tails: &[Path]) -> Vec<Path> {
    if tails.is_empty() {
        return heads;
    }
    heads
        .into_iter()
        .flat_map(|head| tails.iter().map(move |tail| head.clone().concat(tail)))
        .collect()
}

/// Folds paths sharing a first step into one path.
fn flatten(paths: Vec<Path>) -> Path {
    let mut iter = paths.into_iter();
    let Some(first) = iter.next() else {
        return Path::default();
    };

    let mut combined = first;
    for path in iter {
        combined.steps.extend(path.steps.into_iter().skip(1));
        combined.keys.extend(path.keys);
    }
    combined
}

struct Expander<'t> {
    tree: &'t Tree,
    /// Declarations currently being expanded
    declarations: Vec<StepId>,
    /// Authored call sites enclosing the current position
    call_sites: Vec<StepId>,
    /// Authored calls and the declaration each resolved to
    resolved: Vec<(StepId, StepId)>,
}

impl<'t> Expander<'t> {
    fn new(tree: &'t Tree) -> Self {
        Self {
            tree,
            declarations: Vec::new(),
            call_sites: Vec::new(),
            resolved: Vec::new(),
        }
    }

    fn expand_children(
        &mut self,
        children: &[Node],
        indents: usize,
    ) -> Result<Vec<Path>, GenerationError> {
        let tree = self.tree;
        let mut paths = Vec::new();

        for child in children {
            match *child {
                Node::Step(id) => {
                    let step = tree.step(id);
                    if step.is_function_declaration() {
                        continue;
                    }
                    paths.extend(self.expand_step(step, Some(id), step.children(), indents)?);
                }
                Node::Group(id) => paths.extend(self.expand_group(id, indents)?),
            }
        }
        Ok(paths)
    }

    fn expand_group(&mut self, id: GroupId, indents: usize) -> Result<Vec<Path>, GenerationError> {
        let tree = self.tree;
        let group = tree.group(id);
        let members = group
            .members
            .iter()
            .copied()
            .filter(|m| !tree.step(*m).is_function_declaration());

        if group.is_sequential {
            let mut head = Path::default();
            for member in members {
                for path in self.expand_step(tree.step(member), Some(member), &[], indents)? {
                    head = head.concat(&path);
                }
            }
            let tails = self.expand_children(&group.children, indents)?;
            return Ok(cross(vec![head], &tails));
        }

        let mut paths = Vec::new();
        for member in members {
            paths.extend(self.expand_step(tree.step(member), Some(member), &group.children, indents)?);
        }
        Ok(paths)
    }

    /// Expands one step followed by `children`.
    ///
    /// `scope` is the authored step declarations are looked up from.
    fn expand_step(
        &mut self,
        step: &Step,
        scope: Option<StepId>,
        children: &[Node],
        indents: usize,
    ) -> Result<Vec<Path>, GenerationError> {
        let alternatives = if step.is_function_call() {
            self.expand_call(step, scope, indents)?
        } else {
            let mut clone = step.clone_for_branch();
            clone.branch_indents = indents;
            let key = if step.modifiers.non_parallel {
                clone.origin()
            } else {
                None
            };
            vec![vec![Path::single(clone, key)]]
        };

        let tails = self.expand_children(children, indents)?;
        let mut paths = Vec::new();

        // Each alternative has its own head clone and folds separately.
        for heads in alternatives {
            let sequential = heads
                .first()
                .and_then(|p| p.steps.first())
                .map(|s| s.modifiers.sequential)
                .unwrap_or(false);

            if sequential {
                let folded = tails.iter().fold(flatten(heads), |path, tail| path.concat(tail));
                paths.push(folded);
            } else {
                paths.extend(cross(heads, &tails));
            }
        }
        Ok(paths)
    }

    /// Expands a call into one list of paths per matching declaration.
    ///
    /// Paths in the same list start with the same call clone.
    fn expand_call(
        &mut self,
        step: &Step,
        scope: Option<StepId>,
        indents: usize,
    ) -> Result<Vec<Vec<Path>>, GenerationError> {
        let tree = self.tree;
        let mut alternatives = Vec::new();

        for decl_id in self.find_declarations(step, scope)? {
            let declaration = tree.step(decl_id);
            if self.declarations.contains(&decl_id) {
                return Err(GenerationError::InfiniteRecursion {
                    declaration: declaration.text.clone(),
                    location: step.location(),
                });
            }
            if let Some(call_id) = step.tree_id() {
                self.resolved.push((call_id, decl_id));
            }

            let mut call = step.clone_for_branch();
            call.merge_in_function_declaration(declaration);
            call.branch_indents = indents;

            let key = if declaration.modifiers.non_parallel {
                Some(decl_id)
            } else if step.modifiers.non_parallel {
                call.origin()
            } else {
                None
            };

            let call_site = step.tree_id();
            self.declarations.push(decl_id);
            if let Some(id) = call_site {
                self.call_sites.push(id);
            }
            let body = self.expand_children(declaration.children(), indents + 1);
            if call_site.is_some() {
                self.call_sites.pop();
            }
            self.declarations.pop();

            let head = Path::single(call, key);
            let body = body?;
            if body.is_empty() {
                alternatives.push(vec![head]);
            } else {
                alternatives.push(body.iter().map(|b| head.clone().concat(b)).collect());
            }
        }
        Ok(alternatives)
    }

    /// Finds the declarations a call refers to.
    ///
    /// Scopes visible from the call are searched first, innermost out, then
    /// the scopes of the enclosing call sites. The first scope with any match
    /// wins; several matches there become alternative paths.
    fn find_declarations(
        &self,
        step: &Step,
        scope: Option<StepId>,
    ) -> Result<Vec<StepId>, GenerationError> {
        let tree = self.tree;
        let start = scope.unwrap_or_else(|| tree.root());
        let origins = std::iter::once(start).chain(self.call_sites.iter().rev().copied());

        for origin in origins {
            for container in tree.lexical_scopes(origin) {
                let mut matches = Vec::new();
                for candidate in tree.declarations_in(container) {
                    if step.is_function_match(tree.step(candidate))? {
                        matches.push(candidate);
                    }
                }
                if !matches.is_empty() {
                    return Ok(matches);
                }
            }
        }

        Err(GenerationError::FunctionNotFound {
            call: step.function_call_text().to_string(),
            location: step.location(),
        })
    }
}

/// Frequency set by the last `{frequency}` binding on the path.
fn branch_frequency(steps: &[Step]) -> Result<Frequency, GenerationError> {
    let mut frequency = Frequency::default();
    for step in steps {
        for binding in step.vars_being_set.iter().filter(|b| b.name == FREQUENCY_VAR) {
            let value = strip_quotes(&binding.value);
            frequency = value
                .parse()
                .map_err(|_| GenerationError::InvalidFrequency {
                    value,
                    location: step.location(),
                })?;
        }
    }
    Ok(frequency)
}

/// Group names in order of first appearance.
fn branch_groups(steps: &[Step]) -> Vec<String> {
    let mut groups: Vec<String> = Vec::new();
    for binding in steps
        .iter()
        .flat_map(|s| s.vars_being_set.iter())
        .filter(|b| b.name == GROUP_VAR)
    {
        for name in strip_quotes(&binding.value).split(',').map(str::trim) {
            if !name.is_empty() && !groups.iter().any(|g| g == name) {
                groups.push(name.to_string());
            }
        }
    }
    groups
}

impl Tree {
    /// Expands the tree into branches and stores them.
    pub fn generate(&mut self, options: &GenerateOptions) -> Result<(), GenerationError> {
        if options.no_debug {
            self.check_no_debug()?;
        }

        let (paths, resolved) = {
            let mut expander = Expander::new(self);
            let paths = expander.expand_children(self.children_of(Node::Step(self.root())), 0)?;
            (paths, expander.resolved)
        };

        let candidates = paths.len();
        let mut branches = Vec::new();

        for path in paths.into_iter().filter(|p| !p.steps.is_empty()) {
            let frequency = branch_frequency(&path.steps)?;
            let groups = branch_groups(&path.steps);

            if let Some(min) = options.min_frequency {
                if frequency < min {
                    continue;
                }
            }
            if let Some(wanted) = options.groups.as_ref().filter(|g| !g.is_empty()) {
                if !groups.iter().any(|g| wanted.contains(g)) {
                    continue;
                }
            }

            branches.push(
                Branch::new(path.steps)
                    .with_non_parallel_keys(path.keys)
                    .with_frequency(frequency)
                    .with_groups(groups),
            );
        }

        if branches.iter().any(|b| b.is_only) {
            branches.retain(|b| b.is_only);
            debug!("Only modifier present, keeping {} branch(es)", branches.len());
        }
        if branches.iter().any(|b| b.is_debug) {
            branches.retain(|b| b.is_debug);
            debug!("Debug modifier present, keeping {} branch(es)", branches.len());
        }
        if !options.skip_hashes.is_empty() {
            branches.retain(|b| !options.skip_hashes.contains(&b.hash));
        }

        for (call, declaration) in resolved {
            self.step_mut(call).function_declaration.get_or_insert(declaration);
        }

        self.is_debug = branches.iter().any(|b| b.is_debug);
        info!(
            "Generated {} branch(es) from {} candidate path(s)",
            branches.len(),
            candidates
        );
        self.branches = branches;
        Ok(())
    }

    /// Expands a step that is not part of the tree, e.g. one typed in while paused.
    ///
    /// Declarations are looked up from `scope` (the root when `None`). Only the
    /// first resulting path is returned.
    pub fn expand_detached(
        &self,
        step: &Step,
        scope: Option<StepId>,
    ) -> Result<Vec<Step>, GenerationError> {
        let mut expander = Expander::new(self);
        let paths = expander.expand_step(step, scope, &[], 0)?;
        if paths.len() > 1 {
            warn!(
                "'{}' expands to {} paths, only the first is used",
                step.text,
                paths.len()
            );
        }
        Ok(paths.into_iter().next().map(|p| p.steps).unwrap_or_default())
    }

    fn check_no_debug(&self) -> Result<(), GenerationError> {
        for step in self.steps() {
            if step.modifiers.debug {
                return Err(GenerationError::DebugNotAllowed {
                    location: step.location(),
                });
            }
            if step.modifiers.only {
                return Err(GenerationError::OnlyNotAllowed {
                    location: step.location(),
                });
            }
        }
        Ok(())
    }
}
