//! Dependency graph construction for protectable resources.
//!
//! [`build_graph`] expands a set of start resources through a caller supplied
//! dependency function and returns the forest of true roots. Resources that
//! are reachable along several paths are represented by a single shared
//! [`GraphNode`], and any cycle aborts the build without returning a partial
//! forest.
//!
//! The traversal keeps an explicit stack rather than recursing, so deep
//! dependency chains cannot exhaust the call stack.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::resource::{Resource, ResourceKey};

/// A resource together with the nodes it depends on.
#[derive(Debug, Eq, PartialEq)]
pub struct GraphNode {
    /// The resource represented by this node.
    pub value: Resource,
    /// Dependencies in the order the dependency function returned them.
    pub children: Vec<Arc<Self>>,
}

impl GraphNode {
    /// Returns `true` when the node has no dependencies.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

// Dropping a long chain recursively would overflow the stack.
impl Drop for GraphNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(node) = pending.pop() {
            if let Ok(mut owned) = Arc::try_unwrap(node) {
                pending.append(&mut owned.children);
            }
        }
    }
}

/// Errors raised while building a dependency graph.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GraphError {
    /// Raised when the dependency relation contains a cycle.
    #[error("a loop was found in the graph at {resource}")]
    LoopDetected {
        /// Resource whose revisit closed the cycle.
        resource: ResourceKey,
    },
    /// Raised when the dependency function fails for a resource.
    #[error("failed to discover dependencies of {resource}: {message}")]
    Discovery {
        /// Resource being expanded.
        resource: ResourceKey,
        /// Error reported by the dependency function.
        message: String,
    },
    /// Raised when the builder's own bookkeeping is inconsistent.
    #[error("graph builder invariant violated: {message}")]
    Invariant {
        /// Description of the violated invariant.
        message: String,
    },
}

/// Builds the dependency forest for `start` using an infallible dependency
/// function.
///
/// # Errors
///
/// Returns [`GraphError::LoopDetected`] when a cycle is reachable from the
/// start set and [`GraphError::Invariant`] when the builder detects an
/// internal inconsistency.
pub fn build_graph<F>(
    start: &[Resource],
    mut get_children: F,
) -> Result<Vec<Arc<GraphNode>>, GraphError>
where
    F: FnMut(&Resource) -> Vec<Resource>,
{
    try_build_graph(start, |resource| {
        Ok::<_, std::convert::Infallible>(get_children(resource))
    })
}

/// Builds the dependency forest for `start` using a fallible dependency
/// function.
///
/// Start resources are visited in order; a start resource that turns out to
/// be a dependency of another resource is omitted from the returned roots but
/// stays reachable as a child. Duplicate start entries are visited once.
///
/// # Errors
///
/// Returns [`GraphError::Discovery`] when `get_children` fails, in addition to
/// the errors documented on [`build_graph`].
pub fn try_build_graph<F, E>(
    start: &[Resource],
    get_children: F,
) -> Result<Vec<Arc<GraphNode>>, GraphError>
where
    F: FnMut(&Resource) -> Result<Vec<Resource>, E>,
    E: Display,
{
    let mut context = BuildContext {
        sources: start.iter().cloned().collect(),
        encountered: HashSet::new(),
        finished: HashMap::new(),
        get_children,
    };

    let mut seen_start = HashSet::new();
    let mut visited = Vec::with_capacity(start.len());
    for resource in start {
        if !seen_start.insert(resource) {
            continue;
        }
        visited.push(context.visit(resource)?);
    }

    if !context.encountered.is_empty() {
        return Err(GraphError::Invariant {
            message: format!(
                "{} node(s) left in progress after build",
                context.encountered.len()
            ),
        });
    }

    Ok(visited
        .into_iter()
        .filter(|node| context.sources.contains(&node.value))
        .collect())
}

/// Returns every node reachable from `forest` exactly once, dependencies
/// before dependents.
///
/// Children are emitted in builder order and roots in forest order, so the
/// result is deterministic for a given forest.
#[must_use]
pub fn walk_unique(forest: &[Arc<GraphNode>]) -> Vec<Arc<GraphNode>> {
    let mut emitted: HashSet<ResourceKey> = HashSet::new();
    let mut ordered = Vec::new();

    for root in forest {
        let mut stack: Vec<(Arc<GraphNode>, usize)> = vec![(Arc::clone(root), 0)];
        while let Some((node, next)) = stack.pop() {
            if emitted.contains(&node.value.key()) {
                continue;
            }
            if let Some(child) = node.children.get(next) {
                let dependency = Arc::clone(child);
                stack.push((node, next + 1));
                if !emitted.contains(&dependency.value.key()) {
                    stack.push((dependency, 0));
                }
                continue;
            }
            emitted.insert(node.value.key());
            ordered.push(node);
        }
    }

    ordered
}

/// Per-build bookkeeping; never shared between builds.
struct BuildContext<F> {
    /// Candidate roots: start resources not yet seen as anyone's child.
    sources: HashSet<Resource>,
    /// Resources on the current expansion path.
    encountered: HashSet<Resource>,
    /// Completed nodes, memoized by identity.
    finished: HashMap<Resource, Arc<GraphNode>>,
    get_children: F,
}

/// A node whose children are still being expanded.
struct Frame {
    resource: Resource,
    pending: Vec<Resource>,
    next: usize,
    built: Vec<Arc<GraphNode>>,
}

impl<F, E> BuildContext<F>
where
    F: FnMut(&Resource) -> Result<Vec<Resource>, E>,
    E: Display,
{
    fn visit(&mut self, root: &Resource) -> Result<Arc<GraphNode>, GraphError> {
        if let Some(done) = self.finished.get(root) {
            return Ok(Arc::clone(done));
        }

        let mut stack = vec![self.enter(root.clone())?];
        loop {
            let Some(frame) = stack.last_mut() else {
                return Err(GraphError::Invariant {
                    message: format!("expansion stack emptied before {root} finished"),
                });
            };

            if let Some(child) = frame.pending.get(frame.next).cloned() {
                frame.next += 1;
                if self.encountered.contains(&child) {
                    return Err(GraphError::LoopDetected {
                        resource: child.key(),
                    });
                }
                if let Some(memoized) = self.finished.get(&child) {
                    frame.built.push(Arc::clone(memoized));
                    continue;
                }
                let entered = self.enter(child)?;
                stack.push(entered);
                continue;
            }

            let Some(done) = stack.pop() else {
                return Err(GraphError::Invariant {
                    message: format!("expansion stack emptied before {root} finished"),
                });
            };
            trace!(resource = %done.resource, "node finished");
            self.encountered.remove(&done.resource);
            let node = Arc::new(GraphNode {
                value: done.resource.clone(),
                children: done.built,
            });
            self.finished.insert(done.resource, Arc::clone(&node));

            match stack.last_mut() {
                Some(parent) => parent.built.push(node),
                None => return Ok(node),
            }
        }
    }

    fn enter(&mut self, resource: Resource) -> Result<Frame, GraphError> {
        trace!(resource = %resource, "entering node");
        self.encountered.insert(resource.clone());
        let pending = (self.get_children)(&resource).map_err(|err| GraphError::Discovery {
            resource: resource.key(),
            message: err.to_string(),
        })?;
        // Anything with a parent is not a root.
        for child in &pending {
            self.sources.remove(child);
        }
        Ok(Frame {
            resource,
            built: Vec::with_capacity(pending.len()),
            pending,
            next: 0,
        })
    }
}

#[cfg(test)]
mod tests;
