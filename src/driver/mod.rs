//! Executes an operation lifecycle over every node of a dependency forest.
//!
//! Nodes run dependency-first: a node starts only after every one of its
//! children has completed all four stages. Shared children run once.
//! Independent nodes may overlap when the executor allows more than one
//! node in flight; with the default limit of one, nodes run in the order
//! returned by [`walk_unique`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checkpoint::Checkpoint;
use crate::context::{Parameters, RequestContext};
use crate::graph::{GraphNode, walk_unique};
use crate::operation::{
    Cancellation, Operation, OperationArgs, OperationError, OperationKind, PollError, Stage,
    run_lifecycle,
};
use crate::plugin::PluginRegistry;
use crate::resource::{Resource, ResourceKey};

/// What the executor does after a node fails.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorPolicy {
    /// Start no further nodes; nodes already running finish.
    #[default]
    FailFast,
    /// Keep running nodes that do not depend on a failed node.
    BestEffort,
}

/// A node that did not complete, with the stage that failed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{resource} failed during {}: {error}", .stage.map_or("setup", Stage::as_str))]
pub struct NodeFailure {
    /// Resource of the failed node.
    pub resource: Resource,
    /// Failing stage, or `None` when the section or operation could not be
    /// resolved.
    pub stage: Option<Stage>,
    /// Underlying failure.
    pub error: OperationError,
}

/// Per-node outcome of one execution.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecutionReport {
    /// Resources whose lifecycle completed, in completion order.
    pub completed: Vec<Resource>,
    /// Resources whose lifecycle failed, in failure order.
    pub failed: Vec<NodeFailure>,
    /// Resources never started, in dependency-first order.
    pub not_attempted: Vec<Resource>,
    /// Whether the run was cut short by cancellation, either before dispatch
    /// or while a node was polling.
    pub cancelled: bool,
}

impl ExecutionReport {
    /// Returns `true` when every node completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.not_attempted.is_empty() && !self.cancelled
    }

    /// Returns the first recorded failure.
    #[must_use]
    pub fn first_failure(&self) -> Option<&NodeFailure> {
        self.failed.first()
    }
}

/// Resolves the operation to run for each resource.
pub trait OperationProvider: Send + Sync {
    /// Returns the operation for `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError`] when no operation is available; the node is
    /// then reported as failed without a stage.
    fn operation_for(&self, resource: &Resource) -> Result<Box<dyn Operation>, OperationError>;
}

impl<F> OperationProvider for F
where
    F: Fn(&Resource) -> Result<Box<dyn Operation>, OperationError> + Send + Sync,
{
    fn operation_for(&self, resource: &Resource) -> Result<Box<dyn Operation>, OperationError> {
        self(resource)
    }
}

/// Provides the operations of one [`OperationKind`] from a [`PluginRegistry`].
#[derive(Clone, Copy, Debug)]
pub struct RegistryOperations<'a> {
    registry: &'a PluginRegistry,
    kind: OperationKind,
}

impl<'a> RegistryOperations<'a> {
    /// Resolves `kind` operations through `registry`.
    #[must_use]
    pub const fn new(registry: &'a PluginRegistry, kind: OperationKind) -> Self {
        Self { registry, kind }
    }
}

impl OperationProvider for RegistryOperations<'_> {
    fn operation_for(&self, resource: &Resource) -> Result<Box<dyn Operation>, OperationError> {
        self.registry.operation(self.kind, resource)
    }
}

/// Shared inputs of one execution.
struct Scope<'a, P: ?Sized> {
    checkpoint: &'a Checkpoint,
    cancellation: Option<&'a Cancellation>,
    context: &'a RequestContext,
    parameters: &'a Parameters,
    provider: &'a P,
}

impl<P: ?Sized> Clone for Scope<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: ?Sized> Copy for Scope<'_, P> {}

/// Dependency bookkeeping over the unique nodes of a forest.
struct Plan {
    nodes: Vec<Arc<GraphNode>>,
    /// Number of unfinished dependencies per node.
    waiting_on: Vec<usize>,
    /// Nodes depending on each node.
    dependents: Vec<Vec<usize>>,
}

impl Plan {
    fn new(forest: &[Arc<GraphNode>]) -> Self {
        let nodes = walk_unique(forest);
        let positions: HashMap<ResourceKey, usize> = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.value.key(), index))
            .collect();
        let mut waiting_on = vec![0; nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];

        for (index, node) in nodes.iter().enumerate() {
            let children: BTreeSet<usize> = node
                .children
                .iter()
                .filter_map(|child| positions.get(&child.value.key()).copied())
                .collect();
            if let Some(count) = waiting_on.get_mut(index) {
                *count = children.len();
            }
            for child in children {
                if let Some(list) = dependents.get_mut(child) {
                    list.push(index);
                }
            }
        }

        Self {
            nodes,
            waiting_on,
            dependents,
        }
    }

    fn initially_ready(&self) -> BTreeSet<usize> {
        self.waiting_on
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(index, _)| index)
            .collect()
    }

    /// Marks `index` complete and returns the dependents it unblocked.
    fn complete(&mut self, index: usize) -> Vec<usize> {
        let Some(dependents) = self.dependents.get(index) else {
            return Vec::new();
        };
        let mut unblocked = Vec::new();
        for dependent in dependents {
            if let Some(count) = self.waiting_on.get_mut(*dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    unblocked.push(*dependent);
                }
            }
        }
        unblocked
    }

    fn resource(&self, index: usize) -> Option<&Resource> {
        self.nodes.get(index).map(|node| &node.value)
    }
}

/// Drives operation lifecycles across a dependency forest.
#[derive(Clone, Debug)]
pub struct GraphExecutor {
    policy: ErrorPolicy,
    max_concurrency: usize,
    cancellation: Option<Cancellation>,
}

impl Default for GraphExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphExecutor {
    /// Creates a fail-fast executor running one node at a time.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            policy: ErrorPolicy::FailFast,
            max_concurrency: 1,
            cancellation: None,
        }
    }

    /// Sets the failure policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Allows up to `limit` independent nodes in flight; zero is treated as
    /// one.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    /// Stops dispatching new nodes once `token` is cancelled.
    ///
    /// The token is also handed to every running operation through
    /// [`OperationArgs::cancellation`], so nodes that are polling stop too.
    #[must_use]
    pub fn with_cancellation(mut self, token: Cancellation) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Returns the configured failure policy.
    #[must_use]
    pub const fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Runs the lifecycle of `provider`'s operation for every node of
    /// `forest`, storing state in `checkpoint`.
    ///
    /// Node failures are collected in the returned report rather than
    /// returned as errors.
    pub async fn execute<P>(
        &self,
        forest: &[Arc<GraphNode>],
        checkpoint: &Checkpoint,
        context: &RequestContext,
        parameters: &Parameters,
        provider: &P,
    ) -> ExecutionReport
    where
        P: OperationProvider + ?Sized,
    {
        let scope = Scope {
            checkpoint,
            cancellation: self.cancellation.as_ref(),
            context,
            parameters,
            provider,
        };
        let mut plan = Plan::new(forest);
        let mut ready = plan.initially_ready();
        let mut finished = vec![false; plan.nodes.len()];
        let mut in_flight = FuturesUnordered::new();
        let mut report = ExecutionReport::default();
        let mut halted = false;

        info!(
            checkpoint = checkpoint.id(),
            nodes = plan.nodes.len(),
            policy = ?self.policy,
            "executing graph"
        );

        loop {
            while !halted && in_flight.len() < self.max_concurrency {
                if self.is_cancelled() {
                    warn!(checkpoint = checkpoint.id(), "execution cancelled");
                    report.cancelled = true;
                    halted = true;
                    break;
                }
                let Some(index) = ready.pop_first() else {
                    break;
                };
                let Some(resource) = plan.resource(index) else {
                    continue;
                };
                in_flight.push(run_node(index, resource.clone(), scope));
            }

            let Some((index, outcome)) = in_flight.next().await else {
                break;
            };
            if let Some(done) = finished.get_mut(index) {
                *done = true;
            }
            match outcome {
                Ok(resource) => {
                    report.completed.push(resource);
                    ready.extend(plan.complete(index));
                }
                Err(failure) => {
                    if failure.error == OperationError::Poll(PollError::Cancelled) {
                        report.cancelled = true;
                    }
                    report.failed.push(failure);
                    if self.policy == ErrorPolicy::FailFast {
                        halted = true;
                    }
                }
            }
        }

        report.not_attempted = finished
            .iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .filter_map(|(index, _)| plan.resource(index).cloned())
            .collect();

        info!(
            checkpoint = checkpoint.id(),
            completed = report.completed.len(),
            failed = report.failed.len(),
            not_attempted = report.not_attempted.len(),
            "graph execution finished"
        );
        report
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(Cancellation::is_cancelled)
    }
}

async fn run_node<P>(
    index: usize,
    resource: Resource,
    scope: Scope<'_, P>,
) -> (usize, Result<Resource, NodeFailure>)
where
    P: OperationProvider + ?Sized,
{
    let setup_failure = |error: OperationError| NodeFailure {
        resource: resource.clone(),
        stage: None,
        error,
    };

    let section = match scope.checkpoint.resource_section(&resource) {
        Ok(section) => section,
        Err(err) => return (index, Err(setup_failure(err.into()))),
    };
    let operation = match scope.provider.operation_for(&resource) {
        Ok(operation) => operation,
        Err(err) => {
            warn!(%resource, error = %err, "no operation for node");
            return (index, Err(setup_failure(err)));
        }
    };
    let parameters = scope.parameters.for_resource(&resource);

    debug!(%resource, "starting node");
    let args = OperationArgs {
        checkpoint: scope.checkpoint,
        resource: &resource,
        section: &section,
        context: scope.context,
        parameters: &parameters,
        cancellation: scope.cancellation,
    };
    let outcome = run_lifecycle(operation.as_ref(), args).await;
    match outcome {
        Ok(()) => {
            debug!(%resource, "node completed");
            (index, Ok(resource))
        }
        Err(err) => (
            index,
            Err(NodeFailure {
                resource,
                stage: Some(err.stage),
                error: err.source,
            }),
        ),
    }
}
