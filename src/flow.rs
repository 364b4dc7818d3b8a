//! End-to-end flows: build the dependency graph, then drive one operation
//! kind over it and record the checkpoint outcome.

use std::fmt::Display;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::bank::{Bank, BankError};
use crate::checkpoint::{Checkpoint, CheckpointStatus};
use crate::context::{Parameters, RequestContext};
use crate::driver::{ExecutionReport, GraphExecutor, RegistryOperations};
use crate::graph::{GraphError, GraphNode, try_build_graph};
use crate::operation::OperationKind;
use crate::plugin::PluginRegistry;
use crate::resource::Resource;

/// Errors that abort a flow as a whole.
///
/// Node failures are not errors at this level; they are reported in
/// [`FlowReport::execution`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FlowError {
    /// Raised when the dependency graph cannot be built; nothing was executed.
    #[error("failed to build the dependency graph: {0}")]
    Build(#[from] GraphError),
    /// Raised when checkpoint bookkeeping fails.
    #[error(transparent)]
    Bank(#[from] BankError),
}

/// Outcome of one flow over a checkpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlowReport {
    /// Operation that was run.
    pub kind: OperationKind,
    /// Checkpoint the flow ran against.
    pub checkpoint_id: String,
    /// Checkpoint status recorded at the end, when the kind records one.
    pub status: Option<CheckpointStatus>,
    /// Per-node results.
    pub execution: ExecutionReport,
}

impl FlowReport {
    /// Returns `true` when every node completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.execution.is_success()
    }
}

/// Runs protect, delete, verify and restore flows through registered
/// plugins.
#[derive(Clone, Debug)]
pub struct ProtectionFlow {
    registry: Arc<PluginRegistry>,
    executor: GraphExecutor,
}

impl ProtectionFlow {
    /// Creates a flow resolving operations through `registry`.
    #[must_use]
    pub const fn new(registry: Arc<PluginRegistry>, executor: GraphExecutor) -> Self {
        Self { registry, executor }
    }

    /// Returns the plugin registry.
    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Creates a checkpoint in `bank` and protects every resource reachable
    /// from `start`.
    ///
    /// The graph is built before the checkpoint is created, so a cyclic
    /// dependency function leaves the bank untouched.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Build`] when the graph cannot be built and
    /// [`FlowError::Bank`] when checkpoint bookkeeping fails.
    pub async fn protect<F, E>(
        &self,
        bank: Bank,
        start: &[Resource],
        dependencies: F,
        context: &RequestContext,
        parameters: &Parameters,
    ) -> Result<(Checkpoint, FlowReport), FlowError>
    where
        F: FnMut(&Resource) -> Result<Vec<Resource>, E>,
        E: Display,
    {
        let forest = try_build_graph(start, dependencies)?;
        let checkpoint = Checkpoint::create(bank).await?;
        let report = self
            .execute(OperationKind::Protect, &checkpoint, &forest, context, parameters)
            .await?;
        Ok((checkpoint, report))
    }

    /// Runs `kind` over every resource reachable from `start` against an
    /// existing checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Build`] when the graph cannot be built and
    /// [`FlowError::Bank`] when checkpoint bookkeeping fails.
    pub async fn run<F, E>(
        &self,
        kind: OperationKind,
        checkpoint: &Checkpoint,
        start: &[Resource],
        dependencies: F,
        context: &RequestContext,
        parameters: &Parameters,
    ) -> Result<FlowReport, FlowError>
    where
        F: FnMut(&Resource) -> Result<Vec<Resource>, E>,
        E: Display,
    {
        let forest = try_build_graph(start, dependencies)?;
        self.execute(kind, checkpoint, &forest, context, parameters)
            .await
    }

    /// Runs `kind` over an already built forest.
    ///
    /// Protect flows finish the checkpoint as `available` or `error`.
    /// Delete flows mark it `deleting` first and finish as `deleted` or
    /// `error`. Verify and restore flows leave the status alone.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Bank`] when the checkpoint status cannot be
    /// updated.
    pub async fn execute(
        &self,
        kind: OperationKind,
        checkpoint: &Checkpoint,
        forest: &[Arc<GraphNode>],
        context: &RequestContext,
        parameters: &Parameters,
    ) -> Result<FlowReport, FlowError> {
        info!(checkpoint = checkpoint.id(), %kind, roots = forest.len(), "flow started");
        if kind == OperationKind::Delete {
            checkpoint.set_status(CheckpointStatus::Deleting).await?;
        }

        let provider = RegistryOperations::new(&self.registry, kind);
        let execution = self
            .executor
            .execute(forest, checkpoint, context, parameters, &provider)
            .await;

        let status = final_status(kind, execution.is_success());
        if let Some(value) = status {
            checkpoint.set_status(value).await?;
        }
        info!(
            checkpoint = checkpoint.id(),
            %kind,
            success = execution.is_success(),
            "flow finished"
        );
        Ok(FlowReport {
            kind,
            checkpoint_id: checkpoint.id().to_owned(),
            status,
            execution,
        })
    }
}

const fn final_status(kind: OperationKind, success: bool) -> Option<CheckpointStatus> {
    match (kind, success) {
        (OperationKind::Protect, true) => Some(CheckpointStatus::Available),
        (OperationKind::Delete, true) => Some(CheckpointStatus::Deleted),
        (OperationKind::Protect | OperationKind::Delete, false) => Some(CheckpointStatus::Error),
        (OperationKind::Verify | OperationKind::Restore, _) => None,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(OperationKind::Protect, true, Some(CheckpointStatus::Available))]
    #[case(OperationKind::Protect, false, Some(CheckpointStatus::Error))]
    #[case(OperationKind::Delete, true, Some(CheckpointStatus::Deleted))]
    #[case(OperationKind::Delete, false, Some(CheckpointStatus::Error))]
    #[case(OperationKind::Verify, false, None)]
    #[case(OperationKind::Restore, true, None)]
    fn final_status_follows_kind(
        #[case] kind: OperationKind,
        #[case] success: bool,
        #[case] expected: Option<CheckpointStatus>,
    ) {
        assert_eq!(final_status(kind, success), expected);
    }
}
