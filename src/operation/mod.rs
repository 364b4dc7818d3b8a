//! The four-stage operation lifecycle implemented by resource plugins.
//!
//! Every operation runs `on_prepare_begin`, `on_prepare_finish`, `on_main`
//! and `on_complete` in that order. Each hook defaults to a no-op, so a
//! plugin overrides only the stages it needs. A failing stage stops the
//! lifecycle; later stages are not invoked.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bank::{BankError, BankSection};
use crate::checkpoint::Checkpoint;
use crate::context::RequestContext;
use crate::resource::Resource;

pub mod poll;

pub use poll::{Cancellation, PollError, StatusPoller, StatusSets};

/// Future returned by lifecycle hooks.
pub type OperationFuture<'a> = Pin<Box<dyn Future<Output = Result<(), OperationError>> + Send + 'a>>;

/// Lifecycle stage identifiers, in execution order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Stage {
    /// Validate preconditions and record intent.
    PrepareBegin,
    /// Issue the synchronous backend call and persist its handle.
    PrepareFinish,
    /// Drive the long-running work to a terminal state.
    Main,
    /// Finalise bookkeeping and clear transient markers.
    Complete,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Self; 4] = [
        Self::PrepareBegin,
        Self::PrepareFinish,
        Self::Main,
        Self::Complete,
    ];

    /// Returns the hook name of the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrepareBegin => "on_prepare_begin",
            Self::PrepareFinish => "on_prepare_finish",
            Self::Main => "on_main",
            Self::Complete => "on_complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The business operation a flow runs over every resource.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OperationKind {
    /// Capture protected data for the resource.
    Protect,
    /// Remove previously protected data.
    Delete,
    /// Check that protected data is still usable.
    Verify,
    /// Recreate the resource from protected data.
    Restore,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Protect => "protect",
            Self::Delete => "delete",
            Self::Verify => "verify",
            Self::Restore => "restore",
        };
        f.write_str(label)
    }
}

/// Errors raised inside lifecycle hooks.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OperationError {
    /// Raised when reading or writing the resource section fails.
    #[error(transparent)]
    Bank(#[from] BankError),
    /// Raised when waiting for a backend status fails.
    #[error(transparent)]
    Poll(#[from] PollError),
    /// Raised when a backend client call fails.
    #[error("backend client error: {message}")]
    Client {
        /// Message reported by the client.
        message: String,
    },
    /// Raised when state required by a stage was never persisted.
    #[error("missing persisted state '{key}' for {resource}")]
    MissingState {
        /// Resource whose state is missing.
        resource: String,
        /// Section key that was expected.
        key: String,
    },
    /// Raised when plan parameters cannot be interpreted.
    #[error("invalid parameters: {message}")]
    InvalidParameters {
        /// Description of the problem.
        message: String,
    },
    /// Raised when protected data exists but is not usable.
    #[error("verification of {resource} failed with status {status}")]
    VerificationFailed {
        /// Resource that failed verification.
        resource: String,
        /// Status reported by the backend.
        status: String,
    },
    /// Raised when no plugin provides the requested operation.
    #[error("no {kind} operation for resource type {resource_type}")]
    Unsupported {
        /// Resource type without a plugin.
        resource_type: String,
        /// Operation that was requested.
        kind: OperationKind,
    },
}

/// A stage failure attributed to the stage that raised it.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("stage {stage} failed: {source}")]
pub struct LifecycleError {
    /// Stage that failed.
    pub stage: Stage,
    /// Underlying failure.
    #[source]
    pub source: OperationError,
}

/// Inputs handed to every lifecycle hook.
#[derive(Clone, Copy, Debug)]
pub struct OperationArgs<'a> {
    /// Checkpoint the flow runs against.
    pub checkpoint: &'a Checkpoint,
    /// Resource the operation is bound to.
    pub resource: &'a Resource,
    /// The resource's section within the checkpoint.
    pub section: &'a BankSection,
    /// Opaque request context.
    pub context: &'a RequestContext,
    /// Parameters applying to this resource.
    pub parameters: &'a Value,
    /// Cancellation of the surrounding flow, if any. Long-running hooks
    /// should stop polling once it fires.
    pub cancellation: Option<&'a Cancellation>,
}

fn skip<'a>() -> OperationFuture<'a> {
    Box::pin(std::future::ready(Ok(())))
}

/// Business logic for one resource within one flow.
///
/// Implementations hold no state of their own between stages; anything a
/// later stage or a retry needs is written to [`OperationArgs::section`].
pub trait Operation: Send + Sync {
    /// Validates preconditions and records intent. Must tolerate re-runs.
    fn on_prepare_begin<'a>(&'a self, _args: OperationArgs<'a>) -> OperationFuture<'a> {
        skip()
    }

    /// Performs synchronous setup and persists the returned handle.
    fn on_prepare_finish<'a>(&'a self, _args: OperationArgs<'a>) -> OperationFuture<'a> {
        skip()
    }

    /// Drives long-running work to a terminal state.
    fn on_main<'a>(&'a self, _args: OperationArgs<'a>) -> OperationFuture<'a> {
        skip()
    }

    /// Finalises bookkeeping.
    fn on_complete<'a>(&'a self, _args: OperationArgs<'a>) -> OperationFuture<'a> {
        skip()
    }
}

/// Invokes the hook for `stage` on `operation`.
pub fn dispatch<'a>(
    operation: &'a dyn Operation,
    stage: Stage,
    args: OperationArgs<'a>,
) -> OperationFuture<'a> {
    match stage {
        Stage::PrepareBegin => operation.on_prepare_begin(args),
        Stage::PrepareFinish => operation.on_prepare_finish(args),
        Stage::Main => operation.on_main(args),
        Stage::Complete => operation.on_complete(args),
    }
}

/// Runs every stage of `operation` in order, stopping at the first failure.
///
/// # Errors
///
/// Returns [`LifecycleError`] naming the stage that failed.
pub async fn run_lifecycle(
    operation: &dyn Operation,
    args: OperationArgs<'_>,
) -> Result<(), LifecycleError> {
    for stage in Stage::ALL {
        debug!(resource = %args.resource, %stage, "running stage");
        if let Err(source) = dispatch(operation, stage, args).await {
            warn!(resource = %args.resource, %stage, error = %source, "stage failed");
            return Err(LifecycleError { stage, source });
        }
    }
    Ok(())
}
