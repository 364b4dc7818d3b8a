//! Client abstraction for the shared file system service.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::context::RequestContext;
use crate::operation::OperationError;

/// Future returned by share client calls.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Errors raised by share clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClientError {
    /// Raised when the requested share or snapshot does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Object kind (`share` or `snapshot`).
        kind: String,
        /// Object identifier.
        id: String,
    },
    /// Raised when a client cannot be built for the request context.
    #[error("failed to create share client: {message}")]
    Connect {
        /// Description of the failure.
        message: String,
    },
    /// Wrapper for service level failures.
    #[error("share service error: {message}")]
    Service {
        /// Message returned by the service.
        message: String,
    },
}

impl From<ClientError> for OperationError {
    fn from(value: ClientError) -> Self {
        Self::Client {
            message: value.to_string(),
        }
    }
}

/// Share as reported by the service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShareInfo {
    /// Share identifier.
    pub id: String,
    /// Current status, for example `available`.
    pub status: String,
    /// Provisioned size in GiB.
    pub size_gb: u64,
    /// Export protocol, for example `NFS`.
    pub share_proto: String,
}

/// Share snapshot as reported by the service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotInfo {
    /// Snapshot identifier.
    pub id: String,
    /// Share the snapshot was taken from.
    pub share_id: String,
    /// Current status, for example `creating`.
    pub status: String,
}

/// Parameters for creating a share snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotRequest {
    /// Share to snapshot.
    pub share_id: String,
    /// Optional snapshot name.
    pub name: Option<String>,
    /// Optional snapshot description.
    pub description: Option<String>,
    /// Snapshot even when the share is busy.
    pub force: bool,
}

/// Parameters for creating a share from a snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShareFromSnapshotRequest {
    /// Snapshot to restore from.
    pub snapshot_id: String,
    /// Export protocol of the new share.
    pub share_proto: String,
    /// Size of the new share in GiB.
    pub size_gb: u64,
    /// Optional name of the new share.
    pub name: Option<String>,
    /// Optional description of the new share.
    pub description: Option<String>,
}

/// Calls made by the share plugin against the shared file system service.
pub trait ShareClient: Send + Sync {
    /// Fetches a share.
    fn get_share<'a>(&'a self, share_id: &'a str) -> ClientFuture<'a, ShareInfo>;

    /// Starts creating a snapshot and returns it in its initial state.
    fn create_snapshot<'a>(&'a self, request: &'a SnapshotRequest)
    -> ClientFuture<'a, SnapshotInfo>;

    /// Fetches a snapshot, returning `None` once it no longer exists.
    fn get_snapshot<'a>(&'a self, snapshot_id: &'a str) -> ClientFuture<'a, Option<SnapshotInfo>>;

    /// Starts deleting a snapshot.
    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str) -> ClientFuture<'a, ()>;

    /// Starts creating a share from a snapshot.
    fn create_share_from_snapshot<'a>(
        &'a self,
        request: &'a ShareFromSnapshotRequest,
    ) -> ClientFuture<'a, ShareInfo>;
}

/// Builds share clients authenticated for a request context.
pub trait ShareClientFactory: Send + Sync {
    /// Returns a client acting on behalf of `context`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] when no client can be built.
    fn create(&self, context: &RequestContext) -> Result<Arc<dyn ShareClient>, ClientError>;
}

/// Reads the current status of a share.
pub(super) async fn share_status(client: &dyn ShareClient, share_id: &str) -> Result<String, ClientError> {
    Ok(client.get_share(share_id).await?.status)
}

/// Reads the current status of a snapshot, reporting a vanished snapshot as
/// `absent_status`.
pub(super) async fn snapshot_status(
    client: &dyn ShareClient,
    snapshot_id: &str,
    absent_status: &str,
) -> Result<String, ClientError> {
    Ok(client
        .get_snapshot(snapshot_id)
        .await?
        .map_or_else(|| absent_status.to_owned(), |snapshot| snapshot.status))
}
