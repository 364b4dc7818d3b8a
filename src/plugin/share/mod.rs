//! Share snapshot protection plugin.
//!
//! Protects shared file systems by snapshotting them through a
//! [`ShareClient`]. Section keys written per share:
//!
//! * `status`: the [`ResourceStatus`](super::ResourceStatus) of the share;
//! * `snapshot_id`: raw snapshot identifier, written as soon as the snapshot
//!   is requested so that retries and deletes can find it;
//! * `metadata`: the [`ProtectState`] record, written once the snapshot is
//!   available;
//! * `verify` and `restore`: results of verify and restore flows.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bank::{BankError, BankSection};
use crate::operation::{Operation, OperationArgs, OperationError, StatusPoller};
use crate::resource::{Resource, SHARE_RESOURCE_TYPE};

use super::ProtectionPlugin;

mod client;
mod delete;
mod protect;
mod restore;
pub mod schemas;
mod verify;

pub use client::{
    ClientError, ClientFuture, ShareClient, ShareClientFactory, ShareFromSnapshotRequest,
    ShareInfo, SnapshotInfo, SnapshotRequest,
};
pub use delete::DeleteShareSnapshot;
pub use protect::ProtectShareSnapshot;
pub use restore::RestoreShareSnapshot;
pub use verify::VerifyShareSnapshot;

/// Section key holding the raw snapshot identifier.
pub const SNAPSHOT_ID_KEY: &str = "snapshot_id";
/// Section key holding the [`ProtectState`] record.
pub const METADATA_KEY: &str = "metadata";
/// Section key holding the [`VerifyState`] record.
pub const VERIFY_KEY: &str = "verify";
/// Section key holding the [`RestoreState`] record.
pub const RESTORE_KEY: &str = "restore";

const STATUS_AVAILABLE: &str = "available";
const STATUS_CREATING: &str = "creating";
const STATUS_DELETING: &str = "deleting";
const STATUS_DELETED: &str = "deleted";
const STATUS_ERROR: &str = "error";
const STATUS_ERROR_DELETING: &str = "error_deleting";

/// Record persisted once a share snapshot is available.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProtectState {
    /// Protected share.
    pub share_id: String,
    /// Snapshot holding the protected data.
    pub snapshot_id: String,
    /// Export protocol of the share.
    pub share_proto: String,
    /// Size of the share in GiB.
    pub size_gb: u64,
    /// Snapshot status when protection finished.
    pub status: String,
}

/// Result of verifying a protected share.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VerifyState {
    /// Snapshot that was checked.
    pub snapshot_id: String,
    /// Status reported by the service.
    pub status: String,
    /// Whether the snapshot is usable.
    pub verified: bool,
}

/// Progress of restoring a share.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RestoreState {
    /// Snapshot the share is restored from.
    pub snapshot_id: String,
    /// Newly created share.
    pub share_id: String,
    /// Last observed status of the new share.
    pub status: String,
}

/// Options accepted by the protect operation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
struct ProtectOptions {
    #[serde(default)]
    snapshot_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    force: bool,
}

/// Options accepted by the restore operation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
struct RestoreOptions {
    #[serde(default)]
    restore_name: Option<String>,
    #[serde(default)]
    restore_description: Option<String>,
}

fn parse_options<T: DeserializeOwned>(parameters: &Value) -> Result<T, OperationError> {
    serde_json::from_value(parameters.clone()).map_err(|err| OperationError::InvalidParameters {
        message: err.to_string(),
    })
}

/// Reads the raw snapshot identifier written by the protect operation.
async fn stored_snapshot_id(
    section: &BankSection,
    resource: &Resource,
) -> Result<Option<String>, OperationError> {
    match section.get(SNAPSHOT_ID_KEY).await {
        Ok(bytes) => String::from_utf8(bytes).map(Some).map_err(|err| {
            OperationError::Bank(BankError::Serialization {
                key: format!("{resource}/{SNAPSHOT_ID_KEY}"),
                message: err.to_string(),
            })
        }),
        Err(BankError::NotFound { .. }) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn require_snapshot_id(
    section: &BankSection,
    resource: &Resource,
) -> Result<String, OperationError> {
    stored_snapshot_id(section, resource)
        .await?
        .ok_or_else(|| OperationError::MissingState {
            resource: resource.to_string(),
            key: SNAPSHOT_ID_KEY.to_owned(),
        })
}

/// Client factory and poll settings shared by the plugin's operations.
#[derive(Clone)]
struct ShareRuntime {
    clients: Arc<dyn ShareClientFactory>,
    poller: StatusPoller,
}

impl ShareRuntime {
    fn client(
        &self,
        context: &crate::context::RequestContext,
    ) -> Result<Arc<dyn ShareClient>, OperationError> {
        Ok(self.clients.create(context)?)
    }

    /// Poller for one hook, cancelled together with the running flow.
    fn poller_for(&self, args: &OperationArgs<'_>) -> StatusPoller {
        self.poller.clone().or_cancellation(args.cancellation)
    }
}

/// Protects shares by snapshotting them.
#[derive(Clone)]
pub struct ShareSnapshotPlugin {
    runtime: ShareRuntime,
}

impl std::fmt::Debug for ShareSnapshotPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareSnapshotPlugin")
            .field("poller", &self.runtime.poller)
            .finish_non_exhaustive()
    }
}

impl ShareSnapshotPlugin {
    /// Creates the plugin using `clients` to reach the share service and
    /// `poller` to wait for snapshots and shares.
    #[must_use]
    pub fn new(clients: Arc<dyn ShareClientFactory>, poller: StatusPoller) -> Self {
        Self {
            runtime: ShareRuntime { clients, poller },
        }
    }

    fn supports(resource_type: &str) -> bool {
        resource_type == SHARE_RESOURCE_TYPE
    }
}

impl ProtectionPlugin for ShareSnapshotPlugin {
    fn supported_resource_types(&self) -> Vec<String> {
        vec![SHARE_RESOURCE_TYPE.to_owned()]
    }

    fn options_schema(&self, resource_type: &str) -> Option<Value> {
        Self::supports(resource_type).then(schemas::options_schema)
    }

    fn restore_schema(&self, resource_type: &str) -> Option<Value> {
        Self::supports(resource_type).then(schemas::restore_schema)
    }

    fn saved_info_schema(&self, resource_type: &str) -> Option<Value> {
        Self::supports(resource_type).then(schemas::saved_info_schema)
    }

    fn protect_operation(&self, _resource: &Resource) -> Box<dyn Operation> {
        Box::new(ProtectShareSnapshot::new(self.runtime.clone()))
    }

    fn delete_operation(&self, _resource: &Resource) -> Box<dyn Operation> {
        Box::new(DeleteShareSnapshot::new(self.runtime.clone()))
    }

    fn verify_operation(&self, _resource: &Resource) -> Box<dyn Operation> {
        Box::new(VerifyShareSnapshot::new(self.runtime.clone()))
    }

    fn restore_operation(&self, _resource: &Resource) -> Box<dyn Operation> {
        Box::new(RestoreShareSnapshot::new(self.runtime.clone()))
    }
}
