//! Delete operation: remove the snapshot recorded for a share.

use tracing::{debug, info};

use crate::operation::{Operation, OperationArgs, OperationFuture, StatusSets};
use crate::plugin::{ResourceStatus, set_resource_status};

use super::client::snapshot_status;
use super::{
    STATUS_AVAILABLE, STATUS_DELETED, STATUS_DELETING, STATUS_ERROR, STATUS_ERROR_DELETING,
    ShareRuntime, stored_snapshot_id,
};

/// Deletes the snapshot protecting a share.
///
/// A share without a recorded snapshot, or whose snapshot is already gone,
/// is treated as deleted.
pub struct DeleteShareSnapshot {
    runtime: ShareRuntime,
}

impl DeleteShareSnapshot {
    pub(super) const fn new(runtime: ShareRuntime) -> Self {
        Self { runtime }
    }
}

impl Operation for DeleteShareSnapshot {
    fn on_prepare_begin<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        Box::pin(async move {
            set_resource_status(args.section, ResourceStatus::Deleting).await?;
            Ok(())
        })
    }

    fn on_main<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        Box::pin(async move {
            let Some(snapshot_id) = stored_snapshot_id(args.section, args.resource).await? else {
                debug!(resource = %args.resource, "no snapshot recorded; nothing to delete");
                return Ok(());
            };
            let client = self.runtime.client(args.context)?;

            if client.get_snapshot(&snapshot_id).await?.is_some() {
                client.delete_snapshot(&snapshot_id).await?;
            }

            let gone = StatusSets::success([STATUS_DELETED])
                .failure([STATUS_ERROR, STATUS_ERROR_DELETING])
                .ignore([STATUS_DELETING, STATUS_AVAILABLE]);
            let outcome = self
                .runtime
                .poller_for(&args)
                .poll(
                    || snapshot_status(client.as_ref(), &snapshot_id, STATUS_DELETED),
                    &gone,
                )
                .await;
            if let Err(err) = outcome {
                set_resource_status(args.section, ResourceStatus::Error).await?;
                return Err(err.into());
            }
            info!(resource = %args.resource, %snapshot_id, "share snapshot deleted");
            Ok(())
        })
    }

    fn on_complete<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        Box::pin(async move {
            set_resource_status(args.section, ResourceStatus::Deleted).await?;
            Ok(())
        })
    }
}
