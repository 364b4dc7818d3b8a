//! Protect operation: snapshot a share and record the snapshot.

use tracing::{debug, info};

use crate::operation::{Operation, OperationArgs, OperationError, OperationFuture, StatusSets};
use crate::plugin::{ResourceStatus, set_resource_status};

use super::client::{SnapshotRequest, share_status, snapshot_status};
use super::{
    METADATA_KEY, ProtectOptions, ProtectState, SNAPSHOT_ID_KEY, STATUS_AVAILABLE,
    STATUS_CREATING, STATUS_DELETING, STATUS_ERROR, STATUS_ERROR_DELETING, ShareRuntime,
    parse_options, require_snapshot_id, stored_snapshot_id,
};

/// Snapshots a share.
///
/// * `on_prepare_begin` marks the share as protecting;
/// * `on_prepare_finish` waits for the share to be available, requests the
///   snapshot and stores its id, reusing an id stored by an earlier attempt;
/// * `on_main` waits for the snapshot and stores the [`ProtectState`];
/// * `on_complete` marks the share as available.
///
/// A failure while waiting on the service or requesting the snapshot marks
/// the share as errored, whichever stage it happens in.
pub struct ProtectShareSnapshot {
    runtime: ShareRuntime,
}

impl ProtectShareSnapshot {
    pub(super) const fn new(runtime: ShareRuntime) -> Self {
        Self { runtime }
    }
}

impl Operation for ProtectShareSnapshot {
    fn on_prepare_begin<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        Box::pin(async move {
            // Reject bad options before touching the service.
            parse_options::<ProtectOptions>(args.parameters)?;
            set_resource_status(args.section, ResourceStatus::Protecting).await?;
            Ok(())
        })
    }

    fn on_prepare_finish<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        Box::pin(async move {
            if let Some(snapshot_id) = stored_snapshot_id(args.section, args.resource).await? {
                debug!(resource = %args.resource, %snapshot_id, "reusing requested snapshot");
                return Ok(());
            }

            let options: ProtectOptions = parse_options(args.parameters)?;
            let client = self.runtime.client(args.context)?;
            let share_id = args.resource.id.as_str();

            let share_ready = StatusSets::success([STATUS_AVAILABLE])
                .failure([STATUS_ERROR, STATUS_ERROR_DELETING])
                .ignore([STATUS_CREATING, STATUS_DELETING, "extending", "shrinking"]);
            let requested = async {
                self.runtime
                    .poller_for(&args)
                    .poll(|| share_status(client.as_ref(), share_id), &share_ready)
                    .await?;
                let request = SnapshotRequest {
                    share_id: share_id.to_owned(),
                    name: options.snapshot_name,
                    description: options.description,
                    force: options.force,
                };
                Ok::<_, OperationError>(client.create_snapshot(&request).await?)
            }
            .await;
            let snapshot = match requested {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    set_resource_status(args.section, ResourceStatus::Error).await?;
                    return Err(err);
                }
            };
            args.section.update(SNAPSHOT_ID_KEY, snapshot.id.as_str()).await?;
            info!(resource = %args.resource, snapshot_id = %snapshot.id, "share snapshot requested");
            Ok(())
        })
    }

    fn on_main<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        Box::pin(async move {
            let snapshot_id = require_snapshot_id(args.section, args.resource).await?;
            let client = self.runtime.client(args.context)?;

            let snapshot_ready = StatusSets::success([STATUS_AVAILABLE])
                .failure([STATUS_ERROR])
                .ignore([STATUS_CREATING]);
            let polled = self
                .runtime
                .poller_for(&args)
                .poll(
                    || snapshot_status(client.as_ref(), &snapshot_id, STATUS_ERROR),
                    &snapshot_ready,
                )
                .await;
            let status = match polled {
                Ok(status) => status,
                Err(err) => {
                    set_resource_status(args.section, ResourceStatus::Error).await?;
                    return Err(err.into());
                }
            };

            let share = client.get_share(&args.resource.id).await?;
            let state = ProtectState {
                share_id: share.id,
                snapshot_id,
                share_proto: share.share_proto,
                size_gb: share.size_gb,
                status,
            };
            args.section.update_record(METADATA_KEY, &state).await?;
            Ok(())
        })
    }

    fn on_complete<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        Box::pin(async move {
            set_resource_status(args.section, ResourceStatus::Available).await?;
            debug!(resource = %args.resource, "share protected");
            Ok(())
        })
    }
}
