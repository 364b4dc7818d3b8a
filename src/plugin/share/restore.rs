//! Restore operation: create a new share from the protected snapshot.

use tracing::{debug, info};

use crate::bank::BankSection;
use crate::operation::{
    Operation, OperationArgs, OperationError, OperationFuture, PollError, StatusSets,
};
use crate::resource::Resource;

use super::client::{ShareFromSnapshotRequest, share_status};
use super::{
    METADATA_KEY, ProtectState, RESTORE_KEY, RestoreOptions, RestoreState, STATUS_AVAILABLE,
    STATUS_CREATING, STATUS_ERROR, ShareRuntime, parse_options,
};

/// Restores a share from the snapshot recorded by a protect flow.
///
/// The protected [`ProtectState`] is read through a read-only view of the
/// section. Progress, including a failed restore, is written only to
/// [`RESTORE_KEY`]; the share's protect status is left as it was.
pub struct RestoreShareSnapshot {
    runtime: ShareRuntime,
}

impl RestoreShareSnapshot {
    pub(super) const fn new(runtime: ShareRuntime) -> Self {
        Self { runtime }
    }
}

async fn protected_state(
    section: &BankSection,
    resource: &Resource,
) -> Result<ProtectState, OperationError> {
    section
        .read_only()
        .find_record(METADATA_KEY)
        .await?
        .ok_or_else(|| OperationError::MissingState {
            resource: resource.to_string(),
            key: METADATA_KEY.to_owned(),
        })
}

impl Operation for RestoreShareSnapshot {
    fn on_prepare_begin<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        Box::pin(async move {
            parse_options::<RestoreOptions>(args.parameters)?;
            protected_state(args.section, args.resource).await?;
            Ok(())
        })
    }

    fn on_prepare_finish<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        Box::pin(async move {
            if let Some(state) = args.section.find_record::<RestoreState>(RESTORE_KEY).await? {
                debug!(resource = %args.resource, share_id = %state.share_id, "restore already requested");
                return Ok(());
            }

            let protected = protected_state(args.section, args.resource).await?;
            let options: RestoreOptions = parse_options(args.parameters)?;
            let client = self.runtime.client(args.context)?;
            let request = ShareFromSnapshotRequest {
                snapshot_id: protected.snapshot_id.clone(),
                share_proto: protected.share_proto,
                size_gb: protected.size_gb,
                name: options.restore_name,
                description: options.restore_description,
            };
            let share = client.create_share_from_snapshot(&request).await?;
            let state = RestoreState {
                snapshot_id: protected.snapshot_id,
                share_id: share.id,
                status: share.status,
            };
            args.section.update_record(RESTORE_KEY, &state).await?;
            info!(resource = %args.resource, share_id = %state.share_id, "share restore requested");
            Ok(())
        })
    }

    fn on_main<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        Box::pin(async move {
            let mut state: RestoreState = args
                .section
                .find_record(RESTORE_KEY)
                .await?
                .ok_or_else(|| OperationError::MissingState {
                    resource: args.resource.to_string(),
                    key: RESTORE_KEY.to_owned(),
                })?;
            let client = self.runtime.client(args.context)?;

            let share_ready = StatusSets::success([STATUS_AVAILABLE])
                .failure([STATUS_ERROR])
                .ignore([STATUS_CREATING]);
            let outcome = self
                .runtime
                .poller_for(&args)
                .poll(|| share_status(client.as_ref(), &state.share_id), &share_ready)
                .await;
            let result = match outcome {
                Ok(status) => {
                    state.status = status;
                    Ok(())
                }
                Err(PollError::Failed { status }) => {
                    state.status.clone_from(&status);
                    Err(PollError::Failed { status })
                }
                Err(err) => Err(err),
            };
            args.section.update_record(RESTORE_KEY, &state).await?;
            if result.is_ok() {
                info!(resource = %args.resource, share_id = %state.share_id, "share restored");
            }
            result.map_err(Into::into)
        })
    }
}
