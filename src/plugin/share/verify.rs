//! Verify operation: check that a share's snapshot is still usable.

use tracing::{info, warn};

use crate::operation::{Operation, OperationArgs, OperationError, OperationFuture};

use super::client::snapshot_status;
use super::{
    STATUS_AVAILABLE, STATUS_DELETED, ShareRuntime, VERIFY_KEY, VerifyState, require_snapshot_id,
};

/// Checks the snapshot protecting a share and records the outcome under
/// [`VERIFY_KEY`].
pub struct VerifyShareSnapshot {
    runtime: ShareRuntime,
}

impl VerifyShareSnapshot {
    pub(super) const fn new(runtime: ShareRuntime) -> Self {
        Self { runtime }
    }
}

impl Operation for VerifyShareSnapshot {
    fn on_main<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        Box::pin(async move {
            let snapshot_id = require_snapshot_id(args.section, args.resource).await?;
            let client = self.runtime.client(args.context)?;
            let status = snapshot_status(client.as_ref(), &snapshot_id, STATUS_DELETED).await?;
            let verified = status == STATUS_AVAILABLE;

            let state = VerifyState {
                snapshot_id,
                status: status.clone(),
                verified,
            };
            args.section.update_record(VERIFY_KEY, &state).await?;

            if !verified {
                warn!(resource = %args.resource, %status, "share snapshot failed verification");
                return Err(OperationError::VerificationFailed {
                    resource: args.resource.to_string(),
                    status,
                });
            }
            info!(resource = %args.resource, "share snapshot verified");
            Ok(())
        })
    }
}
