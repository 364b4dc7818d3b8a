//! Checkpoints group the persisted state of one protection run.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bank::{Bank, BankError, BankSection, ListOptions, validate_segment};
use crate::resource::{Resource, ResourceKey};

const CHECKPOINT_ROOT: &str = "checkpoints";
const RESOURCE_PREFIX: &str = "resources";
const METADATA_PREFIX: &str = "metadata";
const METADATA_KEY: &str = "checkpoint";
const DELETE_PAGE_SIZE: usize = 100;

/// Lifecycle status of a checkpoint.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    /// A protect flow is running.
    Protecting,
    /// Every resource was protected.
    Available,
    /// A flow over the checkpoint failed.
    Error,
    /// A delete flow is running.
    Deleting,
    /// Protected data was removed.
    Deleted,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Protecting => "protecting",
            Self::Available => "available",
            Self::Error => "error",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        };
        f.write_str(label)
    }
}

/// Metadata record persisted for each checkpoint.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CheckpointMetadata {
    /// Checkpoint identifier.
    pub id: String,
    /// Owner reported by the bank at creation time.
    pub owner_id: String,
    /// Current status.
    pub status: CheckpointStatus,
}

/// One protection or restore run and its resource sections.
///
/// Sections are keyed by resource identity, type and id. The mapping is
/// stable for the life of the value, so a retried node reads back the state
/// written by an earlier attempt.
#[derive(Debug)]
pub struct Checkpoint {
    id: String,
    bank: Bank,
    sections: Mutex<HashMap<ResourceKey, BankSection>>,
}

impl Checkpoint {
    /// Opens a handle on checkpoint `id` without touching the bank.
    #[must_use]
    pub fn new(bank: Bank, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bank,
            sections: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a checkpoint with a fresh identifier and records it as
    /// [`CheckpointStatus::Protecting`].
    ///
    /// # Errors
    ///
    /// Returns [`BankError`] when the owner lookup or the metadata write
    /// fails.
    pub async fn create(bank: Bank) -> Result<Self, BankError> {
        let checkpoint = Self::new(bank, uuid::Uuid::new_v4().to_string());
        let owner_id = checkpoint.bank.get_owner_id().await?;
        let metadata = CheckpointMetadata {
            id: checkpoint.id.clone(),
            owner_id,
            status: CheckpointStatus::Protecting,
        };
        checkpoint
            .metadata_section()?
            .update_record(METADATA_KEY, &metadata)
            .await?;
        debug!(checkpoint = %checkpoint.id, "checkpoint created");
        Ok(checkpoint)
    }

    /// Returns the checkpoint identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the bank holding the checkpoint.
    #[must_use]
    pub const fn bank(&self) -> &Bank {
        &self.bank
    }

    fn section_name(&self) -> String {
        format!("{CHECKPOINT_ROOT}/{}", self.id)
    }

    fn metadata_section(&self) -> Result<BankSection, BankError> {
        BankSection::new(self.bank.clone(), self.section_name(), METADATA_PREFIX)
    }

    /// Returns the section for `resource`, creating it on first use.
    ///
    /// The section prefix is `resources/{type}/{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::InvalidKey`] when the type or id is not a single
    /// path segment.
    pub fn resource_section(&self, resource: &Resource) -> Result<BankSection, BankError> {
        let key = resource.key();
        let mut sections = self.sections.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(section) = sections.get(&key) {
            return Ok(section.clone());
        }
        validate_segment(&key.kind)?;
        validate_segment(&key.id)?;
        let section = BankSection::new(
            self.bank.clone(),
            self.section_name(),
            format!("{RESOURCE_PREFIX}/{}/{}", key.kind, key.id),
        )?;
        sections.insert(key, section.clone());
        Ok(section)
    }

    /// Reads the persisted metadata record.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::NotFound`] when the checkpoint was never created.
    pub async fn metadata(&self) -> Result<CheckpointMetadata, BankError> {
        self.metadata_section()?.get_record(METADATA_KEY).await
    }

    /// Returns the persisted status.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::metadata`].
    pub async fn status(&self) -> Result<CheckpointStatus, BankError> {
        Ok(self.metadata().await?.status)
    }

    /// Persists a new status, keeping the rest of the metadata.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::metadata`] and of the metadata write.
    pub async fn set_status(&self, status: CheckpointStatus) -> Result<(), BankError> {
        let section = self.metadata_section()?;
        let mut metadata: CheckpointMetadata = section.get_record(METADATA_KEY).await?;
        metadata.status = status;
        section.update_record(METADATA_KEY, &metadata).await?;
        debug!(checkpoint = %self.id, %status, "checkpoint status updated");
        Ok(())
    }

    /// Removes every key stored under this checkpoint, metadata included.
    ///
    /// Returns the number of keys deleted.
    ///
    /// # Errors
    ///
    /// Returns the first backend error encountered; keys deleted before the
    /// failure stay deleted.
    pub async fn delete(&self) -> Result<usize, BankError> {
        let prefix = format!("{}/", self.section_name());
        let mut deleted = 0;
        loop {
            // Deleted keys drop out of later pages, so always list from the start.
            let page = self
                .bank
                .list_objects(&ListOptions::with_prefix(prefix.clone()).limit(DELETE_PAGE_SIZE))
                .await?;
            if page.is_empty() {
                break;
            }
            for key in &page {
                self.bank.delete_object(key).await?;
                deleted += 1;
            }
        }
        self.sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!(checkpoint = %self.id, deleted, "checkpoint deleted");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::resource::{SERVER_RESOURCE_TYPE, SHARE_RESOURCE_TYPE};
    use crate::test_support::MemoryBankPlugin;

    fn bank() -> Bank {
        Bank::new(MemoryBankPlugin::with_owner("tenant-a"))
    }

    fn share(id: &str) -> Resource {
        Resource::new(SHARE_RESOURCE_TYPE, id, id)
    }

    #[tokio::test]
    async fn resource_sections_are_reused() {
        let checkpoint = Checkpoint::new(bank(), "cp-1");
        let first = checkpoint.resource_section(&share("share-1")).expect("section");
        first.update("snapshot_id", "1234").await.expect("write");

        let second = checkpoint.resource_section(&share("share-1")).expect("section");
        assert_eq!(second.name(), first.name());
        assert_eq!(second.prefix(), first.prefix());
        assert_eq!(second.get("snapshot_id").await.expect("read"), b"1234");
    }

    #[tokio::test]
    async fn create_records_owner_and_status() {
        let checkpoint = Checkpoint::create(bank()).await.expect("create");
        let metadata = checkpoint.metadata().await.expect("metadata");
        assert_eq!(metadata.owner_id, "tenant-a");
        assert_eq!(metadata.status, CheckpointStatus::Protecting);
        assert_eq!(metadata.id, checkpoint.id());
    }

    #[tokio::test]
    async fn set_status_persists() {
        let checkpoint = Checkpoint::create(bank()).await.expect("create");
        checkpoint
            .set_status(CheckpointStatus::Available)
            .await
            .expect("set status");
        assert_eq!(
            checkpoint.status().await.expect("status"),
            CheckpointStatus::Available
        );
    }

    #[tokio::test]
    async fn status_of_unknown_checkpoint_is_not_found() {
        let checkpoint = Checkpoint::new(bank(), "missing");
        let err = checkpoint.status().await.expect_err("no metadata");
        assert!(matches!(err, BankError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_removes_only_this_checkpoint() {
        let shared = bank();
        let doomed = Checkpoint::create(shared.clone()).await.expect("create");
        let kept = Checkpoint::create(shared.clone()).await.expect("create");
        for index in 0..(DELETE_PAGE_SIZE + 5) {
            doomed
                .resource_section(&share(&format!("r{index}")))
                .expect("section")
                .update("state", "x")
                .await
                .expect("write");
        }
        kept.resource_section(&share("r0"))
            .expect("section")
            .update("state", "y")
            .await
            .expect("write");

        let deleted = doomed.delete().await.expect("delete");
        assert_eq!(deleted, DELETE_PAGE_SIZE + 5 + 1);
        assert!(doomed.status().await.is_err());
        assert_eq!(
            kept.resource_section(&share("r0"))
                .expect("section")
                .get("state")
                .await
                .expect("kept data"),
            b"y"
        );
    }

    #[tokio::test]
    async fn sections_are_keyed_by_type_and_id() {
        let checkpoint = Checkpoint::new(bank(), "cp-1");
        let server = Resource::new(SERVER_RESOURCE_TYPE, "1", "vm");
        checkpoint
            .resource_section(&share("1"))
            .expect("section")
            .update("snapshot_id", "1234")
            .await
            .expect("write");

        let other = checkpoint.resource_section(&server).expect("section");
        let err = other.get("snapshot_id").await.expect_err("separate section");
        assert!(matches!(err, BankError::NotFound { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn nested_ids_cannot_reach_a_sibling_section() {
        let checkpoint = Checkpoint::new(bank(), "cp-1");
        checkpoint
            .resource_section(&share("a"))
            .expect("section")
            .update("snapshot_id", "1234")
            .await
            .expect("write");

        let err = checkpoint
            .resource_section(&share("a/b"))
            .expect_err("slash in id");
        assert!(matches!(err, BankError::InvalidKey { .. }), "got {err:?}");
        let listed = checkpoint
            .resource_section(&share("a"))
            .expect("section")
            .list_all(&ListOptions::default())
            .await
            .expect("list");
        assert_eq!(listed, vec![String::from("snapshot_id")]);
    }

    #[rstest]
    #[case("a/b")]
    #[case("..")]
    #[case(".")]
    fn unsafe_ids_are_rejected(#[case] id: &str) {
        let checkpoint = Checkpoint::new(bank(), "cp-1");
        let err = checkpoint
            .resource_section(&share(id))
            .expect_err("unsafe id");
        assert!(matches!(err, BankError::InvalidKey { .. }), "got {err:?}");
    }
}
