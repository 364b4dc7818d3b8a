//! Resource-type plugins and the registry that routes resources to them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::bank::{BankError, BankSection};
use crate::operation::{Operation, OperationError, OperationKind};
use crate::resource::Resource;

pub mod share;

/// Section key holding a resource's [`ResourceStatus`].
pub const STATUS_KEY: &str = "status";

/// Protection status of one resource within a checkpoint.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Protection started.
    Protecting,
    /// Protected data is usable.
    Available,
    /// Protection or deletion failed.
    Error,
    /// Deletion started.
    Deleting,
    /// Protected data was removed.
    Deleted,
}

impl fmt::Display for ResourceStatus {
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

/// Records `status` for the resource owning `section`.
///
/// # Errors
///
/// Returns [`BankError`] when the write fails.
pub async fn set_resource_status(
    section: &BankSection,
    status: ResourceStatus,
) -> Result<(), BankError> {
    section.update_record(STATUS_KEY, &status).await
}

/// Reads the recorded status, if any.
///
/// # Errors
///
/// Returns [`BankError`] for failures other than a missing key.
pub async fn resource_status(section: &BankSection) -> Result<Option<ResourceStatus>, BankError> {
    section.find_record(STATUS_KEY).await
}

/// A provider of lifecycle operations for one or more resource types.
pub trait ProtectionPlugin: Send + Sync {
    /// Resource types this plugin handles.
    fn supported_resource_types(&self) -> Vec<String>;

    /// Schema of the protect options for `resource_type`.
    fn options_schema(&self, resource_type: &str) -> Option<Value>;

    /// Schema of the restore options for `resource_type`.
    fn restore_schema(&self, resource_type: &str) -> Option<Value>;

    /// Schema of the information saved for `resource_type`.
    fn saved_info_schema(&self, resource_type: &str) -> Option<Value>;

    /// Operation protecting `resource`.
    fn protect_operation(&self, resource: &Resource) -> Box<dyn Operation>;

    /// Operation deleting the protected data of `resource`.
    fn delete_operation(&self, resource: &Resource) -> Box<dyn Operation>;

    /// Operation verifying the protected data of `resource`.
    fn verify_operation(&self, resource: &Resource) -> Box<dyn Operation>;

    /// Operation restoring `resource` from protected data.
    fn restore_operation(&self, resource: &Resource) -> Box<dyn Operation>;

    /// Operation of `kind` for `resource`.
    fn operation(&self, kind: OperationKind, resource: &Resource) -> Box<dyn Operation> {
        match kind {
            OperationKind::Protect => self.protect_operation(resource),
            OperationKind::Delete => self.delete_operation(resource),
            OperationKind::Verify => self.verify_operation(resource),
            OperationKind::Restore => self.restore_operation(resource),
        }
    }
}

/// Errors raised while registering plugins.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// Raised when two plugins claim the same resource type.
    #[error("resource type {resource_type} is already handled by another plugin")]
    Duplicate {
        /// Contested resource type.
        resource_type: String,
    },
}

/// Maps resource types to the plugin handling them.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn ProtectionPlugin>>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.plugins.keys().collect();
        types.sort();
        f.debug_struct("PluginRegistry")
            .field("resource_types", &types)
            .finish()
    }
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `plugin` for every type it supports.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when a supported type is already
    /// registered; the registry is left unchanged in that case.
    pub fn register(&mut self, plugin: Arc<dyn ProtectionPlugin>) -> Result<(), RegistryError> {
        let types = plugin.supported_resource_types();
        if let Some(taken) = types.iter().find(|kind| self.plugins.contains_key(*kind)) {
            return Err(RegistryError::Duplicate {
                resource_type: taken.clone(),
            });
        }
        for kind in types {
            debug!(resource_type = %kind, "registered protection plugin");
            self.plugins.insert(kind, Arc::clone(&plugin));
        }
        Ok(())
    }

    /// Returns the plugin handling `resource_type`.
    #[must_use]
    pub fn plugin_for(&self, resource_type: &str) -> Option<Arc<dyn ProtectionPlugin>> {
        self.plugins.get(resource_type).cloned()
    }

    /// Returns every registered resource type, sorted.
    #[must_use]
    pub fn resource_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.plugins.keys().cloned().collect();
        types.sort();
        types
    }

    /// Resolves the operation of `kind` for `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Unsupported`] when no plugin handles the
    /// resource's type.
    pub fn operation(
        &self,
        kind: OperationKind,
        resource: &Resource,
    ) -> Result<Box<dyn Operation>, OperationError> {
        self.plugins
            .get(&resource.kind)
            .map(|plugin| plugin.operation(kind, resource))
            .ok_or_else(|| OperationError::Unsupported {
                resource_type: resource.kind.clone(),
                kind,
            })
    }
}
