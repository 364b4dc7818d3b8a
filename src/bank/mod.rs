//! Pluggable checkpoint persistence.
//!
//! A [`Bank`] wraps exactly one [`BankPlugin`] implementation and delegates
//! every call to it. Callers normally work through a [`BankSection`], which
//! scopes keys to one `(section, prefix)` namespace such as a checkpoint and
//! a resource within it.
//!
//! No concrete backend ships with the crate; object stores, databases and
//! file systems implement [`BankPlugin`] outside of it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

mod section;

pub use section::{BankSection, ListPage};

/// Future returned by bank operations.
pub type BankFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BankError>> + Send + 'a>>;

/// Errors raised by bank plugins and sections.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BankError {
    /// Raised when a key has no stored value.
    #[error("key {key} not found")]
    NotFound {
        /// Key that was requested.
        key: String,
    },
    /// Raised when a key, section name or prefix is malformed.
    #[error("invalid key '{key}': {reason}")]
    InvalidKey {
        /// Offending key.
        key: String,
        /// Why the key was rejected.
        reason: String,
    },
    /// Raised when writing through a read-only section.
    #[error("section {section} is read-only")]
    ReadOnly {
        /// Section that rejected the write.
        section: String,
    },
    /// Raised when a stored record cannot be encoded or decoded.
    #[error("failed to (de)serialize {key}: {message}")]
    Serialization {
        /// Key holding the record.
        key: String,
        /// Serializer error message.
        message: String,
    },
    /// Wrapper for backend level failures.
    #[error("bank backend error: {message}")]
    Backend {
        /// Message reported by the backend.
        message: String,
    },
}

/// Ordering applied to listed keys.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SortDirection {
    /// Lexicographically ascending keys.
    #[default]
    Ascending,
    /// Lexicographically descending keys.
    Descending,
}

/// Filtering and pagination options for [`BankPlugin::list_objects`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListOptions {
    /// Only keys starting with this prefix are returned.
    pub prefix: Option<String>,
    /// Maximum number of keys per page.
    pub limit: Option<usize>,
    /// Only keys strictly after this key, in sort order, are returned.
    pub marker: Option<String>,
    /// Sort order of the page.
    pub sort_dir: SortDirection,
}

impl ListOptions {
    /// Lists every key under `prefix`.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    /// Sets the page size.
    #[must_use]
    pub const fn limit(mut self, value: usize) -> Self {
        self.limit = Some(value);
        self
    }

    /// Resumes listing after `marker`.
    #[must_use]
    pub fn marker(mut self, value: Option<String>) -> Self {
        self.marker = value;
        self
    }

    /// Sets the sort direction.
    #[must_use]
    pub const fn sort_dir(mut self, value: SortDirection) -> Self {
        self.sort_dir = value;
        self
    }
}

/// Storage capability implemented by concrete backends.
///
/// Implementations must provide last-write-wins `update_object`, idempotent
/// `delete_object` and read-after-write consistency per key. Cross-key
/// transactions are not expected.
pub trait BankPlugin: fmt::Debug + Send + Sync {
    /// Returns the value stored under `key`.
    ///
    /// Fails with [`BankError::NotFound`] when the key is absent.
    fn get_object<'a>(&'a self, key: &'a str) -> BankFuture<'a, Vec<u8>>;

    /// Stores `value` under `key`, overwriting any previous value.
    fn update_object<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BankFuture<'a, ()>;

    /// Removes `key`; succeeds when the key is already absent.
    fn delete_object<'a>(&'a self, key: &'a str) -> BankFuture<'a, ()>;

    /// Returns one page of keys matching `options`.
    fn list_objects<'a>(&'a self, options: &'a ListOptions) -> BankFuture<'a, Vec<String>>;

    /// Returns the identity of the entity that owns the bank.
    fn get_owner_id(&self) -> BankFuture<'_, String>;
}

/// Process-wide handle around a single [`BankPlugin`].
#[derive(Clone, Debug)]
pub struct Bank {
    plugin: Arc<dyn BankPlugin>,
}

impl Bank {
    /// Wraps `plugin` in a bank handle.
    #[must_use]
    pub fn new(plugin: impl BankPlugin + 'static) -> Self {
        Self {
            plugin: Arc::new(plugin),
        }
    }

    /// Wraps an already shared plugin.
    #[must_use]
    pub const fn from_shared(plugin: Arc<dyn BankPlugin>) -> Self {
        Self { plugin }
    }

    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::NotFound`] when the key is absent, or any backend
    /// error.
    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>, BankError> {
        self.plugin.get_object(key).await
    }

    /// Upserts `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns the backend error when the write fails.
    pub async fn update_object(&self, key: &str, value: Vec<u8>) -> Result<(), BankError> {
        self.plugin.update_object(key, value).await
    }

    /// Deletes `key` if present.
    ///
    /// # Errors
    ///
    /// Returns the backend error when the delete fails.
    pub async fn delete_object(&self, key: &str) -> Result<(), BankError> {
        self.plugin.delete_object(key).await
    }

    /// Lists one page of keys.
    ///
    /// # Errors
    ///
    /// Returns the backend error when listing fails.
    pub async fn list_objects(&self, options: &ListOptions) -> Result<Vec<String>, BankError> {
        self.plugin.list_objects(options).await
    }

    /// Returns the bank owner's identity.
    ///
    /// # Errors
    ///
    /// Returns the backend error when the owner cannot be determined.
    pub async fn get_owner_id(&self) -> Result<String, BankError> {
        self.plugin.get_owner_id().await
    }
}

/// Checks that `path` is a non-empty, `/`-separated path without empty,
/// `.` or `..` segments.
pub(crate) fn validate_path(path: &str) -> Result<(), BankError> {
    let reject = |reason: &str| {
        Err(BankError::InvalidKey {
            key: path.to_owned(),
            reason: reason.to_owned(),
        })
    };
    if path.is_empty() {
        return reject("must not be empty");
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return reject("must not contain empty, '.' or '..' segments");
    }
    Ok(())
}

/// Checks that `segment` is a valid path containing no `/`.
pub(crate) fn validate_segment(segment: &str) -> Result<(), BankError> {
    validate_path(segment)?;
    if segment.contains('/') {
        return Err(BankError::InvalidKey {
            key: segment.to_owned(),
            reason: String::from("must be a single path segment"),
        });
    }
    Ok(())
}
