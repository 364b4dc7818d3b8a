//! Namespaced views over a [`Bank`].

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Bank, BankError, ListOptions, validate_path};

/// One page of keys returned by [`BankSection::list`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListPage {
    /// Keys relative to the section.
    pub keys: Vec<String>,
    /// Marker for the next page, when the page was full.
    pub next_marker: Option<String>,
}

/// A namespace within a [`Bank`] scoped to `(section, prefix)`.
///
/// Every key is stored as `"{section}/{prefix}/{key}"`, so two sections with
/// different names or prefixes never observe each other's keys.
#[derive(Clone, Debug)]
pub struct BankSection {
    bank: Bank,
    section: String,
    prefix: String,
    writable: bool,
}

impl BankSection {
    /// Creates a writable section.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::InvalidKey`] when `section` or `prefix` is empty
    /// or contains empty, `.` or `..` path segments.
    pub fn new(
        bank: Bank,
        section: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Result<Self, BankError> {
        let section_name = section.into();
        let key_prefix = prefix.into();
        validate_path(&section_name)?;
        validate_path(&key_prefix)?;
        Ok(Self {
            bank,
            section: section_name,
            prefix: key_prefix,
            writable: true,
        })
    }

    /// Returns a view of the same namespace that rejects writes.
    #[must_use]
    pub fn read_only(&self) -> Self {
        Self {
            writable: false,
            ..self.clone()
        }
    }

    /// Returns `true` when updates and deletes are permitted.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.writable
    }

    /// Returns the section name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.section
    }

    /// Returns the key prefix within the section.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the bank backing this section.
    #[must_use]
    pub const fn bank(&self) -> &Bank {
        &self.bank
    }

    fn root(&self) -> String {
        format!("{}/{}/", self.section, self.prefix)
    }

    fn full_key(&self, key: &str) -> Result<String, BankError> {
        validate_path(key)?;
        Ok(format!("{}{key}", self.root()))
    }

    fn ensure_writable(&self) -> Result<(), BankError> {
        if self.writable {
            return Ok(());
        }
        Err(BankError::ReadOnly {
            section: self.root(),
        })
    }

    /// Reads the raw value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::NotFound`] (naming the relative key) when absent.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, BankError> {
        let full = self.full_key(key)?;
        self.bank
            .get_object(&full)
            .await
            .map_err(|err| match err {
                BankError::NotFound { .. } => BankError::NotFound {
                    key: key.to_owned(),
                },
                other => other,
            })
    }

    /// Upserts the raw value under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::ReadOnly`] for read-only views, or the backend
    /// error.
    pub async fn update(&self, key: &str, value: impl Into<Vec<u8>>) -> Result<(), BankError> {
        self.ensure_writable()?;
        let full = self.full_key(key)?;
        self.bank.update_object(&full, value.into()).await
    }

    /// Deletes `key`; absent keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::ReadOnly`] for read-only views, or the backend
    /// error.
    pub async fn delete(&self, key: &str) -> Result<(), BankError> {
        self.ensure_writable()?;
        let full = self.full_key(key)?;
        self.bank.delete_object(&full).await
    }

    /// Lists one page of keys in this section.
    ///
    /// `options.prefix` and `options.marker` are interpreted relative to the
    /// section, and the returned keys are relative as well.
    ///
    /// # Errors
    ///
    /// Returns the backend error when listing fails.
    pub async fn list(&self, options: &ListOptions) -> Result<ListPage, BankError> {
        let root = self.root();
        let scoped = ListOptions {
            prefix: Some(format!(
                "{root}{}",
                options.prefix.as_deref().unwrap_or_default()
            )),
            limit: options.limit,
            marker: options.marker.as_ref().map(|marker| format!("{root}{marker}")),
            sort_dir: options.sort_dir,
        };
        let full_keys = self.bank.list_objects(&scoped).await?;
        let keys: Vec<String> = full_keys
            .iter()
            .filter_map(|full| full.strip_prefix(&root).map(str::to_owned))
            .collect();
        let page_full = options
            .limit
            .is_some_and(|limit| limit > 0 && full_keys.len() >= limit);
        let next_marker = if page_full { keys.last().cloned() } else { None };
        Ok(ListPage { keys, next_marker })
    }

    /// Lists every key in this section matching `options`, following
    /// markers until the backend returns a short page.
    ///
    /// # Errors
    ///
    /// Returns the backend error when any page fails.
    pub async fn list_all(&self, options: &ListOptions) -> Result<Vec<String>, BankError> {
        let mut all = Vec::new();
        let mut cursor = options.clone();
        loop {
            let page = self.list(&cursor).await?;
            all.extend(page.keys);
            match page.next_marker {
                Some(marker) => cursor.marker = Some(marker),
                None => return Ok(all),
            }
        }
    }

    /// Reads and decodes a JSON record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::NotFound`] when absent and
    /// [`BankError::Serialization`] when the stored bytes do not decode.
    pub async fn get_record<T: DeserializeOwned>(&self, key: &str) -> Result<T, BankError> {
        let bytes = self.get(key).await?;
        serde_json::from_slice(&bytes).map_err(|err| BankError::Serialization {
            key: key.to_owned(),
            message: err.to_string(),
        })
    }

    /// Like [`Self::get_record`] but maps a missing key to `None`.
    ///
    /// # Errors
    ///
    /// Returns every error of [`Self::get_record`] except `NotFound`.
    pub async fn find_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, BankError> {
        match self.get_record(key).await {
            Ok(record) => Ok(Some(record)),
            Err(BankError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Encodes `record` as JSON and upserts it under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::Serialization`] when encoding fails, plus the
    /// errors of [`Self::update`].
    pub async fn update_record<T: Serialize + Sync>(
        &self,
        key: &str,
        record: &T,
    ) -> Result<(), BankError> {
        let bytes = serde_json::to_vec(record).map_err(|err| BankError::Serialization {
            key: key.to_owned(),
            message: err.to_string(),
        })?;
        self.update(key, bytes).await
    }
}
