//! Protectable resource identities.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Resource type identifier for compute instances.
pub const SERVER_RESOURCE_TYPE: &str = "OS::Nova::Server";
/// Resource type identifier for block volumes.
pub const VOLUME_RESOURCE_TYPE: &str = "OS::Cinder::Volume";
/// Resource type identifier for shared file systems.
pub const SHARE_RESOURCE_TYPE: &str = "OS::Manila::Share";
/// Resource type identifier for networks.
pub const NETWORK_RESOURCE_TYPE: &str = "OS::Neutron::Network";

/// An identified protectable cloud entity.
///
/// Equality and hashing consider only the `(type, id)` pair; the display name
/// is informational.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Resource {
    /// Provider identifier of the resource.
    pub id: String,
    /// Resource type, for example [`SHARE_RESOURCE_TYPE`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Human readable name.
    pub name: String,
}

impl Resource {
    /// Creates a resource, trimming string fields.
    #[must_use]
    pub fn new(kind: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_owned(),
            kind: kind.into().trim().to_owned(),
            name: name.into().trim().to_owned(),
        }
    }

    /// Returns the identity key used for deduplication.
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind.clone(),
            id: self.id.clone(),
        }
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.id == other.id
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Owned `(type, id)` identity of a [`Resource`].
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResourceKey {
    /// Resource type.
    pub kind: String,
    /// Provider identifier.
    pub id: String,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn identity_ignores_name() {
        let first = Resource::new(SHARE_RESOURCE_TYPE, "123", "data");
        let second = Resource::new(SHARE_RESOURCE_TYPE, "123", "renamed");
        assert_eq!(first, second);

        let set: HashSet<_> = [first, second].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn identity_distinguishes_types() {
        let share = Resource::new(SHARE_RESOURCE_TYPE, "123", "x");
        let volume = Resource::new(VOLUME_RESOURCE_TYPE, "123", "x");
        assert_ne!(share, volume);
        assert_ne!(share.key(), volume.key());
    }

    #[test]
    fn serializes_kind_as_type() {
        let resource = Resource::new(SHARE_RESOURCE_TYPE, " 42 ", "share");
        let json = serde_json::to_value(&resource).expect("serialize resource");
        assert_eq!(json["type"], SHARE_RESOURCE_TYPE);
        assert_eq!(json["id"], "42");
    }
}
