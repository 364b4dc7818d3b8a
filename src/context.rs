//! Request context and per-resource parameters passed through every stage.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::resource::Resource;

/// Authentication context of the request that started a flow.
///
/// The orchestration core never reads these fields; they are handed
/// unchanged to plugins, which use them to build backend clients.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RequestContext {
    /// Identifier of the requesting user.
    pub user_id: Option<String>,
    /// Project (tenant) the request is scoped to.
    pub project_id: Option<String>,
    /// Token used to authenticate against backend services.
    pub auth_token: Option<String>,
    /// Correlation identifier for logs.
    pub request_id: Option<String>,
}

impl RequestContext {
    /// Creates a context for `user_id` within `project_id`.
    #[must_use]
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    /// Sets the authentication token.
    #[must_use]
    pub fn auth_token(mut self, value: impl Into<String>) -> Self {
        self.auth_token = Some(value.into());
        self
    }
}

/// Plan parameters keyed by resource type or `"{type}#{id}"`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Parameters(Map<String, Value>);

impl Parameters {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets parameters for every resource of `kind`.
    #[must_use]
    pub fn with_type(mut self, kind: impl Into<String>, value: Value) -> Self {
        self.0.insert(kind.into(), value);
        self
    }

    /// Sets parameters for a single resource, overriding type-level values.
    #[must_use]
    pub fn with_resource(mut self, resource: &Resource, value: Value) -> Self {
        self.0.insert(resource.to_string(), value);
        self
    }

    /// Returns the parameters that apply to `resource`.
    ///
    /// A resource-specific entry wins over a type-level one; when neither is
    /// present an empty object is returned.
    #[must_use]
    pub fn for_resource(&self, resource: &Resource) -> Value {
        self.0
            .get(&resource.to_string())
            .or_else(|| self.0.get(&resource.kind))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}
