//! Organization identity.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identifier of an organization participating in the federation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(String);

impl OrganizationId {
    /// Wraps a raw organization identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` when the identifier is empty or only whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrganizationId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for OrganizationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Exposes this node's own organization identity.
///
/// Cheap to clone; every publisher and consumer holds a copy.
#[derive(Debug, Clone)]
pub struct OrganizationRegistry {
    own: Arc<OrganizationId>,
}

impl OrganizationRegistry {
    /// Creates a registry for the given organization.
    #[must_use]
    pub fn new(own: OrganizationId) -> Self {
        Self { own: Arc::new(own) }
    }

    /// The organization this node runs on behalf of.
    #[must_use]
    pub fn own_organization_id(&self) -> &OrganizationId {
        &self.own
    }

    /// Returns `true` if `candidate` is this node's organization.
    #[must_use]
    pub fn is_own(&self, candidate: &OrganizationId) -> bool {
        *self.own == *candidate
    }
}
