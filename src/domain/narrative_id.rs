//! Type-safe narrative identifier.
//!
//! [`NarrativeId`] is a newtype wrapper around [`uuid::Uuid`] (v4) so that
//! narrative identifiers cannot be confused with other UUIDs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Unique identifier for a token narrative.
///
/// Generated once when the first call for a token address is recorded
/// and immutable thereafter. Travels inside every queue job so the
/// consumer can address the narrative without a lookup by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, format = Uuid)]
pub struct NarrativeId(uuid::Uuid);

impl NarrativeId {
    /// Creates a new random `NarrativeId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `NarrativeId` from an existing [`uuid::Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for NarrativeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NarrativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NarrativeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

impl From<uuid::Uuid> for NarrativeId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

impl From<NarrativeId> for uuid::Uuid {
    fn from(id: NarrativeId) -> Self {
        id.0
    }
}
