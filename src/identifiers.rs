//! Identifier types for cohorts, tasks, and request tracking

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Cohort ID - local identity of a cohort within an analysis session
///
/// Cohort IDs are generated client-side when a derivation produces a new
/// cohort. They are distinct from the backend identity ([`DbCohortId`]),
/// which is assigned by the server when the filtered cohort is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CohortId(Uuid);

impl CohortId {
    /// Create a new random cohort ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CohortId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CohortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<CohortId> for Uuid {
    fn from(id: CohortId) -> Self {
        id.0
    }
}

impl From<&CohortId> for Uuid {
    fn from(id: &CohortId) -> Self {
        id.0
    }
}

/// Task ID - identity of a derivation task within an analysis session
///
/// Tasks are the edges of the derivation graph; each task consumes input
/// cohort(s) and produces output cohort(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new random task ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TaskId> for Uuid {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl From<&TaskId> for Uuid {
    fn from(id: &TaskId) -> Self {
        id.0
    }
}

/// Backend identity of a cohort
///
/// Assigned by the server when a cohort is created; opaque to the core.
/// Two cohorts with the same `DbCohortId` denote the same immutable
/// server-side subset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct DbCohortId(String);

impl DbCohortId {
    /// Create from a string
    pub fn from(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DbCohortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attribute ID - identifies a dataset column or derived column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct AttributeId(String);

impl AttributeId {
    /// Create from a string
    pub fn from(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token attached to a recomputation request for a view region
///
/// Tokens are monotonically increasing per region. A response carrying a
/// token older than the region's current token is stale and must be
/// discarded without mutating shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestToken(u64);

impl RequestToken {
    /// Get the underlying sequence number
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request:{}", self.0)
    }
}

/// Issues monotonically increasing [`RequestToken`]s for one view region
///
/// Each user-triggered recomputation calls [`TokenIssuer::issue`]; when the
/// computation finishes, the caller checks [`TokenIssuer::is_current`]
/// before applying the result. There is no cancellation of in-flight work,
/// only discarding of stale results.
#[derive(Debug, Default)]
pub struct TokenIssuer {
    next: AtomicU64,
}

impl TokenIssuer {
    /// Create an issuer with no tokens handed out yet
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Issue the next token, superseding all previously issued ones
    pub fn issue(&self) -> RequestToken {
        RequestToken(self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recently issued token, if any
    pub fn current(&self) -> Option<RequestToken> {
        match self.next.load(Ordering::SeqCst) {
            0 => None,
            n => Some(RequestToken(n)),
        }
    }

    /// Whether `token` is still the most recently issued token
    pub fn is_current(&self, token: RequestToken) -> bool {
        self.current() == Some(token)
    }
}
