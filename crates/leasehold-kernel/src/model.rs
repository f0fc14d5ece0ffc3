//! Identities and value types shared by every store and the checkout service.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Marker that starts a list item in the rendered membership document.
pub(crate) const LIST_ITEM_MARKER: char = '*';

/// Rejections raised while parsing resource or holder identities.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("{kind} identity is empty")]
    Empty { kind: &'static str },

    #[error("{kind} identity contains a control character: {value:?}")]
    ControlCharacter { kind: &'static str, value: String },

    #[error("holder identity must not start with `*`: {0:?}")]
    ListMarker(String),
}

fn validate(kind: &'static str, raw: &str) -> Result<String, IdentityError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IdentityError::Empty { kind });
    }
    if trimmed.chars().any(char::is_control) {
        return Err(IdentityError::ControlCharacter {
            kind,
            value: trimmed.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// Identifier of a protected resource, or of a membership document.
///
/// Membership documents are addressed with the same identifier space as
/// resources, so one type serves both.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        validate("resource", raw).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ResourceId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(value: ResourceId) -> Self {
        value.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity of a caller that may hold a resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HolderId(String);

impl HolderId {
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let value = validate("holder", raw)?;
        if value.starts_with(LIST_ITEM_MARKER) {
            return Err(IdentityError::ListMarker(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for HolderId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for HolderId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HolderId> for String {
    fn from(value: HolderId) -> Self {
        value.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Version token of a membership document.
///
/// `DocumentVersion::ABSENT` denotes a document that has never been written;
/// a conditional write against it can only create the document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocumentVersion(pub u64);

impl DocumentVersion {
    pub const ABSENT: Self = Self(0);

    pub fn is_absent(self) -> bool {
        self == Self::ABSENT
    }

    /// The token assigned to the next committed write.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for DocumentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absent() {
            f.write_str("absent")
        } else {
            write!(f, "v{}", self.0)
        }
    }
}

/// A resource's checkout policy. Only complete, valid policies exist as
/// values of this type; partial declarations stay `PolicyRecord`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutPolicy {
    max_concurrent: u32,
    lease_duration: Duration,
    membership_document: ResourceId,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("max_concurrent must be at least 1 (got {0})")]
    Capacity(u32),

    #[error("lease duration must be at least one second (got {0}s)")]
    LeaseDuration(i64),
}

impl CheckoutPolicy {
    pub fn new(
        max_concurrent: u32,
        lease_duration: Duration,
        membership_document: ResourceId,
    ) -> Result<Self, PolicyError> {
        if max_concurrent < 1 {
            return Err(PolicyError::Capacity(max_concurrent));
        }
        if lease_duration < Duration::seconds(1) {
            return Err(PolicyError::LeaseDuration(lease_duration.num_seconds()));
        }
        Ok(Self {
            max_concurrent,
            lease_duration,
            membership_document,
        })
    }

    pub fn max_concurrent(&self) -> u32 {
        self.max_concurrent
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn membership_document(&self) -> &ResourceId {
        &self.membership_document
    }

    /// Expiry of a lease granted at `now`, saturating at the calendar maximum.
    pub fn lease_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.lease_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether two policies may share a membership document.
    pub fn agrees_with(&self, other: &CheckoutPolicy) -> bool {
        self.max_concurrent == other.max_concurrent && self.lease_duration == other.lease_duration
    }

    pub fn to_record(&self) -> PolicyRecord {
        PolicyRecord {
            max_concurrent: Some(self.max_concurrent),
            lease_seconds: Some(self.lease_duration.num_seconds()),
            membership_document: Some(self.membership_document.to_string()),
        }
    }
}

/// Persisted policy fields, possibly incomplete (e.g. mid-declaration).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_document: Option<String>,
}

impl PolicyRecord {
    /// The policy this record describes, or `None` when any of the three
    /// fields is missing or invalid. No defaults are guessed.
    pub fn to_policy(&self) -> Option<CheckoutPolicy> {
        let max_concurrent = self.max_concurrent?;
        let lease_seconds = self.lease_seconds?;
        let document = ResourceId::parse(self.membership_document.as_deref()?).ok()?;
        let lease = Duration::try_seconds(lease_seconds)?;
        CheckoutPolicy::new(max_concurrent, lease, document).ok()
    }
}

/// One `(resource, holder) -> expires_at` row of the expiry index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryEntry {
    pub resource: ResourceId,
    pub holder: HolderId,
    pub expires_at: DateTime<Utc>,
}

impl ExpiryEntry {
    pub fn key(&self) -> ExpiryKey {
        ExpiryKey {
            resource: self.resource.clone(),
            holder: self.holder.clone(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Ordering key of the expiry index: resource first, then holder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExpiryKey {
    pub resource: ResourceId,
    pub holder: HolderId,
}

impl ExpiryKey {
    pub fn new(resource: &ResourceId, holder: &HolderId) -> Self {
        Self {
            resource: resource.clone(),
            holder: holder.clone(),
        }
    }
}
