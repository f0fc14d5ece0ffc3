//! Error types for checkout operations and the stores beneath them.

use crate::model::{DocumentVersion, ResourceId};

/// Failure of an underlying policy, index, or document store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or the operation could not complete.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Persisted state could not be decoded.
    #[error("corrupted store: {0}")]
    Corrupt(String),
}

/// Outcome of a rejected conditional document write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// Another writer committed since `expected` was read.
    #[error("version conflict: expected {expected}, document is at {actual}")]
    Conflict {
        expected: DocumentVersion,
        actual: DocumentVersion,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by `CheckoutService`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    /// The resource has no checkout policy; checkout is unavailable here.
    #[error("checkout is not configured for {0}")]
    PolicyNotConfigured(ResourceId),

    /// Every slot of the resource is taken.
    #[error("all {max_concurrent} slot(s) of {resource} are checked out")]
    CapacityExceeded {
        resource: ResourceId,
        max_concurrent: u32,
    },

    /// Conditional writes kept conflicting until the retry budget ran out.
    #[error("gave up on {resource} after {attempts} conflicting attempt(s)")]
    Contention { resource: ResourceId, attempts: u32 },

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

impl CheckoutError {
    /// Whether retrying the whole operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Contention { .. } | Self::StoreUnavailable(_))
    }

    /// Stable machine-readable class for payloads and logs.
    pub fn class(&self) -> &'static str {
        match self {
            Self::PolicyNotConfigured(_) => "policy_not_configured",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Contention { .. } => "contention",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }
}
