//! # leasehold-kernel
//!
//! Temporary, capacity-limited access to protected resources.
//!
//! At most `max_concurrent` holders may hold a resource at once, each grant
//! lasts a fixed lease, and expired grants are revoked so the slot frees up
//! again. Three independently stored facts back this:
//!
//! ```text
//! PolicyStore           ← capacity, lease, membership document per resource
//!     │
//! MembershipDocuments   ← who holds it (authoritative, versioned, OCC writes)
//!     │
//! ExpiryIndex           ← until when (per resource/holder, range-scannable)
//!     │
//! CheckoutService       ← grant / revoke / sweep / status
//! ```
//!
//! The service is a library: it spawns nothing and holds no lock across a
//! store call. Concurrent callers are arbitrated by the conditional document
//! write alone.

pub mod declaration;
pub mod error;
pub mod expiry;
pub mod membership;
pub mod memory;
pub mod model;
pub mod policy;
pub mod service;

pub use declaration::{DeclarationError, DeclareOutcome, declare, parse_declaration, undeclare};
pub use error::{CheckoutError, StoreError, WriteError};
pub use expiry::{ExpiredEntries, ExpiryIndex, ScanFilter, expired_sentinel};
pub use membership::{
    MembershipDocuments, MembershipSnapshot, membership_digest, parse_holders, render_holders,
};
pub use memory::{MemoryBackend, MemoryDocuments, MemoryExpiryIndex, MemoryPolicyStore};
pub use model::{
    CheckoutPolicy, DocumentVersion, ExpiryEntry, ExpiryKey, HolderId, IdentityError,
    PolicyError, PolicyRecord, ResourceId,
};
pub use policy::PolicyStore;
pub use service::{
    ActiveGrant, CheckoutService, CheckoutStatus, DEFAULT_MAX_ATTEMPTS, GrantOutcome,
    RetryPolicy, SweepFailure, SweepReport, days_until,
};
