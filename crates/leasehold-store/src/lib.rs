//! # leasehold-store
//!
//! File-backed implementations of the three checkout stores, laid out under
//! one root directory:
//!
//! ```text
//! <root>/policies.jsonl        ← PolicyStore
//! <root>/expiry.jsonl          ← ExpiryIndex
//! <root>/documents/<enc>.txt   ← MembershipDocuments (text)
//! <root>/documents/<enc>.rev   ← MembershipDocuments (version)
//! ```
//!
//! Every mutation is lock-scoped and lands through temp file + rename, so
//! separate processes can share a root.

pub mod atomic_store;
pub mod document_file;
pub mod expiry_file;
pub mod jsonl;
pub mod policy_file;

pub use atomic_store::{AtomicStoreError, mutate_records, with_lock};
pub use document_file::{DocumentDir, encode_document_name};
pub use expiry_file::ExpiryFile;
pub use jsonl::JsonlError;
pub use policy_file::PolicyFile;

use leasehold_kernel::{CheckoutService, RetryPolicy, StoreError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const POLICIES_FILE: &str = "policies.jsonl";
pub const EXPIRY_FILE: &str = "expiry.jsonl";
pub const DOCUMENTS_DIR: &str = "documents";

impl From<JsonlError> for StoreError {
    fn from(error: JsonlError) -> Self {
        match error {
            JsonlError::Parse(..) | JsonlError::Corrupt(_) => Self::Corrupt(error.to_string()),
            JsonlError::Io(..) | JsonlError::Serialize(_) => Self::Unavailable(error.to_string()),
        }
    }
}

impl From<AtomicStoreError> for StoreError {
    fn from(error: AtomicStoreError) -> Self {
        match error {
            AtomicStoreError::Jsonl(inner) => inner.into(),
            AtomicStoreError::Store(inner) => inner,
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// The checkout service over a file root.
pub type FileCheckoutService =
    CheckoutService<Arc<PolicyFile>, Arc<ExpiryFile>, Arc<DocumentDir>>;

/// The three file stores sharing one root directory.
#[derive(Debug, Clone)]
pub struct FileStores {
    root: PathBuf,
    pub policies: Arc<PolicyFile>,
    pub expiry: Arc<ExpiryFile>,
    pub documents: Arc<DocumentDir>,
}

impl FileStores {
    /// Stores rooted at `root`. Nothing is created until the first write.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            policies: Arc::new(PolicyFile::new(root.join(POLICIES_FILE))),
            expiry: Arc::new(ExpiryFile::new(root.join(EXPIRY_FILE))),
            documents: Arc::new(DocumentDir::new(root.join(DOCUMENTS_DIR))),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn service(&self, retry: RetryPolicy) -> FileCheckoutService {
        CheckoutService::new(
            Arc::clone(&self.policies),
            Arc::clone(&self.expiry),
            Arc::clone(&self.documents),
        )
        .with_retry(retry)
    }
}
