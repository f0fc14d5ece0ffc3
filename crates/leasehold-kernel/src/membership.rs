//! Versioned membership documents.
//!
//! A membership document is the externally readable list of who currently
//! holds a resource. Its text form is one `* <holder>` line per holder, in
//! order, so it can be read and diffed without this crate. Writes are
//! conditional on the version token returned by the last read.

use crate::error::{StoreError, WriteError};
use crate::model::{DocumentVersion, HolderId, LIST_ITEM_MARKER, ResourceId};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Holders of a document together with the version they were read at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    pub holders: Vec<HolderId>,
    pub version: DocumentVersion,
}

impl MembershipSnapshot {
    pub fn contains(&self, holder: &HolderId) -> bool {
        self.holders.contains(holder)
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// Holders with `holder` appended. Never introduces a duplicate.
    pub fn with_holder(&self, holder: &HolderId) -> Vec<HolderId> {
        let mut next = self.holders.clone();
        if !next.contains(holder) {
            next.push(holder.clone());
        }
        next
    }

    /// Holders with every occurrence of `holder` removed, order preserved.
    pub fn without_holder(&self, holder: &HolderId) -> Vec<HolderId> {
        self.holders
            .iter()
            .filter(|existing| *existing != holder)
            .cloned()
            .collect()
    }
}

pub trait MembershipDocuments: Send + Sync {
    /// Current holders and version. A document that was never written reads
    /// as empty at `DocumentVersion::ABSENT`.
    fn read(&self, document: &ResourceId) -> Result<MembershipSnapshot, StoreError>;

    /// Replace the holders if the document is still at `expected`. Returns the
    /// new version, strictly greater than `expected`.
    fn write_if_version_matches(
        &self,
        document: &ResourceId,
        holders: &[HolderId],
        expected: DocumentVersion,
    ) -> Result<DocumentVersion, WriteError>;
}

impl<T: MembershipDocuments + ?Sized> MembershipDocuments for Arc<T> {
    fn read(&self, document: &ResourceId) -> Result<MembershipSnapshot, StoreError> {
        (**self).read(document)
    }

    fn write_if_version_matches(
        &self,
        document: &ResourceId,
        holders: &[HolderId],
        expected: DocumentVersion,
    ) -> Result<DocumentVersion, WriteError> {
        (**self).write_if_version_matches(document, holders, expected)
    }
}

/// Render holders as document text.
pub fn render_holders(holders: &[HolderId]) -> String {
    let mut text = String::new();
    for holder in holders {
        text.push(LIST_ITEM_MARKER);
        text.push(' ');
        text.push_str(holder.as_str());
        text.push('\n');
    }
    text
}

/// Parse document text into holders.
///
/// Malformed or empty lines are skipped. Repeated identities keep their first
/// position only.
pub fn parse_holders(text: &str) -> Vec<HolderId> {
    let mut seen = BTreeSet::new();
    let mut holders = Vec::new();
    for line in text.split(['\r', '\n']) {
        let item = line
            .trim_start()
            .strip_prefix(LIST_ITEM_MARKER)
            .unwrap_or(line);
        let Ok(holder) = HolderId::parse(item) else {
            continue;
        };
        if seen.insert(holder.clone()) {
            holders.push(holder);
        }
    }
    holders
}

/// Content digest of the rendered holder list (`md1_<sha256 hex>`).
pub fn membership_digest(holders: &[HolderId]) -> String {
    let hash = Sha256::digest(render_holders(holders).as_bytes());
    format!("md1_{hash:x}")
}
