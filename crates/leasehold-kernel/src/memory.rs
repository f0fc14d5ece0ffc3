//! In-memory implementations of the three stores.
//!
//! Each store is internally synchronized, so one instance can be shared
//! across threads (wrap it in `Arc`). Membership documents are kept in their
//! rendered text form so reads go through the same tolerant parser as any
//! external copy of the document.

use crate::error::{StoreError, WriteError};
use crate::expiry::{ExpiryIndex, ScanFilter, expired_sentinel};
use crate::membership::{MembershipDocuments, MembershipSnapshot, parse_holders, render_holders};
use crate::model::{DocumentVersion, ExpiryEntry, ExpiryKey, HolderId, PolicyRecord, ResourceId};
use crate::policy::PolicyStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<'a, T>(mutex: &'a Mutex<T>, store: &str) -> Result<MutexGuard<'a, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable(format!("{store} lock poisoned")))
}

#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    records: Mutex<BTreeMap<ResourceId, PolicyRecord>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PolicyStore for MemoryPolicyStore {
    fn record(&self, resource: &ResourceId) -> Result<Option<PolicyRecord>, StoreError> {
        Ok(lock(&self.records, "policy store")?.get(resource).cloned())
    }

    fn records(&self) -> Result<Vec<(ResourceId, PolicyRecord)>, StoreError> {
        Ok(lock(&self.records, "policy store")?
            .iter()
            .map(|(resource, record)| (resource.clone(), record.clone()))
            .collect())
    }

    fn put_with(
        &self,
        resource: &ResourceId,
        decide: &mut dyn FnMut(&[(ResourceId, PolicyRecord)]) -> Option<PolicyRecord>,
    ) -> Result<(), StoreError> {
        let mut records = lock(&self.records, "policy store")?;
        let view: Vec<_> = records
            .iter()
            .map(|(resource, record)| (resource.clone(), record.clone()))
            .collect();
        if let Some(record) = decide(&view) {
            records.insert(resource.clone(), record);
        }
        Ok(())
    }

    fn remove(&self, resource: &ResourceId) -> Result<bool, StoreError> {
        Ok(lock(&self.records, "policy store")?
            .remove(resource)
            .is_some())
    }
}

#[derive(Debug, Default)]
pub struct MemoryExpiryIndex {
    rows: Mutex<BTreeMap<ExpiryKey, DateTime<Utc>>>,
}

impl MemoryExpiryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows, expired or not.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.rows, "expiry index")?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl ExpiryIndex for MemoryExpiryIndex {
    fn get(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(lock(&self.rows, "expiry index")?
            .get(&ExpiryKey::new(resource, holder))
            .copied())
    }

    fn insert_if_absent(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut rows = lock(&self.rows, "expiry index")?;
        let key = ExpiryKey::new(resource, holder);
        if rows.contains_key(&key) {
            return Ok(false);
        }
        rows.insert(key, expires_at);
        Ok(true)
    }

    fn delete(&self, resource: &ResourceId, holder: &HolderId) -> Result<bool, StoreError> {
        Ok(lock(&self.rows, "expiry index")?
            .remove(&ExpiryKey::new(resource, holder))
            .is_some())
    }

    fn delete_if(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut rows = lock(&self.rows, "expiry index")?;
        let key = ExpiryKey::new(resource, holder);
        if rows.get(&key) != Some(&expires_at) {
            return Ok(false);
        }
        rows.remove(&key);
        Ok(true)
    }

    fn set_expired(&self, resource: &ResourceId, holder: &HolderId) -> Result<bool, StoreError> {
        let mut rows = lock(&self.rows, "expiry index")?;
        match rows.get_mut(&ExpiryKey::new(resource, holder)) {
            Some(expires_at) => {
                *expires_at = expired_sentinel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn scan_page(
        &self,
        filter: &ScanFilter,
        after: Option<&ExpiryKey>,
        limit: usize,
    ) -> Result<Vec<ExpiryEntry>, StoreError> {
        let rows = lock(&self.rows, "expiry index")?;
        let lower = match after {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };
        Ok(rows
            .range((lower, Bound::Unbounded))
            .map(|(key, expires_at)| ExpiryEntry {
                resource: key.resource.clone(),
                holder: key.holder.clone(),
                expires_at: *expires_at,
            })
            .filter(|entry| filter.matches(entry))
            .take(limit)
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryDocuments {
    documents: Mutex<BTreeMap<ResourceId, (String, DocumentVersion)>>,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw document text as an external reader would see it.
    pub fn text(&self, document: &ResourceId) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.documents, "membership documents")?
            .get(document)
            .map(|(text, _)| text.clone()))
    }

    /// Replace a document's text unconditionally, as an outside editor would.
    /// The version still advances.
    pub fn overwrite_text(
        &self,
        document: &ResourceId,
        text: impl Into<String>,
    ) -> Result<DocumentVersion, StoreError> {
        let mut documents = lock(&self.documents, "membership documents")?;
        let version = documents
            .get(document)
            .map(|(_, version)| *version)
            .unwrap_or(DocumentVersion::ABSENT)
            .next();
        documents.insert(document.clone(), (text.into(), version));
        Ok(version)
    }
}

impl MembershipDocuments for MemoryDocuments {
    fn read(&self, document: &ResourceId) -> Result<MembershipSnapshot, StoreError> {
        let documents = lock(&self.documents, "membership documents")?;
        Ok(match documents.get(document) {
            Some((text, version)) => MembershipSnapshot {
                holders: parse_holders(text),
                version: *version,
            },
            None => MembershipSnapshot::default(),
        })
    }

    fn write_if_version_matches(
        &self,
        document: &ResourceId,
        holders: &[HolderId],
        expected: DocumentVersion,
    ) -> Result<DocumentVersion, WriteError> {
        let mut documents = lock(&self.documents, "membership documents")?;
        let actual = documents
            .get(document)
            .map(|(_, version)| *version)
            .unwrap_or(DocumentVersion::ABSENT);
        if actual != expected {
            return Err(WriteError::Conflict { expected, actual });
        }
        let next = actual.next();
        documents.insert(document.clone(), (render_holders(holders), next));
        Ok(next)
    }
}

/// The three in-memory stores bundled for convenience.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    pub policies: Arc<MemoryPolicyStore>,
    pub expiry: Arc<MemoryExpiryIndex>,
    pub documents: Arc<MemoryDocuments>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}
