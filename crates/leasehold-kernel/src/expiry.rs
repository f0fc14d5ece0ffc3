//! Per-holder expiry index.
//!
//! Rows are keyed by `(resource, holder)` and ordered by that key. Stores
//! implement one paged scan primitive; `find_expired` turns it into a lazy
//! iterator that resumes strictly after the last yielded key, so rows deleted
//! behind the cursor (as sweep does) never disturb the scan.

use crate::error::StoreError;
use crate::model::{ExpiryEntry, ExpiryKey, HolderId, ResourceId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::vec::IntoIter;

/// Rows fetched per `scan_page` call by the lazy scan.
pub const SCAN_PAGE_SIZE: usize = 64;

/// Selection applied by `ExpiryIndex::scan_page`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Keep only rows with `expires_at` strictly before this instant.
    pub expired_before: Option<DateTime<Utc>>,
    /// Keep only rows of this resource.
    pub resource: Option<ResourceId>,
}

impl ScanFilter {
    pub fn matches(&self, entry: &ExpiryEntry) -> bool {
        if let Some(resource) = &self.resource
            && &entry.resource != resource
        {
            return false;
        }
        match self.expired_before {
            Some(now) => entry.is_expired_at(now),
            None => true,
        }
    }
}

/// Timestamp written by `set_expired`: always in the past.
pub fn expired_sentinel() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

pub trait ExpiryIndex: Send + Sync {
    /// Point lookup.
    fn get(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Insert unless a row for `(resource, holder)` exists. Returns whether a
    /// row was inserted.
    fn insert_if_absent(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Remove the row. Absent rows are not an error; returns whether one
    /// existed.
    fn delete(&self, resource: &ResourceId, holder: &HolderId) -> Result<bool, StoreError>;

    /// Remove the row only while its expiry still equals `expires_at`.
    /// Returns whether a row was removed.
    fn delete_if(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Move an existing row's expiry to `expired_sentinel()`. Returns whether
    /// a row existed.
    fn set_expired(&self, resource: &ResourceId, holder: &HolderId) -> Result<bool, StoreError>;

    /// Up to `limit` rows matching `filter` with keys strictly greater than
    /// `after`, in key order.
    fn scan_page(
        &self,
        filter: &ScanFilter,
        after: Option<&ExpiryKey>,
        limit: usize,
    ) -> Result<Vec<ExpiryEntry>, StoreError>;

    /// Lazy scan of rows with `expires_at < now`, optionally for one resource.
    fn find_expired(
        &self,
        now: DateTime<Utc>,
        resource: Option<&ResourceId>,
    ) -> ExpiredEntries<'_, Self>
    where
        Self: Sized,
    {
        ExpiredEntries::new(
            self,
            ScanFilter {
                expired_before: Some(now),
                resource: resource.cloned(),
            },
        )
    }

    /// Every row of one resource, expired or not.
    fn entries_for(&self, resource: &ResourceId) -> Result<Vec<ExpiryEntry>, StoreError>
    where
        Self: Sized,
    {
        ExpiredEntries::new(
            self,
            ScanFilter {
                expired_before: None,
                resource: Some(resource.clone()),
            },
        )
        .collect()
    }
}

impl<T: ExpiryIndex + ?Sized> ExpiryIndex for Arc<T> {
    fn get(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        (**self).get(resource, holder)
    }

    fn insert_if_absent(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).insert_if_absent(resource, holder, expires_at)
    }

    fn delete(&self, resource: &ResourceId, holder: &HolderId) -> Result<bool, StoreError> {
        (**self).delete(resource, holder)
    }

    fn delete_if(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).delete_if(resource, holder, expires_at)
    }

    fn set_expired(&self, resource: &ResourceId, holder: &HolderId) -> Result<bool, StoreError> {
        (**self).set_expired(resource, holder)
    }

    fn scan_page(
        &self,
        filter: &ScanFilter,
        after: Option<&ExpiryKey>,
        limit: usize,
    ) -> Result<Vec<ExpiryEntry>, StoreError> {
        (**self).scan_page(filter, after, limit)
    }
}

/// Lazy, finite scan over an `ExpiryIndex`.
///
/// Fetches one page at a time. A store error is yielded once and ends the
/// scan.
pub struct ExpiredEntries<'a, I: ExpiryIndex + ?Sized> {
    index: &'a I,
    filter: ScanFilter,
    cursor: Option<ExpiryKey>,
    page: IntoIter<ExpiryEntry>,
    exhausted: bool,
}

impl<'a, I: ExpiryIndex + ?Sized> ExpiredEntries<'a, I> {
    pub fn new(index: &'a I, filter: ScanFilter) -> Self {
        Self {
            index,
            filter,
            cursor: None,
            page: Vec::new().into_iter(),
            exhausted: false,
        }
    }

    fn fetch(&mut self) -> Result<(), StoreError> {
        let page = self
            .index
            .scan_page(&self.filter, self.cursor.as_ref(), SCAN_PAGE_SIZE)?;
        if page.len() < SCAN_PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some(last.key());
        }
        self.page = page.into_iter();
        Ok(())
    }
}

impl<I: ExpiryIndex + ?Sized> Iterator for ExpiredEntries<'_, I> {
    type Item = Result<ExpiryEntry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.page.next() {
                return Some(Ok(entry));
            }
            if self.exhausted {
                return None;
            }
            if let Err(err) = self.fetch() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
    }
}
