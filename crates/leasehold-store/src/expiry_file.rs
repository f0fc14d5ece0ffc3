//! `expiry.jsonl`: the expiry index, kept sorted by `(resource, holder)`.

use crate::atomic_store::mutate_records;
use crate::jsonl::read_records_from_path;
use chrono::{DateTime, Utc};
use leasehold_kernel::{
    ExpiryEntry, ExpiryIndex, ExpiryKey, HolderId, ResourceId, ScanFilter, StoreError,
    expired_sentinel,
};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ExpiryFile {
    path: PathBuf,
}

impl ExpiryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rows(&self) -> Result<Vec<ExpiryEntry>, StoreError> {
        let mut rows: Vec<ExpiryEntry> = read_records_from_path(&self.path)?;
        rows.sort_by_key(ExpiryEntry::key);
        Ok(rows)
    }
}

fn position(rows: &[ExpiryEntry], resource: &ResourceId, holder: &HolderId) -> Option<usize> {
    rows.iter()
        .position(|row| &row.resource == resource && &row.holder == holder)
}

impl ExpiryIndex for ExpiryFile {
    fn get(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let rows = self.rows()?;
        Ok(position(&rows, resource, holder).map(|at| rows[at].expires_at))
    }

    fn insert_if_absent(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(mutate_records(&self.path, |rows: &mut Vec<ExpiryEntry>| {
            if position(rows, resource, holder).is_some() {
                return (false, false);
            }
            rows.push(ExpiryEntry {
                resource: resource.clone(),
                holder: holder.clone(),
                expires_at,
            });
            rows.sort_by_key(ExpiryEntry::key);
            (true, true)
        })?)
    }

    fn delete(&self, resource: &ResourceId, holder: &HolderId) -> Result<bool, StoreError> {
        Ok(mutate_records(&self.path, |rows: &mut Vec<ExpiryEntry>| {
            match position(rows, resource, holder) {
                Some(at) => {
                    rows.remove(at);
                    (true, true)
                }
                None => (false, false),
            }
        })?)
    }

    fn delete_if(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(mutate_records(&self.path, |rows: &mut Vec<ExpiryEntry>| {
            match position(rows, resource, holder) {
                Some(at) if rows[at].expires_at == expires_at => {
                    rows.remove(at);
                    (true, true)
                }
                _ => (false, false),
            }
        })?)
    }

    fn set_expired(&self, resource: &ResourceId, holder: &HolderId) -> Result<bool, StoreError> {
        Ok(mutate_records(&self.path, |rows: &mut Vec<ExpiryEntry>| {
            match position(rows, resource, holder) {
                Some(at) => {
                    rows[at].expires_at = expired_sentinel();
                    (true, true)
                }
                None => (false, false),
            }
        })?)
    }

    fn scan_page(
        &self,
        filter: &ScanFilter,
        after: Option<&ExpiryKey>,
        limit: usize,
    ) -> Result<Vec<ExpiryEntry>, StoreError> {
        Ok(self
            .rows()?
            .into_iter()
            .filter(|row| after.is_none_or(|after| &row.key() > after))
            .filter(|row| filter.matches(row))
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempRoot;
    use chrono::{Duration, TimeZone};

    fn resource(name: &str) -> ResourceId {
        ResourceId::parse(name).expect("resource should parse")
    }

    fn holder(name: &str) -> HolderId {
        HolderId::parse(name).expect("holder should parse")
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("timestamp should be valid")
    }

    #[test]
    fn insert_if_absent_keeps_the_first_expiry() {
        let root = TempRoot::new("expiry-insert");
        let index = ExpiryFile::new(root.path().join("expiry.jsonl"));
        let (book, alice) = (resource("Book"), holder("alice"));

        assert!(index.insert_if_absent(&book, &alice, noon()).expect("insert"));
        assert!(
            !index
                .insert_if_absent(&book, &alice, noon() + Duration::days(3))
                .expect("insert")
        );
        assert_eq!(index.get(&book, &alice).expect("get"), Some(noon()));
    }

    #[test]
    fn set_expired_and_delete_report_row_presence() {
        let root = TempRoot::new("expiry-mark");
        let index = ExpiryFile::new(root.path().join("expiry.jsonl"));
        let (book, alice) = (resource("Book"), holder("alice"));

        assert!(!index.set_expired(&book, &alice).expect("mark"));
        index.insert_if_absent(&book, &alice, noon()).expect("insert");
        assert!(index.set_expired(&book, &alice).expect("mark"));
        assert_eq!(
            index.get(&book, &alice).expect("get"),
            Some(expired_sentinel())
        );
        assert!(index.delete(&book, &alice).expect("delete"));
        assert!(!index.delete(&book, &alice).expect("delete"));
    }

    #[test]
    fn delete_if_only_removes_the_expected_expiry() {
        let root = TempRoot::new("expiry-delete-if");
        let index = ExpiryFile::new(root.path().join("expiry.jsonl"));
        let (book, alice) = (resource("Book"), holder("alice"));
        index.insert_if_absent(&book, &alice, noon()).expect("insert");

        assert!(
            !index
                .delete_if(&book, &alice, noon() - Duration::days(1))
                .expect("delete_if")
        );
        assert_eq!(index.get(&book, &alice).expect("get"), Some(noon()));
        assert!(index.delete_if(&book, &alice, noon()).expect("delete_if"));
        assert_eq!(index.get(&book, &alice).expect("get"), None);
        assert!(!index.delete_if(&book, &alice, noon()).expect("delete_if"));
    }

    #[test]
    fn find_expired_walks_pages_in_key_order() {
        let root = TempRoot::new("expiry-scan");
        let index = ExpiryFile::new(root.path().join("expiry.jsonl"));
        let book = resource("Book");
        for n in (0..70).rev() {
            let at = if n % 2 == 0 {
                noon() - Duration::hours(1)
            } else {
                noon() + Duration::hours(1)
            };
            index
                .insert_if_absent(&book, &holder(&format!("h{n:03}")), at)
                .expect("insert");
        }
        index
            .insert_if_absent(&resource("Atlas"), &holder("zed"), noon() - Duration::days(1))
            .expect("insert");

        let expired: Vec<_> = index
            .find_expired(noon(), Some(&book))
            .collect::<Result<_, _>>()
            .expect("scan should succeed");
        assert_eq!(expired.len(), 35);
        assert_eq!(expired[0].holder.as_str(), "h000");
        assert_eq!(expired[34].holder.as_str(), "h068");

        let everything: Vec<_> = index
            .find_expired(noon(), None)
            .collect::<Result<_, _>>()
            .expect("scan should succeed");
        assert_eq!(everything.len(), 36);
        assert_eq!(everything[0].resource.as_str(), "Atlas");
    }
}
