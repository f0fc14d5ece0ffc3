//! `policies.jsonl`: one line per configured resource.

use crate::atomic_store::mutate_records;
use crate::jsonl::read_records_from_path;
use leasehold_kernel::{PolicyRecord, PolicyStore, ResourceId, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PolicyLine {
    resource: ResourceId,
    #[serde(flatten)]
    record: PolicyRecord,
}

#[derive(Debug, Clone)]
pub struct PolicyFile {
    path: PathBuf,
}

impl PolicyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lines(&self) -> Result<Vec<PolicyLine>, StoreError> {
        Ok(read_records_from_path(&self.path)?)
    }
}

impl PolicyStore for PolicyFile {
    fn record(&self, resource: &ResourceId) -> Result<Option<PolicyRecord>, StoreError> {
        Ok(self
            .lines()?
            .into_iter()
            .find(|line| &line.resource == resource)
            .map(|line| line.record))
    }

    fn records(&self) -> Result<Vec<(ResourceId, PolicyRecord)>, StoreError> {
        let mut records: Vec<_> = self
            .lines()?
            .into_iter()
            .map(|line| (line.resource, line.record))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    fn put_with(
        &self,
        resource: &ResourceId,
        decide: &mut dyn FnMut(&[(ResourceId, PolicyRecord)]) -> Option<PolicyRecord>,
    ) -> Result<(), StoreError> {
        mutate_records(&self.path, |lines: &mut Vec<PolicyLine>| {
            let mut view: Vec<_> = lines
                .iter()
                .map(|line| (line.resource.clone(), line.record.clone()))
                .collect();
            view.sort_by(|a, b| a.0.cmp(&b.0));
            let Some(record) = decide(&view) else {
                return ((), false);
            };
            match lines.iter().position(|line| &line.resource == resource) {
                Some(at) if lines[at].record == record => return ((), false),
                Some(at) => lines[at].record = record,
                None => {
                    lines.push(PolicyLine {
                        resource: resource.clone(),
                        record,
                    });
                    lines.sort_by(|a, b| a.resource.cmp(&b.resource));
                }
            }
            ((), true)
        })?;
        Ok(())
    }

    fn remove(&self, resource: &ResourceId) -> Result<bool, StoreError> {
        Ok(mutate_records(&self.path, |lines: &mut Vec<PolicyLine>| {
            let before = lines.len();
            lines.retain(|line| &line.resource != resource);
            let removed = lines.len() != before;
            (removed, removed)
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempRoot;

    fn resource(name: &str) -> ResourceId {
        ResourceId::parse(name).expect("resource should parse")
    }

    fn record(max: u32, days: i64, document: &str) -> PolicyRecord {
        PolicyRecord {
            max_concurrent: Some(max),
            lease_seconds: Some(days * 86_400),
            membership_document: Some(document.to_string()),
        }
    }

    #[test]
    fn put_then_get_round_trips_through_the_file() {
        let root = TempRoot::new("policy-put");
        let store = PolicyFile::new(root.path().join("policies.jsonl"));

        store
            .put(&resource("Book"), record(2, 14, "Readers"))
            .expect("put should succeed");
        let policy = store
            .get(&resource("Book"))
            .expect("get should succeed")
            .expect("policy should exist");
        assert_eq!(policy.max_concurrent(), 2);
        assert_eq!(policy.membership_document().as_str(), "Readers");

        let text = std::fs::read_to_string(store.path()).expect("file should exist");
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"resource\":\"Book\""));
    }

    #[test]
    fn put_replaces_and_records_stay_sorted() {
        let root = TempRoot::new("policy-sorted");
        let store = PolicyFile::new(root.path().join("policies.jsonl"));

        store.put(&resource("Zine"), record(1, 1, "Z")).expect("put");
        store.put(&resource("Atlas"), record(1, 1, "A")).expect("put");
        store.put(&resource("Zine"), record(4, 7, "Z")).expect("put");

        let records = store.records().expect("records should read");
        let names: Vec<_> = records.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(names, vec!["Atlas", "Zine"]);
        assert_eq!(records[1].1.max_concurrent, Some(4));
    }

    #[test]
    fn incomplete_record_reads_as_unconfigured() {
        let root = TempRoot::new("policy-incomplete");
        let store = PolicyFile::new(root.path().join("policies.jsonl"));
        std::fs::write(
            store.path(),
            "{\"resource\":\"Book\",\"max_concurrent\":2}\n",
        )
        .expect("fixture should write");

        assert!(store.record(&resource("Book")).expect("read").is_some());
        assert!(store.get(&resource("Book")).expect("read").is_none());
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn remove_reports_whether_a_line_existed() {
        let root = TempRoot::new("policy-remove");
        let store = PolicyFile::new(root.path().join("policies.jsonl"));
        store.put(&resource("Book"), record(1, 1, "R")).expect("put");

        assert!(store.remove(&resource("Book")).expect("remove"));
        assert!(!store.remove(&resource("Book")).expect("remove"));
        assert!(store.records().expect("records").is_empty());
    }
}
