//! Membership documents as plain text files.
//!
//! `documents/<enc>.txt` holds the `* holder` lines and `documents/<enc>.rev`
//! the decimal version. Writers hold `<enc>.txt.lock`, compare the version,
//! then replace the text before the version. Readers take no lock: they
//! sample the version around the text read and retry on a mismatch, so a
//! returned version is never newer than the text it comes with.

use crate::atomic_store::with_lock;
use crate::jsonl::{read_text_from_path, write_bytes_to_path};
use leasehold_kernel::{
    DocumentVersion, HolderId, MembershipDocuments, MembershipSnapshot, ResourceId, StoreError,
    WriteError, parse_holders, render_holders,
};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Attempts at a consistent unlocked read before giving up.
pub const READ_ATTEMPTS: u32 = 16;

/// File-name form of a document name: `[A-Za-z0-9._-]` kept, every other
/// byte percent-encoded.
pub fn encode_document_name(document: &ResourceId) -> String {
    let mut encoded = String::new();
    for byte in document.as_str().bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

#[derive(Debug, Clone)]
pub struct DocumentDir {
    dir: PathBuf,
}

impl DocumentDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn text_path(&self, document: &ResourceId) -> PathBuf {
        self.dir.join(format!("{}.txt", encode_document_name(document)))
    }

    pub fn rev_path(&self, document: &ResourceId) -> PathBuf {
        self.dir.join(format!("{}.rev", encode_document_name(document)))
    }

    /// Raw text of a document, if the file exists.
    pub fn text(&self, document: &ResourceId) -> Result<Option<String>, StoreError> {
        Ok(read_text_from_path(self.text_path(document))?)
    }

    fn stored_revision(&self, document: &ResourceId) -> Result<Option<u64>, StoreError> {
        let path = self.rev_path(document);
        let Some(raw) = read_text_from_path(&path)? else {
            return Ok(None);
        };
        raw.trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| StoreError::Corrupt(format!("{}: bad revision {raw:?}", path.display())))
    }
}

/// Text without a revision file was written by hand and counts as version 1.
fn document_version(revision: Option<u64>, has_text: bool) -> DocumentVersion {
    match revision {
        Some(revision) => DocumentVersion(revision),
        None if has_text => DocumentVersion(1),
        None => DocumentVersion::ABSENT,
    }
}

impl MembershipDocuments for DocumentDir {
    fn read(&self, document: &ResourceId) -> Result<MembershipSnapshot, StoreError> {
        for _ in 0..READ_ATTEMPTS {
            let before = self.stored_revision(document)?;
            let text = self.text(document)?;
            let after = self.stored_revision(document)?;
            if before != after {
                continue;
            }
            return Ok(MembershipSnapshot {
                version: document_version(before, text.is_some()),
                holders: text.as_deref().map(parse_holders).unwrap_or_default(),
            });
        }
        Err(StoreError::Unavailable(format!(
            "{}: kept changing during {READ_ATTEMPTS} read attempt(s)",
            self.text_path(document).display()
        )))
    }

    fn write_if_version_matches(
        &self,
        document: &ResourceId,
        holders: &[HolderId],
        expected: DocumentVersion,
    ) -> Result<DocumentVersion, WriteError> {
        let text_path = self.text_path(document);
        let outcome = with_lock(&text_path, || {
            let actual =
                document_version(self.stored_revision(document)?, text_path.exists());
            if actual != expected {
                return Ok(Err(WriteError::Conflict { expected, actual }));
            }
            let next = actual.next();
            write_bytes_to_path(&text_path, render_holders(holders).as_bytes())?;
            write_bytes_to_path(self.rev_path(document), format!("{}\n", next.0).as_bytes())?;
            Ok(Ok(next))
        })
        .map_err(|e| WriteError::Store(e.into()))?;

        if let Ok(version) = &outcome {
            tracing::debug!(
                document = %document,
                version = %version,
                holders = holders.len(),
                "membership document written"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempRoot;

    fn name(raw: &str) -> ResourceId {
        ResourceId::parse(raw).expect("resource should parse")
    }

    fn holders(names: &[&str]) -> Vec<HolderId> {
        names
            .iter()
            .map(|n| HolderId::parse(n).expect("holder should parse"))
            .collect()
    }

    #[test]
    fn names_are_percent_encoded() {
        assert_eq!(encode_document_name(&name("Readers")), "Readers");
        assert_eq!(
            encode_document_name(&name("Readers/Chapter one")),
            "Readers%2FChapter%20one"
        );
        assert_eq!(encode_document_name(&name("a.b_c-d")), "a.b_c-d");
    }

    #[test]
    fn absent_document_reads_empty_at_absent_version() {
        let root = TempRoot::new("doc-absent");
        let docs = DocumentDir::new(root.path().join("documents"));

        let snapshot = docs.read(&name("Readers")).expect("read should succeed");
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.version, DocumentVersion::ABSENT);
    }

    #[test]
    fn conditional_write_bumps_the_version_and_rejects_stale_tokens() {
        let root = TempRoot::new("doc-occ");
        let docs = DocumentDir::new(root.path().join("documents"));
        let doc = name("Readers");

        let v1 = docs
            .write_if_version_matches(&doc, &holders(&["alice"]), DocumentVersion::ABSENT)
            .expect("first write should succeed");
        assert_eq!(v1, DocumentVersion(1));

        let stale = docs.write_if_version_matches(
            &doc,
            &holders(&["bob"]),
            DocumentVersion::ABSENT,
        );
        assert_eq!(
            stale,
            Err(WriteError::Conflict {
                expected: DocumentVersion::ABSENT,
                actual: v1,
            })
        );

        let snapshot = docs.read(&doc).expect("read should succeed");
        assert_eq!(snapshot.holders, holders(&["alice"]));
        assert_eq!(snapshot.version, v1);
        assert_eq!(
            docs.text(&doc).expect("text should read").as_deref(),
            Some("* alice\n")
        );
    }

    #[test]
    fn hand_written_document_counts_as_version_one() {
        let root = TempRoot::new("doc-hand");
        let docs = DocumentDir::new(root.path().join("documents"));
        let doc = name("Readers");
        std::fs::create_dir_all(docs.dir()).expect("dir should create");
        std::fs::write(docs.text_path(&doc), "* carol\n* dave\n* carol\n")
            .expect("fixture should write");

        let snapshot = docs.read(&doc).expect("read should succeed");
        assert_eq!(snapshot.version, DocumentVersion(1));
        assert_eq!(snapshot.holders, holders(&["carol", "dave"]));

        let remaining = snapshot.without_holder(&holders(&["dave"])[0]);
        let next = docs
            .write_if_version_matches(&doc, &remaining, snapshot.version)
            .expect("write should succeed");
        assert_eq!(next, DocumentVersion(2));
        assert_eq!(
            docs.text(&doc).expect("text should read").as_deref(),
            Some("* carol\n")
        );
    }

    #[test]
    fn bad_revision_file_is_corrupt() {
        let root = TempRoot::new("doc-corrupt");
        let docs = DocumentDir::new(root.path().join("documents"));
        let doc = name("Readers");
        std::fs::create_dir_all(docs.dir()).expect("dir should create");
        std::fs::write(docs.rev_path(&doc), "seven\n").expect("fixture should write");

        match docs.read(&doc) {
            Err(StoreError::Corrupt(message)) => assert!(message.contains("bad revision")),
            other => panic!("expected corrupt store, got {other:?}"),
        }
    }
}
