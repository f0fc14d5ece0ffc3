//! Integration tests: run the declaration parser over fixture vectors.
//!
//! Each fixture in tests/fixtures/ has:
//! - case.json: the declaration source text
//! - expect.json: the accepted policy or the rejection class

use leasehold_kernel::parse_declaration;
use serde_json::{Value, json};
use std::path::PathBuf;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn run_fixture(name: &str) {
    let dir = fixtures_dir().join(name);

    let case_path = dir.join("case.json");
    let expect_path = dir.join("expect.json");

    let case_str = std::fs::read_to_string(&case_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", case_path.display()));
    let expect_str = std::fs::read_to_string(&expect_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", expect_path.display()));

    let case: Value = serde_json::from_str(&case_str)
        .unwrap_or_else(|e| panic!("failed to parse {}: {e}", case_path.display()));
    let expected: Value = serde_json::from_str(&expect_str)
        .unwrap_or_else(|e| panic!("failed to parse {}: {e}", expect_path.display()));

    let source = case["source"].as_str().expect("missing source field");
    let actual = match parse_declaration(source) {
        Ok(policy) => json!({
            "result": "accepted",
            "policy": {
                "maxConcurrent": policy.max_concurrent(),
                "leaseSeconds": policy.lease_duration().num_seconds(),
                "membershipDocument": policy.membership_document().as_str(),
            }
        }),
        Err(err) => json!({
            "result": "rejected",
            "class": err.class(),
        }),
    };

    assert_eq!(
        actual,
        expected,
        "\n\nFixture: {name}\n\nGot:\n{}\n\nExpected:\n{}\n",
        serde_json::to_string_pretty(&actual).expect("render actual"),
        serde_json::to_string_pretty(&expected).expect("render expected"),
    );
}

#[test]
fn golden_embedded_block() {
    run_fixture("golden_embedded_block");
}

#[test]
fn golden_bare_params() {
    run_fixture("golden_bare_params");
}

#[test]
fn adversarial_missing_access_page() {
    run_fixture("adversarial_missing_access_page");
}

#[test]
fn adversarial_non_numeric_days() {
    run_fixture("adversarial_non_numeric_days");
}

#[test]
fn adversarial_conflicting_blocks() {
    run_fixture("adversarial_conflicting_blocks");
}

#[test]
fn adversarial_no_declaration() {
    run_fixture("adversarial_no_declaration");
}
