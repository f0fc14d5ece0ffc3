use serde_json::Value;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

const T0: &str = "2026-03-01T12:00:00Z";
const DECLARATION: &str =
    "Intro.\n{{#checkout: max_concurrent_users=1|checkout_days=14|access_page=Readers}}\n";

struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    fn new(prefix: &str) -> Self {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "leasehold-cli-{prefix}-{}-{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&path).expect("temp dir should be created");
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn root(&self) -> String {
        self.path.join("store").display().to_string()
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn run_leasehold<I, S>(tmp: &TempDirGuard, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let bin = env!("CARGO_BIN_EXE_leasehold");
    Command::new(bin)
        .current_dir(tmp.path())
        .env("RUST_LOG", "warn")
        .arg("--root")
        .arg(tmp.root())
        .args(args)
        .output()
        .expect("leasehold command should execute")
}

fn assert_success(output: &Output) {
    if !output.status.success() {
        panic!(
            "command failed with status {:?}\nstdout:\n{}\nstderr:\n{}",
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
    }
}

fn assert_failure(output: &Output) {
    if output.status.success() {
        panic!(
            "command unexpectedly succeeded\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
    }
}

fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn parse_json_stdout(output: &Output) -> Value {
    serde_json::from_slice::<Value>(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "expected valid JSON stdout, got error: {e}\nstdout:\n{}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn declare_book(tmp: &TempDirGuard) {
    let output = run_leasehold(tmp, ["declare", "Book", "--source", DECLARATION, "--json"]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["action"], "checkout.declare");
    assert_eq!(payload["outcome"], "created");
    assert_eq!(payload["policy"]["maxConcurrent"], 1);
    assert_eq!(payload["policy"]["leaseSeconds"], 14 * 86_400);
    assert_eq!(payload["policy"]["membershipDocument"], "Readers");
}

#[test]
fn checkout_status_and_holders_round_trip() {
    let tmp = TempDirGuard::new("round-trip");
    declare_book(&tmp);

    let output = run_leasehold(
        &tmp,
        ["--now", T0, "checkout", "Book", "--holder", "alice", "--json"],
    );
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["action"], "checkout.grant");
    assert_eq!(payload["outcome"], "created");
    assert_eq!(payload["expiresAt"], "2026-03-15T12:00:00+00:00");

    let output = run_leasehold(&tmp, ["--now", T0, "status", "Book", "--holder", "alice"]);
    assert_success(&output);
    assert!(stdout_text(&output).contains("Checked out: 14 days remaining"));

    let output = run_leasehold(&tmp, ["--now", T0, "holders", "Book", "--json"]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["action"], "checkout.holders");
    assert_eq!(payload["document"], "Readers");
    assert_eq!(payload["version"], 1);
    assert_eq!(payload["holders"][0]["holder"], "alice");
    assert_eq!(payload["holders"][0]["expired"], false);
    assert!(
        payload["digest"]
            .as_str()
            .expect("digest should be a string")
            .starts_with("md1_")
    );

    let document = fs::read_to_string(tmp.path().join("store/documents/Readers.txt"))
        .expect("membership document should exist");
    assert_eq!(document, "* alice\n");
}

#[test]
fn full_resource_rejects_checkout_with_capacity_class() {
    let tmp = TempDirGuard::new("capacity");
    declare_book(&tmp);

    assert_success(&run_leasehold(
        &tmp,
        ["--now", T0, "checkout", "Book", "--holder", "alice"],
    ));
    let output = run_leasehold(
        &tmp,
        ["--now", T0, "checkout", "Book", "--holder", "bob", "--json"],
    );
    assert_failure(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["result"], "rejected");
    assert_eq!(payload["class"], "capacity_exceeded");
    assert_eq!(payload["transient"], false);

    let output = run_leasehold(&tmp, ["--now", T0, "status", "Book", "--json"]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["status"]["kind"], "unavailable");
    assert_eq!(payload["status"]["daysUntilAvailable"], 14);
}

#[test]
fn sweep_revokes_expired_checkouts() {
    let tmp = TempDirGuard::new("sweep");
    declare_book(&tmp);
    assert_success(&run_leasehold(
        &tmp,
        ["--now", T0, "checkout", "Book", "--holder", "alice"],
    ));

    let later = "2026-03-20T12:00:00Z";
    let output = run_leasehold(&tmp, ["--now", later, "sweep", "--json"]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["action"], "checkout.sweep");
    assert_eq!(payload["revoked"], 1);
    assert_eq!(payload["failures"].as_array().map(Vec::len), Some(0));

    let output = run_leasehold(&tmp, ["--now", later, "status", "Book"]);
    assert_success(&output);
    assert!(stdout_text(&output).contains("1 copy available"));
}

#[test]
fn return_with_sweep_frees_the_slot() {
    let tmp = TempDirGuard::new("return");
    declare_book(&tmp);
    assert_success(&run_leasehold(
        &tmp,
        ["--now", T0, "checkout", "Book", "--holder", "alice"],
    ));

    let output = run_leasehold(
        &tmp,
        ["--now", T0, "return", "Book", "--holder", "alice", "--sweep", "--json"],
    );
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["action"], "checkout.return");
    assert_eq!(payload["sweep"]["failed"], 0);

    assert_success(&run_leasehold(
        &tmp,
        ["--now", T0, "checkout", "Book", "--holder", "bob"],
    ));
}

#[test]
fn undeclared_resource_reports_not_configured() {
    let tmp = TempDirGuard::new("unconfigured");

    let output = run_leasehold(&tmp, ["status", "Book"]);
    assert_success(&output);
    assert!(stdout_text(&output).contains("Checkout is not configured"));

    let output = run_leasehold(&tmp, ["checkout", "Book", "--holder", "alice", "--json"]);
    assert_failure(&output);
    assert_eq!(parse_json_stdout(&output)["class"], "policy_not_configured");
}

#[test]
fn invalid_declaration_is_rejected() {
    let tmp = TempDirGuard::new("bad-declaration");
    let output = run_leasehold(
        &tmp,
        [
            "declare",
            "Book",
            "--source",
            "{{#checkout: max_concurrent_users=2|checkout_days=7}}",
            "--json",
        ],
    );
    assert_failure(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["class"], "declaration_missing_parameter");
}

#[test]
fn declare_reads_source_files_and_undeclare_removes() {
    let tmp = TempDirGuard::new("source-file");
    let source = tmp.path().join("page.txt");
    fs::write(&source, DECLARATION).expect("source should write");

    let output = run_leasehold(
        &tmp,
        [
            OsStr::new("declare"),
            OsStr::new("Book"),
            OsStr::new("--source-file"),
            source.as_os_str(),
        ],
    );
    assert_success(&output);
    assert!(stdout_text(&output).contains("Outcome: created"));

    let output = run_leasehold(&tmp, ["undeclare", "Book", "--json"]);
    assert_success(&output);
    assert_eq!(parse_json_stdout(&output)["removed"], true);
}

#[test]
fn unknown_config_keys_fail_fast() {
    let tmp = TempDirGuard::new("config");
    let config = tmp.path().join("leasehold.toml");
    fs::write(&config, "[checkout]\nmax_attempt = 2\n").expect("config should write");

    let output = run_leasehold(&tmp, ["status", "Book"]);
    assert_failure(&output);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid config"), "stderr: {stderr}");
}

#[test]
fn zero_watch_interval_is_rejected_up_front() {
    let tmp = TempDirGuard::new("zero-interval");
    let output = run_leasehold(&tmp, ["sweep", "--watch", "--interval-seconds", "0"]);
    assert_failure(&output);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--interval-seconds"), "stderr: {stderr}");
}
