use crate::config::Config;
use chrono::{DateTime, Utc};
use leasehold_kernel::{
    CheckoutError, CheckoutStatus, HolderId, ResourceId, RetryPolicy, days_until,
};
use leasehold_store::{FileCheckoutService, FileStores};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub config: Option<String>,
    pub root: Option<String>,
    pub now: Option<String>,
}

/// Everything a command needs: config, stores, and the evaluation instant.
pub struct Context {
    pub config: Config,
    pub stores: FileStores,
    pub now: DateTime<Utc>,
}

impl Context {
    pub fn service(&self) -> FileCheckoutService {
        self.stores
            .service(RetryPolicy::new(self.config.checkout.max_attempts))
    }

    pub fn root(&self) -> &Path {
        self.stores.root()
    }
}

pub fn load_config_or_exit(globals: &GlobalArgs) -> Config {
    Config::load(globals.config.as_deref().map(Path::new)).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    })
}

pub fn context_or_exit(globals: &GlobalArgs) -> Context {
    let config = load_config_or_exit(globals);
    let root = globals
        .root
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| config.store.root.clone());
    let now = parse_now_or_exit(globals.now.as_deref());
    Context {
        stores: FileStores::open(root),
        config,
        now,
    }
}

pub fn parse_now_or_exit(raw: Option<&str>) -> DateTime<Utc> {
    match raw {
        Some(raw) => parse_instant(raw).unwrap_or_else(|e| {
            eprintln!("error: {e}");
            std::process::exit(1);
        }),
        None => Utc::now(),
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| format!("invalid --now `{raw}` (expected RFC 3339): {e}"))
}

pub fn resource_or_exit(raw: &str) -> ResourceId {
    ResourceId::parse(raw).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    })
}

pub fn holder_or_exit(raw: &str) -> HolderId {
    HolderId::parse(raw).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    })
}

pub fn print_json(payload: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(payload).expect("json serialization")
    );
}

/// Report a failed checkout operation and exit 1.
pub fn exit_checkout_error(action: &str, err: &CheckoutError, json_output: bool) -> ! {
    if json_output {
        print_json(&json!({
            "action": action,
            "result": "rejected",
            "class": err.class(),
            "transient": err.is_transient(),
            "message": err.to_string(),
        }));
    }
    eprintln!("error: {err}");
    std::process::exit(1);
}

pub fn timestamp(at: Option<DateTime<Utc>>) -> Value {
    match at {
        Some(at) => Value::String(at.to_rfc3339()),
        None => Value::Null,
    }
}

fn plural(count: i64, one: &str, many: &str) -> String {
    if count == 1 {
        format!("{count} {one}")
    } else {
        format!("{count} {many}")
    }
}

/// Human wording for a status, as shown next to a protected resource.
pub fn status_wording(status: &CheckoutStatus, now: DateTime<Utc>) -> String {
    match status {
        CheckoutStatus::Active {
            expires_at: Some(at),
        } => format!(
            "Checked out: {} remaining",
            plural(days_until(now, *at), "day", "days")
        ),
        CheckoutStatus::Active { expires_at: None } => {
            "Checked out: expiry unknown".to_string()
        }
        CheckoutStatus::AvailableSlots { count } => {
            plural(i64::from(*count), "copy available", "copies available")
        }
        CheckoutStatus::UnavailableUntil {
            available_at: Some(at),
        } => format!(
            "Checkout available in {}",
            plural(days_until(now, *at), "day", "days")
        ),
        CheckoutStatus::UnavailableUntil { available_at: None } => {
            "Checkout unavailable: all copies are checked out".to_string()
        }
        CheckoutStatus::NotConfigured => "Checkout is not configured".to_string(),
    }
}

pub fn status_json(status: &CheckoutStatus, now: DateTime<Utc>) -> Value {
    match status {
        CheckoutStatus::Active { expires_at } => json!({
            "kind": status.kind(),
            "expiresAt": timestamp(*expires_at),
            "daysRemaining": expires_at.map(|at| days_until(now, at)),
        }),
        CheckoutStatus::AvailableSlots { count } => json!({
            "kind": status.kind(),
            "availableSlots": count,
        }),
        CheckoutStatus::UnavailableUntil { available_at } => json!({
            "kind": status.kind(),
            "availableAt": timestamp(*available_at),
            "daysUntilAvailable": available_at.map(|at| days_until(now, at)),
        }),
        CheckoutStatus::NotConfigured => json!({ "kind": status.kind() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("timestamp should be valid")
    }

    #[test]
    fn wording_rounds_days_up() {
        let active = CheckoutStatus::Active {
            expires_at: Some(noon() + Duration::hours(30)),
        };
        assert_eq!(status_wording(&active, noon()), "Checked out: 2 days remaining");

        let waiting = CheckoutStatus::UnavailableUntil {
            available_at: Some(noon() + Duration::hours(3)),
        };
        assert_eq!(status_wording(&waiting, noon()), "Checkout available in 1 day");
    }

    #[test]
    fn wording_counts_copies() {
        assert_eq!(
            status_wording(&CheckoutStatus::AvailableSlots { count: 1 }, noon()),
            "1 copy available"
        );
        assert_eq!(
            status_wording(&CheckoutStatus::AvailableSlots { count: 3 }, noon()),
            "3 copies available"
        );
    }

    #[test]
    fn status_json_uses_camel_case_keys() {
        let payload = status_json(
            &CheckoutStatus::UnavailableUntil {
                available_at: Some(noon() + Duration::days(2)),
            },
            noon(),
        );
        assert_eq!(payload["kind"], "unavailable");
        assert_eq!(payload["daysUntilAvailable"], 2);
        assert_eq!(payload["availableAt"], "2026-03-03T12:00:00+00:00");
    }

    #[test]
    fn now_must_be_rfc3339() {
        assert_eq!(
            parse_instant("2026-03-01T13:00:00+01:00").expect("offset instant should parse"),
            noon()
        );
        assert!(parse_instant("yesterday").is_err());
    }
}
