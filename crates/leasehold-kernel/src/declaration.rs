//! Checkout declarations embedded in resource text.
//!
//! A resource opts into checkout with
//! `{{#checkout: max_concurrent_users=2 | checkout_days=14 | access_page=Readers/Book}}`.
//! Parsing produces a complete `CheckoutPolicy` or a typed rejection;
//! `declare` persists it after checking that every resource sharing the
//! membership document agrees on capacity and lease duration.

use crate::error::StoreError;
use crate::model::{CheckoutPolicy, PolicyRecord, ResourceId};
use crate::policy::PolicyStore;
use chrono::Duration;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const PARAM_MAX_CONCURRENT: &str = "max_concurrent_users";
pub const PARAM_CHECKOUT_DAYS: &str = "checkout_days";
pub const PARAM_ACCESS_PAGE: &str = "access_page";

fn checkout_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*#checkout\s*:(?P<params>[^}]*)\}\}")
            .expect("checkout block regex must compile")
    })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeclarationError {
    #[error("no checkout declaration found")]
    NotFound,

    #[error("missing checkout parameter `{0}`")]
    MissingParameter(&'static str),

    #[error("invalid value for `{name}`: {value:?}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("conflicting checkout declarations in one source")]
    ConflictingDeclarations,

    #[error(
        "{resource} declares membership document {document} with a policy that differs from {other}"
    )]
    InconsistentDeclaration {
        resource: ResourceId,
        document: ResourceId,
        other: ResourceId,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DeclarationError {
    /// Stable machine-readable class for payloads.
    pub fn class(&self) -> &'static str {
        match self {
            Self::NotFound => "declaration_not_found",
            Self::MissingParameter(_) => "declaration_missing_parameter",
            Self::InvalidParameter { .. } => "declaration_invalid_parameter",
            Self::ConflictingDeclarations => "declaration_conflicting",
            Self::InconsistentDeclaration { .. } => "declaration_inconsistent",
            Self::Store(_) => "store_unavailable",
        }
    }
}

/// Parse the single policy declared by `source`.
///
/// Accepts text containing one or more `{{#checkout:...}}` blocks (all of
/// which must agree) or a bare `key=value|key=value` parameter list.
pub fn parse_declaration(source: &str) -> Result<CheckoutPolicy, DeclarationError> {
    let mut declared: Option<CheckoutPolicy> = None;
    for captures in checkout_block_re().captures_iter(source) {
        let policy = parse_params(&captures["params"])?;
        match &declared {
            Some(existing) if *existing != policy => {
                return Err(DeclarationError::ConflictingDeclarations);
            }
            Some(_) => {}
            None => declared = Some(policy),
        }
    }
    if let Some(policy) = declared {
        return Ok(policy);
    }

    if source.contains('=') && !source.contains("{{") {
        return parse_params(source);
    }
    Err(DeclarationError::NotFound)
}

fn parse_params(params: &str) -> Result<CheckoutPolicy, DeclarationError> {
    let mut options: BTreeMap<&str, &str> = BTreeMap::new();
    for keyval in params.split('|') {
        let (key, value) = keyval.split_once('=').unwrap_or((keyval, ""));
        let (key, value) = (key.trim(), value.trim());
        if !value.is_empty() {
            options.insert(key, value);
        }
    }

    let max_concurrent = positive_int(&options, PARAM_MAX_CONCURRENT)?;
    let checkout_days = positive_int(&options, PARAM_CHECKOUT_DAYS)?;
    let access_page = options
        .get(PARAM_ACCESS_PAGE)
        .ok_or(DeclarationError::MissingParameter(PARAM_ACCESS_PAGE))?;
    let document =
        ResourceId::parse(access_page).map_err(|_| DeclarationError::InvalidParameter {
            name: PARAM_ACCESS_PAGE,
            value: access_page.to_string(),
        })?;

    let lease = Duration::try_days(i64::from(checkout_days)).ok_or(
        DeclarationError::InvalidParameter {
            name: PARAM_CHECKOUT_DAYS,
            value: checkout_days.to_string(),
        },
    )?;
    CheckoutPolicy::new(max_concurrent, lease, document).map_err(|_| {
        DeclarationError::InvalidParameter {
            name: PARAM_MAX_CONCURRENT,
            value: max_concurrent.to_string(),
        }
    })
}

fn positive_int(
    options: &BTreeMap<&str, &str>,
    name: &'static str,
) -> Result<u32, DeclarationError> {
    let raw = options
        .get(name)
        .ok_or(DeclarationError::MissingParameter(name))?;
    match raw.parse::<u32>() {
        Ok(value) if value >= 1 => Ok(value),
        _ => Err(DeclarationError::InvalidParameter {
            name,
            value: raw.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclareOutcome {
    Created,
    Updated,
    Unchanged,
}

impl DeclareOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Persist `policy` for `resource`.
///
/// Rejects the declaration when another resource already uses the same
/// membership document with a different capacity or lease duration. The
/// check and the write happen in one store update, so two racing
/// declarations cannot both commit disagreeing policies.
pub fn declare<P: PolicyStore + ?Sized>(
    store: &P,
    resource: &ResourceId,
    policy: &CheckoutPolicy,
) -> Result<DeclareOutcome, DeclarationError> {
    let record = policy.to_record();
    let mut verdict = Ok(DeclareOutcome::Unchanged);
    store.put_with(resource, &mut |records: &[(ResourceId, PolicyRecord)]| {
        verdict = check_declaration(records, resource, policy);
        match verdict {
            Ok(DeclareOutcome::Created | DeclareOutcome::Updated) => Some(record.clone()),
            _ => None,
        }
    })?;

    let outcome = verdict?;
    if outcome != DeclareOutcome::Unchanged {
        tracing::info!(
            resource = %resource,
            document = %policy.membership_document(),
            max_concurrent = policy.max_concurrent(),
            lease_seconds = policy.lease_duration().num_seconds(),
            outcome = outcome.as_str(),
            "checkout policy declared"
        );
    }
    Ok(outcome)
}

fn check_declaration(
    records: &[(ResourceId, PolicyRecord)],
    resource: &ResourceId,
    policy: &CheckoutPolicy,
) -> Result<DeclareOutcome, DeclarationError> {
    let record = policy.to_record();
    let mut outcome = DeclareOutcome::Created;
    for (other, existing) in records {
        if other == resource {
            outcome = if *existing == record {
                DeclareOutcome::Unchanged
            } else {
                DeclareOutcome::Updated
            };
            continue;
        }
        let Some(existing) = existing.to_policy() else {
            continue;
        };
        if existing.membership_document() == policy.membership_document()
            && !existing.agrees_with(policy)
        {
            return Err(DeclarationError::InconsistentDeclaration {
                resource: resource.clone(),
                document: policy.membership_document().clone(),
                other: other.clone(),
            });
        }
    }
    Ok(outcome)
}

/// Remove the policy for `resource`. Returns whether one existed.
pub fn undeclare<P: PolicyStore + ?Sized>(
    store: &P,
    resource: &ResourceId,
) -> Result<bool, DeclarationError> {
    let removed = store.remove(resource)?;
    if removed {
        tracing::info!(resource = %resource, "checkout policy removed");
    }
    Ok(removed)
}
