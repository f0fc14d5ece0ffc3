//! Checkout service: grant, revoke, sweep, and status over the three stores.
//!
//! The membership document is the only state shared between callers, so
//! every change to it is a read-version-then-conditional-write loop with a
//! bounded attempt budget. Expiry rows are written after the document commit
//! and removed after the document no longer lists the holder; any divergence
//! left behind by a crash between the two steps is repaired by `sweep`.

use crate::error::{CheckoutError, StoreError, WriteError};
use crate::expiry::{ExpiryIndex, expired_sentinel};
use crate::membership::{MembershipDocuments, MembershipSnapshot};
use crate::model::{CheckoutPolicy, HolderId, ResourceId};
use crate::policy::PolicyStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const SECONDS_PER_DAY: i64 = 86_400;

/// Bound on conditional-write attempts per document mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantOutcome {
    /// The holder was added to the membership document.
    Created,
    /// The holder already held the resource; nothing changed.
    AlreadyHeld,
}

/// A successful grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveGrant {
    pub resource: ResourceId,
    pub holder: HolderId,
    /// `None` only while the holder is listed without an expiry row.
    pub expires_at: Option<DateTime<Utc>>,
    pub outcome: GrantOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairOutcome {
    Removed,
    AlreadyAbsent,
    /// The row changed after it was scanned; a newer grant owns the slot.
    Renewed,
    Unconfigured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepFailure {
    pub resource: ResourceId,
    pub holder: HolderId,
    pub error: CheckoutError,
}

/// Aggregate result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired pairs whose grant is now gone from document and index.
    pub revoked: usize,
    /// Listed holders that were missing an expiry row and received one.
    pub reconciled: usize,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// What a caller may do with a resource right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutStatus {
    /// The caller holds the resource.
    Active { expires_at: Option<DateTime<Utc>> },
    /// `count` slots are free.
    AvailableSlots { count: u32 },
    /// Full; the earliest known expiry among current holders, if any.
    UnavailableUntil { available_at: Option<DateTime<Utc>> },
    /// The resource has no checkout policy.
    NotConfigured,
}

impl CheckoutStatus {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Active { .. } => "active",
            Self::AvailableSlots { .. } => "available",
            Self::UnavailableUntil { .. } => "unavailable",
            Self::NotConfigured => "not_configured",
        }
    }
}

/// Whole days from `now` until `at`, rounded up and never negative.
pub fn days_until(now: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
    let seconds = at.signed_duration_since(now).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
}

pub struct CheckoutService<P, E, M> {
    policies: P,
    expiry: E,
    documents: M,
    retry: RetryPolicy,
}

impl<P, E, M> CheckoutService<P, E, M>
where
    P: PolicyStore,
    E: ExpiryIndex,
    M: MembershipDocuments,
{
    pub fn new(policies: P, expiry: E, documents: M) -> Self {
        Self {
            policies,
            expiry,
            documents,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub fn policies(&self) -> &P {
        &self.policies
    }

    pub fn expiry(&self) -> &E {
        &self.expiry
    }

    pub fn documents(&self) -> &M {
        &self.documents
    }

    fn policy(&self, resource: &ResourceId) -> Result<CheckoutPolicy, CheckoutError> {
        self.policies
            .get(resource)?
            .ok_or_else(|| CheckoutError::PolicyNotConfigured(resource.clone()))
    }

    /// Grant `holder` access to `resource`.
    ///
    /// A holder already listed gets `AlreadyHeld` and keeps its original
    /// expiry. Expired rows of the resource are reaped first, so a full
    /// resource whose leases ran out is usable without waiting for a sweep.
    pub fn grant(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
        now: DateTime<Utc>,
    ) -> Result<ActiveGrant, CheckoutError> {
        let policy = self.policy(resource)?;
        self.reap_on_access(resource, now);

        let document = policy.membership_document();
        for attempt in 1..=self.retry.max_attempts {
            let snapshot = self.documents.read(document)?;
            if snapshot.contains(holder) {
                return Ok(ActiveGrant {
                    resource: resource.clone(),
                    holder: holder.clone(),
                    expires_at: self.expiry.get(resource, holder)?,
                    outcome: GrantOutcome::AlreadyHeld,
                });
            }
            if snapshot.len() >= policy.max_concurrent() as usize {
                return Err(CheckoutError::CapacityExceeded {
                    resource: resource.clone(),
                    max_concurrent: policy.max_concurrent(),
                });
            }

            let holders = snapshot.with_holder(holder);
            match self
                .documents
                .write_if_version_matches(document, &holders, snapshot.version)
            {
                Ok(version) => {
                    let expires_at = policy.lease_expiry(now);
                    let recorded = self.record_expiry(resource, holder, expires_at);
                    tracing::info!(
                        resource = %resource,
                        holder = %holder,
                        document = %document,
                        version = %version,
                        expires_at = %expires_at,
                        "checkout granted"
                    );
                    return Ok(ActiveGrant {
                        resource: resource.clone(),
                        holder: holder.clone(),
                        expires_at: recorded,
                        outcome: GrantOutcome::Created,
                    });
                }
                Err(WriteError::Conflict { expected, actual }) => {
                    tracing::debug!(
                        resource = %resource,
                        holder = %holder,
                        attempt,
                        expected = %expected,
                        actual = %actual,
                        "grant lost a version race; re-reading"
                    );
                }
                Err(WriteError::Store(err)) => return Err(err.into()),
            }
        }

        Err(CheckoutError::Contention {
            resource: resource.clone(),
            attempts: self.retry.max_attempts,
        })
    }

    /// Record the lease after a committed grant. The document write already
    /// made the grant effective, so failures here are logged, not returned.
    fn record_expiry(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
        expires_at: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self.expiry.insert_if_absent(resource, holder, expires_at) {
            Ok(true) => Some(expires_at),
            Ok(false) => match self.expiry.get(resource, holder) {
                Ok(existing) => existing,
                Err(err) => {
                    tracing::warn!(
                        resource = %resource,
                        holder = %holder,
                        error = %err,
                        "expiry lookup failed after grant"
                    );
                    None
                }
            },
            Err(err) => {
                tracing::warn!(
                    resource = %resource,
                    holder = %holder,
                    error = %err,
                    "granted without an expiry row; next sweep will reconcile"
                );
                None
            }
        }
    }

    fn reap_on_access(&self, resource: &ResourceId, now: DateTime<Utc>) {
        let expired: Vec<_> = self.expiry.find_expired(now, Some(resource)).collect();
        for entry in expired {
            let result = entry.map_err(CheckoutError::from).and_then(|entry| {
                self.revoke_pair(&entry.resource, &entry.holder, Some(entry.expires_at), now)
                    .map(|outcome| (entry, outcome))
            });
            match result {
                Ok((entry, outcome)) => tracing::info!(
                    resource = %entry.resource,
                    holder = %entry.holder,
                    outcome = ?outcome,
                    "expired checkout reaped on access"
                ),
                Err(err) => tracing::warn!(
                    resource = %resource,
                    error = %err,
                    "could not reap expired checkout on access"
                ),
            }
        }
    }

    /// Revoke `holder`'s access to `resource` now.
    ///
    /// Marks the expiry row as past and runs the same single-pair removal a
    /// sweep would. Succeeds when the holder had no grant.
    pub fn revoke(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
        now: DateTime<Utc>,
    ) -> Result<(), CheckoutError> {
        let marked = self.expiry.set_expired(resource, holder)?;
        let seen = marked.then(expired_sentinel);
        let outcome = self.revoke_pair(resource, holder, seen, now)?;
        tracing::info!(
            resource = %resource,
            holder = %holder,
            had_expiry_row = marked,
            outcome = ?outcome,
            at = %now,
            "checkout revoked"
        );
        Ok(())
    }

    /// Remove one holder from the resource's document, then drop its row.
    ///
    /// `seen` is the expiry the caller found in the index. The holder is only
    /// removed while the row still carries that expiry and it lies before
    /// `now`; otherwise the holder was granted again in the meantime and the
    /// pair is left alone.
    fn revoke_pair(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
        seen: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<PairOutcome, CheckoutError> {
        let Some(policy) = self.policies.get(resource)? else {
            self.drop_row(resource, holder, seen)?;
            return Ok(PairOutcome::Unconfigured);
        };
        let document = policy.membership_document();

        for attempt in 1..=self.retry.max_attempts {
            let snapshot = self.documents.read(document)?;
            if !snapshot.contains(holder) {
                self.drop_row(resource, holder, seen)?;
                return Ok(PairOutcome::AlreadyAbsent);
            }
            if let Some(seen) = seen {
                let current = self.expiry.get(resource, holder)?;
                if current != Some(seen) || seen >= now {
                    return Ok(PairOutcome::Renewed);
                }
            }

            let holders = snapshot.without_holder(holder);
            match self
                .documents
                .write_if_version_matches(document, &holders, snapshot.version)
            {
                Ok(_) => {
                    self.drop_row(resource, holder, seen)?;
                    return Ok(PairOutcome::Removed);
                }
                Err(WriteError::Conflict { expected, actual }) => {
                    tracing::debug!(
                        resource = %resource,
                        holder = %holder,
                        attempt,
                        expected = %expected,
                        actual = %actual,
                        "revocation lost a version race; re-reading"
                    );
                }
                Err(WriteError::Store(err)) => return Err(err.into()),
            }
        }

        Err(CheckoutError::Contention {
            resource: resource.clone(),
            attempts: self.retry.max_attempts,
        })
    }

    fn drop_row(
        &self,
        resource: &ResourceId,
        holder: &HolderId,
        seen: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        match seen {
            Some(expires_at) => self.expiry.delete_if(resource, holder, expires_at),
            None => self.expiry.delete(resource, holder),
        }
    }

    /// Revoke every grant whose lease ended before `now`, optionally for one
    /// resource, then give listed holders without an expiry row a fresh one.
    ///
    /// A pair that cannot be revoked is recorded in the report and skipped.
    /// Only a failure of the index scan itself aborts the sweep.
    pub fn sweep(
        &self,
        now: DateTime<Utc>,
        resource: Option<&ResourceId>,
    ) -> Result<SweepReport, CheckoutError> {
        let mut report = SweepReport::default();
        for entry in self.expiry.find_expired(now, resource) {
            let entry = entry?;
            match self.revoke_pair(&entry.resource, &entry.holder, Some(entry.expires_at), now) {
                Ok(PairOutcome::Renewed) => {
                    tracing::debug!(
                        resource = %entry.resource,
                        holder = %entry.holder,
                        "lease renewed since the scan; left in place"
                    );
                }
                Ok(outcome) => {
                    report.revoked += 1;
                    tracing::debug!(
                        resource = %entry.resource,
                        holder = %entry.holder,
                        outcome = ?outcome,
                        "expired checkout revoked"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        resource = %entry.resource,
                        holder = %entry.holder,
                        error = %error,
                        "expired checkout could not be revoked"
                    );
                    report.failures.push(SweepFailure {
                        resource: entry.resource,
                        holder: entry.holder,
                        error,
                    });
                }
            }
        }

        report.reconciled = self.reconcile(now, resource)?;
        tracing::info!(
            revoked = report.revoked,
            reconciled = report.reconciled,
            failed = report.failures.len(),
            "sweep finished"
        );
        Ok(report)
    }

    /// Insert expiry rows for listed holders that have none in any resource
    /// sharing their membership document.
    fn reconcile(
        &self,
        now: DateTime<Utc>,
        resource: Option<&ResourceId>,
    ) -> Result<usize, StoreError> {
        let policies = self.policies.list()?;
        let wanted_document = match resource {
            Some(resource) => match policies.iter().find(|(id, _)| id == resource) {
                Some((_, policy)) => Some(policy.membership_document().clone()),
                None => return Ok(0),
            },
            None => None,
        };

        let mut by_document: BTreeMap<_, Vec<(ResourceId, CheckoutPolicy)>> = BTreeMap::new();
        for (id, policy) in policies {
            if wanted_document
                .as_ref()
                .is_some_and(|wanted| wanted != policy.membership_document())
            {
                continue;
            }
            by_document
                .entry(policy.membership_document().clone())
                .or_default()
                .push((id, policy));
        }

        let mut reconciled = 0;
        for (document, sharing) in by_document {
            let snapshot = self.documents.read(&document)?;
            for holder in &snapshot.holders {
                if self.has_expiry_row(&sharing, holder)? {
                    continue;
                }
                let (owner, policy) = &sharing[0];
                let expires_at = policy.lease_expiry(now);
                if self.expiry.insert_if_absent(owner, holder, expires_at)? {
                    reconciled += 1;
                    tracing::warn!(
                        resource = %owner,
                        holder = %holder,
                        document = %document,
                        expires_at = %expires_at,
                        "listed holder had no expiry row; lease restarted"
                    );
                }
            }
        }
        Ok(reconciled)
    }

    fn has_expiry_row(
        &self,
        sharing: &[(ResourceId, CheckoutPolicy)],
        holder: &HolderId,
    ) -> Result<bool, StoreError> {
        for (resource, _) in sharing {
            if self.expiry.get(resource, holder)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Current status of `resource` for `holder` (anonymous when `None`).
    /// Reads only.
    pub fn status(
        &self,
        resource: &ResourceId,
        holder: Option<&HolderId>,
        now: DateTime<Utc>,
    ) -> Result<CheckoutStatus, StoreError> {
        let Some(policy) = self.policies.get(resource)? else {
            return Ok(CheckoutStatus::NotConfigured);
        };
        let snapshot = self.documents.read(policy.membership_document())?;
        let expiries = self.holder_expiries(resource, &snapshot)?;

        if let Some(holder) = holder
            && snapshot.contains(holder)
        {
            match expiries.get(holder).copied().flatten() {
                Some(expires_at) if expires_at < now => {}
                expires_at => return Ok(CheckoutStatus::Active { expires_at }),
            }
        }

        let occupying: Vec<Option<DateTime<Utc>>> = expiries
            .values()
            .copied()
            .filter(|expires_at| expires_at.is_none_or(|at| at >= now))
            .collect();
        let free = (policy.max_concurrent() as usize).saturating_sub(occupying.len());
        if free > 0 {
            return Ok(CheckoutStatus::AvailableSlots {
                count: u32::try_from(free).unwrap_or(u32::MAX),
            });
        }

        Ok(CheckoutStatus::UnavailableUntil {
            available_at: occupying.into_iter().flatten().min(),
        })
    }

    fn holder_expiries(
        &self,
        resource: &ResourceId,
        snapshot: &MembershipSnapshot,
    ) -> Result<BTreeMap<HolderId, Option<DateTime<Utc>>>, StoreError> {
        let mut expiries = BTreeMap::new();
        for holder in &snapshot.holders {
            expiries.insert(holder.clone(), self.expiry.get(resource, holder)?);
        }
        Ok(expiries)
    }
}
