//! Policy store contract.
//!
//! Policies are written by the declaration path and only read by the
//! checkout service. A record that lacks any of the three policy fields
//! reads as "not configured".

use crate::error::StoreError;
use crate::model::{CheckoutPolicy, PolicyRecord, ResourceId};
use std::sync::Arc;

pub trait PolicyStore: Send + Sync {
    /// Raw record for `resource`, complete or not.
    fn record(&self, resource: &ResourceId) -> Result<Option<PolicyRecord>, StoreError>;

    /// Every stored record in resource order.
    fn records(&self) -> Result<Vec<(ResourceId, PolicyRecord)>, StoreError>;

    /// Decide the record for `resource` from a consistent view of every
    /// stored record, in resource order, and store it. `decide` returning
    /// `None` leaves the store untouched. No other writer commits between the
    /// view and the write.
    fn put_with(
        &self,
        resource: &ResourceId,
        decide: &mut dyn FnMut(&[(ResourceId, PolicyRecord)]) -> Option<PolicyRecord>,
    ) -> Result<(), StoreError>;

    /// Remove the record for `resource`. Returns whether one existed.
    fn remove(&self, resource: &ResourceId) -> Result<bool, StoreError>;

    /// Insert or replace the record for `resource`.
    fn put(&self, resource: &ResourceId, record: PolicyRecord) -> Result<(), StoreError> {
        let mut record = Some(record);
        self.put_with(resource, &mut |_| record.take())
    }

    /// The complete policy for `resource`, if any.
    fn get(&self, resource: &ResourceId) -> Result<Option<CheckoutPolicy>, StoreError> {
        Ok(self
            .record(resource)?
            .and_then(|record| record.to_policy()))
    }

    /// All complete policies in resource order.
    fn list(&self) -> Result<Vec<(ResourceId, CheckoutPolicy)>, StoreError> {
        Ok(self
            .records()?
            .into_iter()
            .filter_map(|(resource, record)| record.to_policy().map(|policy| (resource, policy)))
            .collect())
    }
}

impl<T: PolicyStore + ?Sized> PolicyStore for Arc<T> {
    fn record(&self, resource: &ResourceId) -> Result<Option<PolicyRecord>, StoreError> {
        (**self).record(resource)
    }

    fn records(&self) -> Result<Vec<(ResourceId, PolicyRecord)>, StoreError> {
        (**self).records()
    }

    fn put_with(
        &self,
        resource: &ResourceId,
        decide: &mut dyn FnMut(&[(ResourceId, PolicyRecord)]) -> Option<PolicyRecord>,
    ) -> Result<(), StoreError> {
        (**self).put_with(resource, decide)
    }

    fn remove(&self, resource: &ResourceId) -> Result<bool, StoreError> {
        (**self).remove(resource)
    }
}
