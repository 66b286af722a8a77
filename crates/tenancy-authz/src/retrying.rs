//! Retry wrapper for storage clients
//!
//! A role binding created moments ago may not yet be visible to the API
//! server's authorizer, so the caller's next request is briefly forbidden.
//! [`RetryingClient`] retries such failures on a bounded backoff schedule
//! before surfacing them unchanged.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject, Patch};
use tenancy_common::retry::{retry_with_backoff, Backoff};
use tenancy_common::{ListOptions, ObjectKey, ResourceClient};

use crate::{Error, Result};

/// Decides whether a failed operation should be retried
#[derive(Clone)]
pub struct RetryPredicate(Arc<dyn Fn(&Error) -> bool + Send + Sync>);

impl RetryPredicate {
    /// Predicate from a closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Never retry
    pub fn never() -> Self {
        Self::new(|_| false)
    }

    /// Retry only when both predicates agree
    pub fn and(self, other: RetryPredicate) -> Self {
        Self::new(move |e| self.matches(e) && other.matches(e))
    }

    /// Retry when either predicate agrees
    pub fn or(self, other: RetryPredicate) -> Self {
        Self::new(move |e| self.matches(e) || other.matches(e))
    }

    /// Invert the predicate
    pub fn not(self) -> Self {
        Self::new(move |e| !self.matches(e))
    }

    /// Evaluate the predicate
    pub fn matches(&self, err: &Error) -> bool {
        (self.0)(err)
    }
}

impl fmt::Debug for RetryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryPredicate")
    }
}

/// Retry forbidden errors, except webhook validation rejections
///
/// Admission webhooks report validation failures with a forbidden status.
/// Those are final answers, not authorizer lag.
pub fn retryable_forbidden() -> RetryPredicate {
    RetryPredicate::new(Error::is_forbidden)
        .and(RetryPredicate::new(Error::is_validation_rejection).not())
}

/// [`ResourceClient`] that retries failures accepted by a predicate
pub struct RetryingClient {
    inner: Arc<dyn ResourceClient>,
    backoff: Backoff,
    predicate: RetryPredicate,
}

impl RetryingClient {
    /// Wrap `inner`
    pub fn new(
        inner: Arc<dyn ResourceClient>,
        backoff: Backoff,
        predicate: RetryPredicate,
    ) -> Self {
        Self {
            inner,
            backoff,
            predicate,
        }
    }

    async fn retry<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let predicate = &self.predicate;
        retry_with_backoff(&self.backoff, operation, |e| predicate.matches(e), op).await
    }
}

#[async_trait]
impl ResourceClient for RetryingClient {
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<DynamicObject> {
        self.retry("get", || self.inner.get(resource, key)).await
    }

    async fn list(
        &self,
        resource: &ApiResource,
        opts: &ListOptions,
    ) -> Result<Vec<DynamicObject>> {
        self.retry("list", || self.inner.list(resource, opts)).await
    }

    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        self.retry("create", || self.inner.create(resource, obj)).await
    }

    async fn update(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        self.retry("update", || self.inner.update(resource, obj)).await
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &Patch<serde_json::Value>,
    ) -> Result<DynamicObject> {
        self.retry("patch", || self.inner.patch(resource, key, patch)).await
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<()> {
        self.retry("delete", || self.inner.delete(resource, key)).await
    }

    async fn delete_all_of(&self, resource: &ApiResource, opts: &ListOptions) -> Result<()> {
        self.retry("delete_all_of", || self.inner.delete_all_of(resource, opts))
            .await
    }
}
