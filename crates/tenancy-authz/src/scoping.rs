//! List scoping
//!
//! A list without an explicit namespace would otherwise run cluster-wide
//! with the caller's credential, which RBAC usually forbids outright for
//! tenants. The scoping clients rewrite such lists instead:
//!
//! - [`RootNsFilteringOpts`] pins them to the one namespace a resource type
//!   always lives in.
//! - [`SpaceFilteringOpts`] restricts them by label to the spaces the caller
//!   is bound in, and runs the rewritten list on a privileged client. The
//!   synthesized selector is what enforces the boundary, so it fails closed:
//!   no authorized spaces means a selector that matches nothing.
//!
//! Every other operation goes through the caller's own client untouched.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject, Patch};
use kube::core::Expression;
use tenancy_common::{ListOptions, ObjectKey, ResourceClient, SPACE_GUID_LABEL};
use tracing::debug;

use crate::credential::Info;
use crate::permissions::NamespacePermissions;
use crate::{Error, Result};

/// Where a scoped list runs, and with which options
#[derive(Clone, Debug)]
pub enum ScopedList {
    /// Run on the caller's client
    Caller(ListOptions),
    /// Run on the privileged client; the options alone enforce visibility
    Privileged(ListOptions),
}

/// Rewrites list options for a caller
#[async_trait]
pub trait ListScope: Send + Sync {
    /// Scope a list issued by the caller behind `info`
    async fn scope_list(&self, info: &Info, opts: &ListOptions) -> Result<ScopedList>;

    /// Scope a delete-collection; always runs on the caller's client
    async fn scope_delete_all_of(
        &self,
        _info: &Info,
        opts: &ListOptions,
    ) -> Result<ListOptions> {
        Ok(opts.clone())
    }
}

/// Pins every list to one fixed namespace
#[derive(Clone, Debug)]
pub struct RootNsFilteringOpts {
    root_namespace: String,
}

impl RootNsFilteringOpts {
    /// Scope to `root_namespace`
    pub fn new(root_namespace: impl Into<String>) -> Self {
        Self {
            root_namespace: root_namespace.into(),
        }
    }

    /// Options with the namespace replaced by the root namespace
    pub fn apply(&self, opts: &ListOptions) -> ListOptions {
        ListOptions {
            namespace: Some(self.root_namespace.clone()),
            ..opts.clone()
        }
    }
}

#[async_trait]
impl ListScope for RootNsFilteringOpts {
    async fn scope_list(&self, _info: &Info, opts: &ListOptions) -> Result<ScopedList> {
        Ok(ScopedList::Caller(self.apply(opts)))
    }

    async fn scope_delete_all_of(
        &self,
        _info: &Info,
        opts: &ListOptions,
    ) -> Result<ListOptions> {
        Ok(self.apply(opts))
    }
}

/// Restricts namespace-less lists to the caller's authorized spaces
#[derive(Clone)]
pub struct SpaceFilteringOpts {
    permissions: Arc<NamespacePermissions>,
    label: String,
}

impl SpaceFilteringOpts {
    /// Filter on the space GUID label
    pub fn new(permissions: Arc<NamespacePermissions>) -> Self {
        Self::with_label(permissions, SPACE_GUID_LABEL)
    }

    /// Filter on a custom label whose value is the space namespace
    pub fn with_label(permissions: Arc<NamespacePermissions>, label: impl Into<String>) -> Self {
        Self {
            permissions,
            label: label.into(),
        }
    }

    /// Options restricted to `namespaces`
    ///
    /// The restriction is ANDed onto the caller's selector. An empty set
    /// yields `label,!label`, which no object can satisfy.
    pub fn restrict(&self, opts: &ListOptions, namespaces: BTreeSet<String>) -> ListOptions {
        let mut scoped = opts.clone();
        if namespaces.is_empty() {
            scoped.selector.extend([
                Expression::Exists(self.label.clone()),
                Expression::DoesNotExist(self.label.clone()),
            ]);
        } else {
            scoped
                .selector
                .extend([Expression::In(self.label.clone(), namespaces)]);
        }
        scoped
    }
}

#[async_trait]
impl ListScope for SpaceFilteringOpts {
    async fn scope_list(&self, info: &Info, opts: &ListOptions) -> Result<ScopedList> {
        if opts.has_namespace() {
            return Ok(ScopedList::Caller(opts.clone()));
        }

        let authorized = self
            .permissions
            .get_authorized_space_namespaces(info)
            .await
            .map_err(|e| e.context("failed to get authorized space namespaces"))?;

        let namespaces: BTreeSet<String> = authorized
            .into_iter()
            .filter_map(|(ns, allowed)| allowed.then_some(ns))
            .collect();

        debug!(
            scheme = %info.scheme(),
            spaces = namespaces.len(),
            "Scoping list to authorized spaces"
        );
        Ok(ScopedList::Privileged(self.restrict(opts, namespaces)))
    }
}

/// [`ResourceClient`] that rewrites lists through a [`ListScope`]
pub struct ScopedClient<S> {
    user: Arc<dyn ResourceClient>,
    privileged: Option<Arc<dyn ResourceClient>>,
    info: Info,
    scope: S,
}

/// Caller's client with lists pinned to one namespace
pub type RootNsFilteringClient = ScopedClient<RootNsFilteringOpts>;

/// Caller's client with namespace-less lists filtered to authorized spaces
pub type SpaceFilteringClient = ScopedClient<SpaceFilteringOpts>;

impl ScopedClient<RootNsFilteringOpts> {
    /// Pin the lists of `user` to `opts`'s namespace
    pub fn root_ns(
        user: Arc<dyn ResourceClient>,
        info: Info,
        opts: RootNsFilteringOpts,
    ) -> Self {
        Self {
            user,
            privileged: None,
            info,
            scope: opts,
        }
    }
}

impl ScopedClient<SpaceFilteringOpts> {
    /// Filter namespace-less lists of `user`, running them on `privileged`
    pub fn space_filtering(
        user: Arc<dyn ResourceClient>,
        privileged: Arc<dyn ResourceClient>,
        info: Info,
        opts: SpaceFilteringOpts,
    ) -> Self {
        Self {
            user,
            privileged: Some(privileged),
            info,
            scope: opts,
        }
    }
}

/// Factory wrapper adding space filtering to every user client
///
/// Register with [`crate::factory::UnprivilegedClientFactory::with_wrapping`].
pub fn space_filtering_wrapper(
    privileged: Arc<dyn ResourceClient>,
    opts: SpaceFilteringOpts,
) -> impl Fn(Arc<dyn ResourceClient>, &Info) -> Result<Arc<dyn ResourceClient>> + Send + Sync {
    move |user: Arc<dyn ResourceClient>, info: &Info| {
        Ok(Arc::new(SpaceFilteringClient::space_filtering(
            user,
            privileged.clone(),
            info.clone(),
            opts.clone(),
        )) as Arc<dyn ResourceClient>)
    }
}

#[async_trait]
impl<S: ListScope> ResourceClient for ScopedClient<S> {
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<DynamicObject> {
        self.user.get(resource, key).await
    }

    async fn list(
        &self,
        resource: &ApiResource,
        opts: &ListOptions,
    ) -> Result<Vec<DynamicObject>> {
        match self.scope.scope_list(&self.info, opts).await? {
            ScopedList::Caller(scoped) => self.user.list(resource, &scoped).await,
            ScopedList::Privileged(scoped) => {
                let privileged = self.privileged.as_ref().ok_or_else(|| {
                    Error::internal_with_context(
                        "list-scope",
                        "scope requires a privileged client",
                    )
                })?;
                privileged.list(resource, &scoped).await
            }
        }
    }

    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        self.user.create(resource, obj).await
    }

    async fn update(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        self.user.update(resource, obj).await
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &Patch<serde_json::Value>,
    ) -> Result<DynamicObject> {
        self.user.patch(resource, key, patch).await
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<()> {
        self.user.delete(resource, key).await
    }

    async fn delete_all_of(&self, resource: &ApiResource, opts: &ListOptions) -> Result<()> {
        let scoped = self.scope.scope_delete_all_of(&self.info, opts).await?;
        self.user.delete_all_of(resource, &scoped).await
    }
}
