//! Generic namespaced object storage client
//!
//! Every cluster operation made on behalf of a caller goes through
//! [`ResourceClient`]. The trait works on [`DynamicObject`] plus an explicit
//! [`ApiResource`] so wrappers (retry, list scoping) can be stacked without
//! knowing the concrete resource types. [`KubeResourceClient`] is the kube-rs
//! implementation; typed helpers live at the bottom of this module.

use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::core::Selector;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::{Error, Result};

/// Field manager recorded on patches issued through [`KubeResourceClient`]
pub const DEFAULT_FIELD_MANAGER: &str = "tenancy-authz";

/// Name and optional namespace identifying a single object
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of an existing object
    pub fn of(obj: &DynamicObject) -> Self {
        Self {
            namespace: obj.metadata.namespace.clone(),
            name: obj.name_any(),
        }
    }
}

/// Options for list and delete-collection operations
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Restrict to one namespace; `None` lists across all namespaces
    pub namespace: Option<String>,
    /// Structured label selector (empty selects everything)
    pub selector: Selector,
    /// Raw field selector
    pub field_selector: Option<String>,
    /// Maximum number of items per page
    pub limit: Option<u32>,
}

impl ListOptions {
    /// Options scoped to a single namespace
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    /// Replace the label selector
    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = selector;
        self
    }

    /// Whether these options name an explicit namespace
    pub fn has_namespace(&self) -> bool {
        self.namespace.as_deref().is_some_and(|ns| !ns.is_empty())
    }

    /// Translate to kube-rs list parameters
    pub fn list_params(&self) -> ListParams {
        let mut lp = ListParams::default();
        if !self.selector.selects_all() {
            lp = lp.labels(&self.selector.to_string());
        }
        if let Some(fields) = &self.field_selector {
            lp = lp.fields(fields);
        }
        if let Some(limit) = self.limit {
            lp = lp.limit(limit);
        }
        lp
    }
}

/// Storage operations over any resource type
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetch a single object
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<DynamicObject>;

    /// List objects matching the options
    async fn list(&self, resource: &ApiResource, opts: &ListOptions)
        -> Result<Vec<DynamicObject>>;

    /// Create an object in the namespace recorded in its metadata
    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an existing object
    async fn update(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Patch an existing object
    async fn patch(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &Patch<serde_json::Value>,
    ) -> Result<DynamicObject>;

    /// Delete a single object
    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<()>;

    /// Delete every object matching the options
    async fn delete_all_of(&self, resource: &ApiResource, opts: &ListOptions) -> Result<()>;
}

/// [`ResourceClient`] backed by a kube-rs [`Client`]
///
/// Cluster errors are translated through [`Error::from_kube`] using the
/// resource kind, so callers can match on `Forbidden` / `NotFound` directly.
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
    field_manager: String,
}

impl KubeResourceClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }

    /// The underlying kube client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if !ns.is_empty() => Api::namespaced_with(self.client.clone(), ns, resource),
            _ => Api::all_with(self.client.clone(), resource),
        }
    }
}

fn object_name(resource: &ApiResource, obj: &DynamicObject) -> Result<String> {
    obj.metadata
        .name
        .clone()
        .ok_or_else(|| Error::parse(format!("{} has no metadata.name", resource.kind)))
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<DynamicObject> {
        trace!(kind = %resource.kind, name = %key.name, "get");
        self.api(resource, key.namespace.as_deref())
            .get(&key.name)
            .await
            .map_err(|e| Error::from_kube(e, &resource.kind))
    }

    async fn list(
        &self,
        resource: &ApiResource,
        opts: &ListOptions,
    ) -> Result<Vec<DynamicObject>> {
        trace!(
            kind = %resource.kind,
            namespace = ?opts.namespace,
            selector = %opts.selector,
            "list"
        );
        let list = self
            .api(resource, opts.namespace.as_deref())
            .list(&opts.list_params())
            .await
            .map_err(|e| Error::from_kube(e, &resource.kind))?;
        Ok(list.items)
    }

    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        self.api(resource, obj.metadata.namespace.as_deref())
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, &resource.kind))
    }

    async fn update(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let name = object_name(resource, obj)?;
        self.api(resource, obj.metadata.namespace.as_deref())
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, &resource.kind))
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &Patch<serde_json::Value>,
    ) -> Result<DynamicObject> {
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        self.api(resource, key.namespace.as_deref())
            .patch(&key.name, &params, patch)
            .await
            .map_err(|e| Error::from_kube(e, &resource.kind))
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<()> {
        self.api(resource, key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, &resource.kind))
    }

    async fn delete_all_of(&self, resource: &ApiResource, opts: &ListOptions) -> Result<()> {
        self.api(resource, opts.namespace.as_deref())
            .delete_collection(&DeleteParams::default(), &opts.list_params())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, &resource.kind))
    }
}

/// [`ApiResource`] for a statically typed resource
pub fn api_resource<K>() -> ApiResource
where
    K: Resource<DynamicType = ()>,
{
    ApiResource::erase::<K>(&())
}

/// Convert a dynamic object into its typed form
pub fn parse_object<K>(obj: DynamicObject) -> Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let name = obj.name_any();
    obj.try_parse::<K>()
        .map_err(|e| Error::parse(format!("failed to decode {} {}: {}", K::kind(&()), name, e)))
}

/// List a statically typed resource through any [`ResourceClient`]
pub async fn list_typed<K>(client: &dyn ResourceClient, opts: &ListOptions) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    client
        .list(&api_resource::<K>(), opts)
        .await?
        .into_iter()
        .map(parse_object::<K>)
        .collect()
}
