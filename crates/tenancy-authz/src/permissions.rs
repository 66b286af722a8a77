//! Namespace permission resolution
//!
//! Visibility is coarse-grained: an identity can see an org or space
//! namespace when at least one role binding in that namespace names it as a
//! subject. The role's rules are not inspected; verb-level enforcement is
//! left to the cluster on each call made with the caller's credential.
//!
//! Resolution reads every role binding, so it runs on a privileged client.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::core::{Expression, Selector};
use kube::ResourceExt;
use tenancy_common::client::list_typed;
use tenancy_common::{ListOptions, ResourceClient, ORG_NAME_LABEL, SPACE_NAME_LABEL};
use tracing::debug;

use crate::credential::Info;
use crate::identity::{Identity, IdentityProvider};
use crate::Result;

/// Resolves which org and space namespaces an identity may operate in
pub struct NamespacePermissions {
    privileged: Arc<dyn ResourceClient>,
    identity_provider: Arc<dyn IdentityProvider>,
}

impl NamespacePermissions {
    /// Create a resolver over a privileged client
    pub fn new(
        privileged: Arc<dyn ResourceClient>,
        identity_provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            privileged,
            identity_provider,
        }
    }

    /// Org namespaces the caller behind `info` is bound in
    pub async fn get_authorized_org_namespaces(
        &self,
        info: &Info,
    ) -> Result<HashMap<String, bool>> {
        self.authorized_namespaces(info, ORG_NAME_LABEL).await
    }

    /// Space namespaces the caller behind `info` is bound in
    pub async fn get_authorized_space_namespaces(
        &self,
        info: &Info,
    ) -> Result<HashMap<String, bool>> {
        self.authorized_namespaces(info, SPACE_NAME_LABEL).await
    }

    /// Whether any role binding in `namespace` names `identity`
    pub async fn authorized_in(&self, identity: &Identity, namespace: &str) -> Result<bool> {
        let bindings = self
            .list_role_bindings(ListOptions::in_namespace(namespace))
            .await?;

        Ok(bindings
            .iter()
            .any(|binding| binds_identity(binding, identity, namespace)))
    }

    async fn authorized_namespaces(
        &self,
        info: &Info,
        label: &str,
    ) -> Result<HashMap<String, bool>> {
        let identity = self
            .identity_provider
            .get_identity(info)
            .await
            .map_err(|e| e.context("failed to get identity"))?;

        let bindings = self.list_role_bindings(ListOptions::default()).await?;

        let selector = Selector::from_iter([Expression::Exists(label.to_string())]);
        let namespaces: Vec<Namespace> = list_typed(
            self.privileged.as_ref(),
            &ListOptions::default().with_selector(selector),
        )
        .await
        .map_err(|e| e.for_resource("Namespace").context("failed to list namespaces"))?;

        let labeled: HashSet<String> = namespaces.iter().map(|ns| ns.name_any()).collect();

        let mut authorized = HashMap::new();
        for binding in &bindings {
            let Some(namespace) = binding.metadata.namespace.as_deref() else {
                continue;
            };
            if labeled.contains(namespace) && binds_identity(binding, &identity, namespace) {
                authorized.insert(namespace.to_string(), true);
            }
        }

        debug!(
            identity = %identity,
            label = %label,
            count = authorized.len(),
            "Resolved authorized namespaces"
        );
        Ok(authorized)
    }

    async fn list_role_bindings(&self, opts: ListOptions) -> Result<Vec<RoleBinding>> {
        list_typed(self.privileged.as_ref(), &opts)
            .await
            .map_err(|e| e.for_resource("RoleBinding").context("failed to list role bindings"))
    }
}

fn binds_identity(binding: &RoleBinding, identity: &Identity, namespace: &str) -> bool {
    binding
        .subjects
        .iter()
        .flatten()
        .any(|subject| identity.matches_subject(subject, namespace))
}
