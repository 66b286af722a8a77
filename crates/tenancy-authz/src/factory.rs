//! Per-request cluster clients authenticated as the caller
//!
//! Every downstream cluster call runs with the caller's own credential, so
//! the API server's RBAC evaluation applies on top of the namespace scoping
//! done here. Factories hold an anonymous `kube::Config` template (all
//! `auth_info` removed) and clone it for every build; no credential is ever
//! written to shared state.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kube::config::AuthInfo;
use kube::{Client, Config};
use secrecy::SecretString;
use tenancy_common::retry::Backoff;
use tenancy_common::{KubeResourceClient, ResourceClient};
use tracing::debug;

use crate::credential::{CertKeyPair, Info};
use crate::retrying::{retryable_forbidden, RetryingClient};
use crate::{Error, Result};

/// Decorates every client produced by a [`UnprivilegedClientFactory`]
pub type ClientWrapper =
    Arc<dyn Fn(Arc<dyn ResourceClient>, &Info) -> Result<Arc<dyn ResourceClient>> + Send + Sync>;

/// Builds storage clients that act as the caller
#[cfg_attr(test, mockall::automock)]
pub trait UserClientFactory: Send + Sync {
    /// Storage client for the caller behind `info`
    fn build_client(&self, info: &Info) -> Result<Arc<dyn ResourceClient>>;

    /// Raw kube client for the caller behind `info`, for watches and subresources
    fn build_k8s_client(&self, info: &Info) -> Result<Client>;
}

/// Remove every credential from a cluster config
pub fn anonymous(mut config: Config) -> Config {
    config.auth_info = AuthInfo::default();
    config
}

/// Copy of `template` authenticated with a client certificate
pub fn config_with_cert(template: &Config, pair: &CertKeyPair) -> Config {
    let mut config = template.clone();
    config.auth_info.client_certificate_data = Some(STANDARD.encode(pair.cert_pem()));
    config.auth_info.client_key_data = Some(SecretString::from(STANDARD.encode(
        pair.key_pem().as_bytes(),
    )));
    config
}

/// Copy of `template` authenticated as the caller behind `info`
///
/// Only bearer tokens and client certificates can be forwarded; any other
/// credential is [`Error::NotAuthenticated`].
pub fn user_config(template: &Config, info: &Info) -> Result<Config> {
    match info {
        Info::Token(token) => {
            let mut config = template.clone();
            config.auth_info.token = Some(SecretString::from(token.as_str().to_string()));
            Ok(config)
        }
        Info::CertData(data) => {
            let pair = CertKeyPair::split(data)?;
            Ok(config_with_cert(template, &pair))
        }
        other => Err(Error::not_authenticated(format!(
            "cannot build a client for {} credentials",
            other.scheme()
        ))),
    }
}

fn client_for(template: &Config, info: &Info) -> Result<Client> {
    let config = user_config(template, info)?;
    Client::try_from(config)
        .map_err(|e| Error::from_kube(e, "Client").context("failed to build user client"))
}

/// [`UserClientFactory`] producing retrying clients authenticated as the caller
#[derive(Clone)]
pub struct UnprivilegedClientFactory {
    template: Arc<Config>,
    backoff: Backoff,
    wrappers: Vec<ClientWrapper>,
}

impl UnprivilegedClientFactory {
    /// Create a factory from a cluster config; its credentials are discarded
    pub fn new(config: Config, backoff: Backoff) -> Self {
        Self {
            template: Arc::new(anonymous(config)),
            backoff,
            wrappers: Vec::new(),
        }
    }

    /// Copy of this factory that additionally applies `wrapper` to every client
    ///
    /// Wrappers run in registration order, after the retry layer.
    pub fn with_wrapping<F>(&self, wrapper: F) -> Self
    where
        F: Fn(Arc<dyn ResourceClient>, &Info) -> Result<Arc<dyn ResourceClient>>
            + Send
            + Sync
            + 'static,
    {
        let mut factory = self.clone();
        factory.wrappers.push(Arc::new(wrapper));
        factory
    }

    /// The anonymous template every build starts from
    pub fn template(&self) -> &Config {
        &self.template
    }
}

impl UserClientFactory for UnprivilegedClientFactory {
    fn build_client(&self, info: &Info) -> Result<Arc<dyn ResourceClient>> {
        let client = client_for(&self.template, info)?;
        debug!(scheme = %info.scheme(), "Built user client");

        let mut built: Arc<dyn ResourceClient> = Arc::new(RetryingClient::new(
            Arc::new(KubeResourceClient::new(client)),
            self.backoff.clone(),
            retryable_forbidden(),
        ));
        for wrapper in &self.wrappers {
            built = wrapper(built, info)?;
        }
        Ok(built)
    }

    fn build_k8s_client(&self, info: &Info) -> Result<Client> {
        client_for(&self.template, info)
    }
}

/// Builds raw kube clients authenticated as the caller
#[derive(Clone)]
pub struct UnprivilegedClientsetFactory {
    template: Arc<Config>,
}

impl UnprivilegedClientsetFactory {
    /// Create a factory from a cluster config; its credentials are discarded
    pub fn new(config: Config) -> Self {
        Self {
            template: Arc::new(anonymous(config)),
        }
    }

    /// Kube client for the caller behind `info`
    pub fn build_clientset(&self, info: &Info) -> Result<Client> {
        client_for(&self.template, info)
    }
}
