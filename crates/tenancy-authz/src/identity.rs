//! Caller identity and the providers that resolve it
//!
//! An [`Identity`] mirrors an RBAC subject: a kind plus a name. Service
//! accounts always carry the `system:serviceaccount:<namespace>:<name>` form
//! so they compare directly against the username returned by TokenReview.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::Subject;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credential::Info;
use crate::{Error, Result};

/// Username prefix the cluster assigns to service accounts
pub const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// Group every service account belongs to
pub const SERVICE_ACCOUNTS_GROUP: &str = "system:serviceaccounts";

/// RBAC subject kind of an identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    /// A human or externally authenticated user
    User,
    /// An in-cluster service account
    ServiceAccount,
}

impl SubjectKind {
    /// Kind string used in RBAC subjects
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::ServiceAccount => "ServiceAccount",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved caller
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Subject kind
    pub kind: SubjectKind,
    /// User name, or the full `system:serviceaccount:` name
    pub name: String,
}

impl Identity {
    /// A user identity
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::User,
            name: name.into(),
        }
    }

    /// A service account identity from its full username
    pub fn service_account(name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::ServiceAccount,
            name: name.into(),
        }
    }

    /// Whether an RBAC subject from a binding in `binding_namespace` names this identity
    ///
    /// Service account subjects default to the binding's namespace when they
    /// do not set one.
    pub fn matches_subject(&self, subject: &Subject, binding_namespace: &str) -> bool {
        if subject.kind != self.kind.as_str() {
            return false;
        }

        match self.kind {
            SubjectKind::User => subject.name == self.name,
            SubjectKind::ServiceAccount => {
                let namespace = subject
                    .namespace
                    .as_deref()
                    .filter(|ns| !ns.is_empty())
                    .unwrap_or(binding_namespace);
                self.name == format!("{SERVICE_ACCOUNT_PREFIX}{namespace}:{}", subject.name)
            }
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Resolves a credential to the caller's identity
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Identity behind `info`
    async fn get_identity(&self, info: &Info) -> Result<Identity>;
}

/// Resolves bearer tokens
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenInspector: Send + Sync {
    /// Identity behind a bearer token
    async fn inspect_token(&self, token: &str) -> Result<Identity>;
}

/// Resolves client certificates
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CertInspector: Send + Sync {
    /// Identity behind concatenated PEM certificate and key
    async fn inspect_cert(&self, cert_data: &[u8]) -> Result<Identity>;
}

/// [`IdentityProvider`] that dispatches on the credential scheme
pub struct CertTokenIdentityProvider {
    token_inspector: Arc<dyn TokenInspector>,
    cert_inspector: Arc<dyn CertInspector>,
}

impl CertTokenIdentityProvider {
    /// Create a provider from its two inspectors
    pub fn new(
        token_inspector: Arc<dyn TokenInspector>,
        cert_inspector: Arc<dyn CertInspector>,
    ) -> Self {
        Self {
            token_inspector,
            cert_inspector,
        }
    }
}

#[async_trait]
impl IdentityProvider for CertTokenIdentityProvider {
    async fn get_identity(&self, info: &Info) -> Result<Identity> {
        debug!(scheme = %info.scheme(), "Inspecting credential");
        match info {
            Info::Token(token) => self.token_inspector.inspect_token(token).await,
            Info::CertData(data) => self.cert_inspector.inspect_cert(data).await,
            Info::Username(name) => Ok(Identity::user(name.clone())),
            Info::None => Err(Error::not_authenticated("no credential presented")),
        }
    }
}
