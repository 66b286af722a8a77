//! Bearer token inspection via the Kubernetes TokenReview API
//!
//! Submits the token to the cluster with a privileged client and maps the
//! review status to an [`Identity`].
//!
//! # Usage
//!
//! ```rust,ignore
//! let reviewer = TokenReviewer::new(privileged_client);
//! let identity = reviewer.inspect_token(token).await?;
//! // identity.name = "alice" or "system:serviceaccount:{namespace}:{name}"
//! ```

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec, TokenReviewStatus};
use kube::api::PostParams;
use kube::{Api, Client};
use tracing::debug;

use crate::identity::{Identity, TokenInspector, SERVICE_ACCOUNTS_GROUP, SERVICE_ACCOUNT_PREFIX};
use crate::{Error, Result};

/// [`TokenInspector`] backed by TokenReview
pub struct TokenReviewer {
    client: Client,
}

impl TokenReviewer {
    /// Create a reviewer using a privileged client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenInspector for TokenReviewer {
    async fn inspect_token(&self, token: &str) -> Result<Identity> {
        let api: Api<TokenReview> = Api::all(self.client.clone());

        let review = TokenReview {
            metadata: Default::default(),
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                audiences: None,
            },
            status: None,
        };

        let result = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(|e| {
                Error::from_kube(e, "TokenReview").context("failed to create token review")
            })?;

        let status = result.status.ok_or_else(|| {
            Error::internal_with_context("token-review", "TokenReview returned no status")
        })?;

        identity_from_status(&status)
    }
}

/// Map a TokenReview status to an identity
///
/// Members of `system:serviceaccounts` become [`SubjectKind::ServiceAccount`]
/// identities and must carry the `system:serviceaccount:` username prefix. A
/// service account username without it means the OIDC username prefix
/// collides with the cluster's own, which no retry can fix.
///
/// [`SubjectKind::ServiceAccount`]: crate::identity::SubjectKind::ServiceAccount
pub fn identity_from_status(status: &TokenReviewStatus) -> Result<Identity> {
    if !status.authenticated.unwrap_or(false) {
        let message = status
            .error
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or("token authentication failed");
        return Err(Error::invalid_auth(message));
    }

    let user = status.user.as_ref().ok_or_else(|| {
        Error::internal_with_context("token-review", "authenticated review has no user")
    })?;

    let username = user
        .username
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| {
            Error::internal_with_context("token-review", "authenticated review has no username")
        })?;

    let is_service_account = user
        .groups
        .as_ref()
        .is_some_and(|groups| groups.iter().any(|g| g == SERVICE_ACCOUNTS_GROUP));

    if is_service_account {
        if !username.starts_with(SERVICE_ACCOUNT_PREFIX) {
            return Err(Error::config(format!(
                "service account username {username:?} lacks the {SERVICE_ACCOUNT_PREFIX:?} prefix; \
                 check the OIDC username prefix configured on the API server"
            )));
        }
        debug!(username = %username, "TokenReview resolved service account");
        return Ok(Identity::service_account(username));
    }

    debug!(username = %username, "TokenReview resolved user");
    Ok(Identity::user(username))
}
