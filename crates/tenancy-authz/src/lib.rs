//! Tenancy authorization core
//!
//! Resolves caller credentials to identities, computes the org and space
//! namespaces an identity may see, and builds per-request cluster clients
//! that act as the caller.
//!
//! # Request flow
//!
//! ```text
//! Authorization header ──► Info ──► CachingIdentityProvider ──► Identity
//!                           │                                     │
//!                           ▼                                     ▼
//!              UnprivilegedClientFactory              NamespacePermissions
//!                           │                                     │
//!                           ▼                                     │
//!         RetryingClient ──► SpaceFilteringClient ◄───────────────┘
//! ```

#![deny(missing_docs)]

pub mod cache;
pub mod cert_auth;
pub mod config;
pub mod credential;
pub mod factory;
pub mod identity;
pub mod permissions;
pub mod retrying;
pub mod scoping;
pub mod token_review;

pub use cache::{CachingIdentityProvider, IdentityCache};
pub use cert_auth::ClusterCertInspector;
pub use config::AuthorizationConfig;
pub use credential::{parse_authorization_header, Info, Scheme};
pub use factory::{UnprivilegedClientFactory, UnprivilegedClientsetFactory, UserClientFactory};
pub use identity::{CertTokenIdentityProvider, Identity, IdentityProvider, SubjectKind};
pub use permissions::NamespacePermissions;
pub use retrying::{retryable_forbidden, RetryPredicate, RetryingClient};
pub use scoping::{
    ListScope, RootNsFilteringClient, RootNsFilteringOpts, SpaceFilteringClient,
    SpaceFilteringOpts,
};
pub use tenancy_common::{Error, Result};
pub use token_review::TokenReviewer;
