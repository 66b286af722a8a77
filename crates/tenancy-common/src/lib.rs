//! Common types for the tenancy authorization core: errors, retry and the
//! storage client abstraction

#![deny(missing_docs)]

pub mod client;
pub mod error;
pub mod retry;

pub use client::{KubeResourceClient, ListOptions, ObjectKey, ResourceClient};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label carried by every namespace backing an organization
pub const ORG_NAME_LABEL: &str = "cloudfoundry.org/org-name";

/// Label carried by every namespace backing a space
pub const SPACE_NAME_LABEL: &str = "cloudfoundry.org/space-name";

/// Label carrying the owning space's GUID on namespaced tenant resources
pub const SPACE_GUID_LABEL: &str = "korifi.cloudfoundry.org/space-guid";
