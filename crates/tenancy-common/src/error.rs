//! Error types for the tenancy authorization core
//!
//! Errors are structured so callers can tell credential problems
//! (`NotAuthenticated`, `InvalidAuth`) apart from authorization denials
//! (`Forbidden`), missing resources, fatal parse/configuration problems and
//! raw cluster failures.
//!
//! Raw cluster errors enter as [`Error::Kube`]. Callers that know which
//! resource type they were operating on translate them with
//! [`Error::from_kube`] into the taxonomy above.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for tenancy operations
#[derive(Debug, Error)]
pub enum Error {
    /// No usable credential was presented
    #[error("not authenticated: {message}")]
    NotAuthenticated {
        /// What was missing
        message: String,
    },

    /// A credential was presented but is malformed or was rejected
    #[error("invalid auth: {message}")]
    InvalidAuth {
        /// Why the credential was rejected
        message: String,
    },

    /// The caller is authenticated but the cluster denied the operation
    #[error("forbidden [{resource_type}]: {source}")]
    Forbidden {
        /// Resource type the operation targeted
        resource_type: String,
        /// The underlying cluster error
        #[source]
        source: kube::Error,
    },

    /// The resource does not exist (or is not visible)
    #[error("{resource_type} not found: {source}")]
    NotFound {
        /// Resource type the operation targeted
        resource_type: String,
        /// The underlying cluster error
        #[source]
        source: kube::Error,
    },

    /// Malformed input that can never succeed (PEM, certificate, names)
    #[error("parse error: {message}")]
    Parse {
        /// Description of what failed to parse
        message: String,
    },

    /// Cluster or process misconfiguration
    #[error("configuration error: {message}")]
    Config {
        /// Description of the misconfiguration
        message: String,
    },

    /// Untranslated Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// An error annotated with the operation that produced it
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted (e.g. "failed to list role bindings")
        context: String,
        /// The wrapped error
        #[source]
        source: Box<Error>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred
        context: String,
    },
}

/// Body of a validating webhook rejection.
///
/// The admission webhooks deny requests with a forbidden status whose
/// `reason` is this struct serialized as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRejection {
    /// Machine-readable rejection type
    #[serde(rename = "validationErrorType")]
    pub error_type: String,
    /// Human-readable message
    pub message: String,
}

impl ValidationRejection {
    /// Try to decode a status reason as a webhook rejection
    pub fn from_reason(reason: &str) -> Option<Self> {
        serde_json::from_str::<Self>(reason)
            .ok()
            .filter(|r| !r.error_type.is_empty())
    }
}

impl Error {
    /// Create a not-authenticated error
    pub fn not_authenticated(msg: impl Into<String>) -> Self {
        Self::NotAuthenticated {
            message: msg.into(),
        }
    }

    /// Create an invalid-auth error
    pub fn invalid_auth(msg: impl Into<String>) -> Self {
        Self::InvalidAuth {
            message: msg.into(),
        }
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Annotate this error with what was being attempted
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Translate a cluster error for an operation on `resource_type`
    ///
    /// 401 becomes [`Error::InvalidAuth`], 403 [`Error::Forbidden`] and 404
    /// [`Error::NotFound`]. Everything else stays a raw [`Error::Kube`].
    pub fn from_kube(source: kube::Error, resource_type: impl Into<String>) -> Self {
        let code = match &source {
            kube::Error::Api(response) => response.code,
            _ => 0,
        };

        match code {
            401 => Self::InvalidAuth {
                message: source.to_string(),
            },
            403 => Self::Forbidden {
                resource_type: resource_type.into(),
                source,
            },
            404 => Self::NotFound {
                resource_type: resource_type.into(),
                source,
            },
            _ => Self::Kube { source },
        }
    }

    /// Re-translate an already wrapped error for `resource_type`
    ///
    /// Raw cluster errors are translated with [`Error::from_kube`]; anything
    /// already in the taxonomy is returned unchanged.
    pub fn for_resource(self, resource_type: impl Into<String>) -> Self {
        match self {
            Self::Kube { source } => Self::from_kube(source, resource_type),
            other => other,
        }
    }

    /// Report forbidden errors as not found, hiding resource existence
    pub fn forbidden_as_not_found(self) -> Self {
        match self {
            Self::Forbidden {
                resource_type,
                source,
            } => Self::NotFound {
                resource_type,
                source,
            },
            other => other,
        }
    }

    /// The innermost error, looking through [`Error::Context`] annotations
    pub fn root(&self) -> &Error {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// HTTP status code of the underlying cluster error, if any
    fn api_code(&self) -> Option<u16> {
        match self.root() {
            Self::Kube {
                source: kube::Error::Api(response),
            }
            | Self::Forbidden {
                source: kube::Error::Api(response),
                ..
            }
            | Self::NotFound {
                source: kube::Error::Api(response),
                ..
            } => Some(response.code),
            _ => None,
        }
    }

    /// Whether the cluster denied the operation
    pub fn is_forbidden(&self) -> bool {
        matches!(self.root(), Self::Forbidden { .. }) || self.api_code() == Some(403)
    }

    /// Whether the resource was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound { .. }) || self.api_code() == Some(404)
    }

    /// Whether the credential was rejected
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.root(), Self::InvalidAuth { .. }) || self.api_code() == Some(401)
    }

    /// Whether this error is a missing credential
    pub fn is_not_authenticated(&self) -> bool {
        matches!(self.root(), Self::NotAuthenticated { .. })
    }

    /// The webhook rejection carried by a forbidden status, if any
    pub fn validation_rejection(&self) -> Option<ValidationRejection> {
        let response = match self.root() {
            Self::Kube {
                source: kube::Error::Api(response),
            }
            | Self::Forbidden {
                source: kube::Error::Api(response),
                ..
            } => response,
            _ => return None,
        };

        if response.code != 403 {
            return None;
        }
        ValidationRejection::from_reason(&response.reason)
    }

    /// Whether this is a webhook validation rejection re-encoded as forbidden
    pub fn is_validation_rejection(&self) -> bool {
        self.validation_rejection().is_some()
    }

    /// Check if this error is worth retrying at all
    ///
    /// Credential, parse and configuration errors are fatal. Cluster errors
    /// are retryable unless they are a 4xx response.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::NotAuthenticated { .. }
            | Self::InvalidAuth { .. }
            | Self::Parse { .. }
            | Self::Config { .. } => false,
            Self::Forbidden { .. } | Self::NotFound { .. } => false,
            Self::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Self::Internal { .. } => true,
            Self::Context { .. } => false,
        }
    }
}
