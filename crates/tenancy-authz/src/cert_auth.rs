//! Client certificate inspection
//!
//! The username is the certificate's subject Common Name. The certificate
//! is not trusted on parse alone: the inspector builds a cluster client from
//! the certificate and key and performs a cheap authenticated read, so only
//! certificates the API server accepts resolve to an identity.

use std::sync::Arc;

use async_trait::async_trait;
use kube::{Client, Config};
use tracing::debug;

use crate::credential::CertKeyPair;
use crate::factory::config_with_cert;
use crate::identity::{CertInspector, Identity};
use crate::{Error, Result};

/// Common Name of a DER encoded certificate
pub fn common_name(cert_der: &[u8]) -> Result<String> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| Error::parse(format!("failed to parse client certificate: {e}")))?;

    let cn = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .filter(|cn| !cn.is_empty())
        .ok_or_else(|| Error::parse("client certificate has no Common Name"))?;

    Ok(cn.to_string())
}

/// Translate a failed verification read
///
/// A 401 becomes [`Error::InvalidAuth`]; every other cluster error is
/// returned as translated, without added context.
fn verification_error(err: kube::Error) -> Error {
    Error::from_kube(err, "Version")
}

/// [`CertInspector`] that verifies certificates against the cluster
pub struct ClusterCertInspector {
    template: Arc<Config>,
}

impl ClusterCertInspector {
    /// Create an inspector from an anonymous cluster config
    pub fn new(template: Arc<Config>) -> Self {
        Self { template }
    }
}

#[async_trait]
impl CertInspector for ClusterCertInspector {
    async fn inspect_cert(&self, cert_data: &[u8]) -> Result<Identity> {
        let pair = CertKeyPair::split(cert_data)?;
        let cn = common_name(pair.cert_der())?;

        let config = config_with_cert(&self.template, &pair);
        let client = Client::try_from(config).map_err(|e| {
            Error::from_kube(e, "Client").context("failed to build client for certificate")
        })?;

        client
            .apiserver_version()
            .await
            .map_err(verification_error)?;

        debug!(cn = %cn, "Client certificate accepted by cluster");
        Ok(Identity::user(cn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair};

    fn cert_with_subject(cn: Option<&str>) -> (String, String) {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        if let Some(cn) = cn {
            dn.push(DnType::CommonName, DnValue::Utf8String(cn.to_string()));
        }
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String("tenants".to_string()),
        );
        params.distinguished_name = dn;

        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    fn inspector() -> ClusterCertInspector {
        let url = "https://127.0.0.1:6443".parse().unwrap();
        ClusterCertInspector::new(Arc::new(Config::new(url)))
    }

    #[test]
    fn test_common_name_extracted() {
        let (cert_pem, key_pem) = cert_with_subject(Some("alice"));
        let pair = CertKeyPair::split(format!("{cert_pem}{key_pem}").as_bytes()).unwrap();
        assert_eq!(common_name(pair.cert_der()).unwrap(), "alice");
    }

    #[test]
    fn test_missing_common_name_is_parse_error() {
        let (cert_pem, key_pem) = cert_with_subject(None);
        let pair = CertKeyPair::split(format!("{cert_pem}{key_pem}").as_bytes()).unwrap();
        let err = common_name(pair.cert_der()).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("no Common Name"));
    }

    #[test]
    fn test_garbage_der_is_parse_error() {
        let err = common_name(&[1, 2, 3]).unwrap_err();
        assert!(err.to_string().contains("failed to parse client certificate"));
    }

    #[tokio::test]
    async fn test_missing_cert_block() {
        let err = inspector().inspect_cert(b"garbage").await.unwrap_err();
        assert_eq!(err.to_string(), "parse error: failed to decode cert PEM");
    }

    #[tokio::test]
    async fn test_missing_key_block() {
        let (cert_pem, _) = cert_with_subject(Some("alice"));
        let err = inspector().inspect_cert(cert_pem.as_bytes()).await.unwrap_err();
        assert_eq!(err.to_string(), "parse error: failed to decode key PEM");
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} from /version"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_rejected_certificate_is_invalid_auth() {
        let err = verification_error(api_error(401, "Unauthorized"));
        assert!(matches!(err, Error::InvalidAuth { .. }));
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_other_verification_errors_pass_through() {
        let err = verification_error(api_error(503, "ServiceUnavailable"));
        assert!(matches!(err, Error::Kube { .. }));
        assert!(err.is_retryable());

        let err = verification_error(api_error(403, "Forbidden"));
        assert!(matches!(err, Error::Forbidden { .. }));
    }
}
