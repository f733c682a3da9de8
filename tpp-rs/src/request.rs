//! The enrollment request: caller-chosen identity attributes plus lazily
//! generated key material and CSR.

use once_cell::sync::OnceCell;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};

use crate::csr::{self, Subject};
use crate::error::{Error, Result};
use crate::key::KeyType;
use crate::policy::ZoneConfiguration;

/// A certificate enrollment request.
///
/// Key pair and CSR are generated on first access and cached for the
/// lifetime of the request; concurrent first accesses are serialized so
/// generation happens at most once. A pre-supplied CSR is returned verbatim
/// and never regenerated.
#[derive(Default)]
pub struct CertificateRequest {
    pub common_name: Option<String>,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    pub country: Option<String>,
    pub province: Option<String>,
    pub locality: Option<String>,
    pub san_dns: Vec<String>,
    /// Requested key shape; the platform default (RSA-2048) applies when
    /// unset and no zone default was merged in.
    pub key_type: Option<KeyType>,
    pub friendly_name: Option<String>,
    id: Option<String>,
    key: OnceCell<PKey<Private>>,
    csr_pem: OnceCell<String>,
}

impl CertificateRequest {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: Some(common_name.into()),
            ..Default::default()
        }
    }

    /// Wrap an externally generated CSR. `csr()` returns it verbatim,
    /// regardless of any other attribute set on the request.
    pub fn from_csr_pem(pem: impl Into<String>) -> Self {
        Self {
            csr_pem: OnceCell::with_value(pem.into()),
            ..Default::default()
        }
    }

    /// Attach a caller-provided private key. Fails once key material
    /// exists, supplied or generated; swapping keys under a request would
    /// detach it from an already issued CSR.
    pub fn set_private_key(&self, key: PKey<Private>) -> Result<()> {
        self.key
            .set(key)
            .map_err(|_| Error::Configuration("request already has a private key".to_owned()))
    }

    /// The platform identifier assigned at submission, if any.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Record the platform identifier. Called by the transport layer after
    /// submission.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// The name the request is filed under: the friendly name when set,
    /// the common name otherwise.
    pub fn object_name(&self) -> Option<&str> {
        self.friendly_name.as_deref().or(self.common_name.as_deref())
    }

    /// The key shape enforcement and generation operate on.
    pub fn resolved_key_type(&self) -> KeyType {
        self.key_type.unwrap_or_default()
    }

    pub fn has_private_key(&self) -> bool {
        self.key.get().is_some()
    }

    /// The request's private key, generated on first access.
    pub fn private_key(&self) -> Result<&PKey<Private>> {
        self.key
            .get_or_try_init(|| self.resolved_key_type().generate())
    }

    /// The private key as PEM-encoded PKCS#8.
    pub fn private_key_pem(&self) -> Result<String> {
        let pem = self.private_key()?.private_key_to_pem_pkcs8()?;
        Ok(String::from_utf8_lossy(&pem).into_owned())
    }

    /// The PEM-encoded PKCS#10 request, generated and signed on first
    /// access.
    pub fn csr(&self) -> Result<&str> {
        self.csr_pem
            .get_or_try_init(|| {
                let common_name = match self.common_name.as_deref() {
                    Some(name) if !name.is_empty() => name.to_owned(),
                    _ => {
                        return Err(Error::Configuration(
                            "a common name is required to generate a CSR".to_owned(),
                        ))
                    }
                };
                let subject = Subject {
                    common_name,
                    organization: self.organization.clone(),
                    organizational_unit: self.organizational_unit.clone(),
                    country: self.country.clone(),
                    province: self.province.clone(),
                    locality: self.locality.clone(),
                };
                let key = self.private_key()?;
                csr::build_csr(&subject, &self.san_dns, key, MessageDigest::sha256())
            })
            .map(String::as_str)
    }

    /// Fill unset attributes from the zone's defaults. Caller-set values
    /// are never overwritten.
    pub fn update_from_zone_config(&mut self, zone: &ZoneConfiguration) {
        if self.organization.is_none() {
            self.organization = zone.organization.as_ref().map(|f| f.value().to_owned());
        }
        if self.organizational_unit.is_none() {
            self.organizational_unit = zone
                .organizational_unit
                .as_ref()
                .map(|f| f.value().to_owned());
        }
        if self.country.is_none() {
            self.country = zone.country.as_ref().map(|f| f.value().to_owned());
        }
        if self.province.is_none() {
            self.province = zone.province.as_ref().map(|f| f.value().to_owned());
        }
        if self.locality.is_none() {
            self.locality = zone.locality.as_ref().map(|f| f.value().to_owned());
        }
        if self.key_type.is_none() {
            self.key_type = Some(zone.key_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Curve;
    use crate::policy::CertField;

    const PRESUPPLIED: &str = "-----BEGIN CERTIFICATE REQUEST-----\nnot even valid\n-----END CERTIFICATE REQUEST-----\n";

    #[test]
    fn csr_without_common_name_is_a_configuration_error() {
        let request = CertificateRequest::default();
        assert!(matches!(request.csr(), Err(Error::Configuration(_))));
    }

    #[test]
    fn csr_access_is_idempotent() {
        let mut request = CertificateRequest::new("memo.example.com");
        request.key_type = Some(KeyType::Rsa(1024));
        let first = request.csr().unwrap().to_owned();
        let second = request.csr().unwrap().to_owned();
        assert_eq!(first, second);
    }

    #[test]
    fn private_key_is_generated_at_most_once() {
        let mut request = CertificateRequest::new("memo.example.com");
        request.key_type = Some(KeyType::Ecdsa(Curve::P256));
        let first = request.private_key().unwrap().private_key_to_pem_pkcs8().unwrap();
        let second = request.private_key().unwrap().private_key_to_pem_pkcs8().unwrap();
        assert_eq!(first, second);
        assert!(request.has_private_key());
    }

    #[test]
    fn pre_supplied_csr_is_returned_verbatim() {
        let mut request = CertificateRequest::from_csr_pem(PRESUPPLIED);
        request.common_name = Some("ignored.example.com".to_owned());
        request.organization = Some("Ignored".to_owned());
        assert_eq!(request.csr().unwrap(), PRESUPPLIED);
        assert!(!request.has_private_key());
    }

    #[test]
    fn supplied_key_is_used_for_the_csr() {
        let key = KeyType::Rsa(1024).generate().unwrap();
        let expected = key.private_key_to_pem_pkcs8().unwrap();

        let request = CertificateRequest::new("own-key.example.com");
        request.set_private_key(key).unwrap();
        request.csr().unwrap();
        assert_eq!(
            request.private_key().unwrap().private_key_to_pem_pkcs8().unwrap(),
            expected
        );

        let another = KeyType::Rsa(1024).generate().unwrap();
        assert!(request.set_private_key(another).is_err());
    }

    #[test]
    fn object_name_falls_back_to_common_name() {
        let mut request = CertificateRequest::new("fallback.example.com");
        assert_eq!(request.object_name(), Some("fallback.example.com"));
        request.friendly_name = Some("friendly".to_owned());
        assert_eq!(request.object_name(), Some("friendly"));
    }

    #[test]
    fn zone_defaults_never_overwrite_caller_values() {
        let zone = ZoneConfiguration {
            country: Some(CertField::new("US", true)),
            province: Some(CertField::new("Utah", false)),
            locality: None,
            organization: Some(CertField::new("Zone Corp", true)),
            organizational_unit: None,
            key_type: KeyType::Ecdsa(Curve::P521),
        };

        let mut request = CertificateRequest::new("zoned.example.com");
        request.organization = Some("Caller Corp".to_owned());
        request.update_from_zone_config(&zone);

        assert_eq!(request.organization.as_deref(), Some("Caller Corp"));
        assert_eq!(request.country.as_deref(), Some("US"));
        assert_eq!(request.province.as_deref(), Some("Utah"));
        assert_eq!(request.locality, None);
        assert_eq!(request.resolved_key_type(), KeyType::Ecdsa(Curve::P521));
    }
}
