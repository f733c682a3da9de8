//! Synchronous connector for the platform's `vedsdk` web API.
//!
//! Handles URL normalization, API-key authentication with expiry-driven
//! refresh, certificate enrollment and retrieval, and zone policy lookup.
//! Chain validation, revocation and TLS tuning are out of scope here.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use openssl::x509::X509;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::policy::{Policy, ZoneConfiguration, ZonePolicyDocument};
use crate::request::CertificateRequest;

const URL_AUTHORIZE: &str = "authorize/";
const URL_CERTIFICATE_REQUESTS: &str = "certificates/request";
const URL_CERTIFICATE_RETRIEVE: &str = "certificates/retrieve";
const URL_CHECK_POLICY: &str = "certificates/checkpolicy";
const TOKEN_HEADER: &str = "x-venafi-api-key";
const POLICY_ROOT: &str = r"\VED\Policy";

/// An issued certificate as handed back by the platform: leaf PEM, issuer
/// chain with the leaf-adjacent certificate first, and the private key when
/// one is available on this side.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub cert: String,
    pub chain: Vec<String>,
    pub private_key: Option<String>,
}

struct ApiKey {
    key: String,
    valid_until: SystemTime,
}

/// A connection to one platform instance, authenticated as one user.
///
/// The API key is fetched lazily and refreshed when expired; all calls are
/// blocking.
pub struct TppClient {
    base: Url,
    user: String,
    password: String,
    http: reqwest::blocking::Client,
    token: Mutex<Option<ApiKey>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    #[serde(rename = "APIKey")]
    api_key: String,
    #[serde(rename = "ValidUntil")]
    valid_until: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EnrollmentRequest<'a> {
    #[serde(rename = "PolicyDN")]
    policy_dn: String,
    #[serde(rename = "PKCS10")]
    pkcs10: &'a str,
    object_name: &'a str,
    disable_automatic_renewal: &'a str,
}

#[derive(Deserialize)]
struct EnrollmentResponse {
    #[serde(rename = "CertificateDN")]
    certificate_dn: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RetrieveRequest {
    #[serde(rename = "CertificateDN")]
    certificate_dn: String,
    format: &'static str,
    include_chain: &'static str,
    root_first_order: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RetrieveResponse {
    certificate_data: Option<String>,
}

#[derive(Serialize)]
struct CheckPolicyRequest {
    #[serde(rename = "PolicyDN")]
    policy_dn: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CheckPolicyResponse {
    error: Option<String>,
    policy: Option<ZonePolicyDocument>,
}

impl TppClient {
    pub fn new(url: &str, user: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let base = normalize_url(url)?;
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(TppClient {
            base,
            user: user.into(),
            password: password.into(),
            http,
            token: Mutex::new(None),
        })
    }

    /// Submit a request for signing. On success the platform identifier is
    /// stored on the request for later retrieval.
    pub fn request_certificate(
        &self,
        zone: &str,
        request: &mut CertificateRequest,
    ) -> Result<()> {
        let object_name = request.object_name().ok_or_else(|| {
            Error::Configuration("a friendly name or common name is required".to_owned())
        })?;
        let body = EnrollmentRequest {
            policy_dn: policy_dn(zone)?,
            pkcs10: request.csr()?,
            object_name,
            disable_automatic_renewal: "true",
        };
        let response = self.post(URL_CERTIFICATE_REQUESTS, &body)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            warn!("certificate request in zone {zone} rejected with status {status}");
            return Err(Error::Platform(format!(
                "certificate request failed with status {status}: {detail}"
            )));
        }
        let parsed: EnrollmentResponse = parse_json(response)?;
        debug!("certificate request accepted as {}", parsed.certificate_dn);
        request.set_id(parsed.certificate_dn);
        Ok(())
    }

    /// Fetch the issued certificate for a submitted request. Returns
    /// `Ok(None)` while issuance is still pending. When the platform does
    /// not return a private key and the request holds one, that key is
    /// attached to the result.
    pub fn retrieve_certificate(
        &self,
        request: &CertificateRequest,
    ) -> Result<Option<Certificate>> {
        let id = request
            .id()
            .ok_or_else(|| Error::Configuration("request has not been submitted".to_owned()))?;
        let body = RetrieveRequest {
            certificate_dn: id.to_owned(),
            format: "base64",
            include_chain: "true",
            root_first_order: "false",
        };
        let response = self.post(URL_CERTIFICATE_RETRIEVE, &body)?;
        if !response.status().is_success() {
            debug!("certificate {id} not ready (status {})", response.status());
            return Ok(None);
        }
        let parsed: RetrieveResponse = parse_json(response)?;
        let data = parsed.certificate_data.ok_or_else(|| {
            Error::InvalidResponse("retrieve response carried no certificate data".to_owned())
        })?;
        let bundle = base64::decode(data.split_whitespace().collect::<String>())
            .map_err(|err| {
                Error::InvalidResponse(format!("certificate data is not valid base64: {err}"))
            })?;
        let mut certificate = parse_cert_bundle(&bundle)?;
        if certificate.private_key.is_none() && request.has_private_key() {
            certificate.private_key = Some(request.private_key_pem()?);
        }
        Ok(Some(certificate))
    }

    /// Compile the zone's policy into matching rules.
    pub fn read_policy(&self, zone: &str) -> Result<Policy> {
        let doc = self.check_policy(zone)?;
        Policy::compile(&doc)
    }

    /// Extract the zone's default values for pre-filling requests.
    pub fn read_zone_configuration(&self, zone: &str) -> Result<ZoneConfiguration> {
        let doc = self.check_policy(zone)?;
        ZoneConfiguration::from_document(&doc)
    }

    fn check_policy(&self, zone: &str) -> Result<ZonePolicyDocument> {
        let dn = policy_dn(zone)?;
        let body = CheckPolicyRequest {
            policy_dn: dn.clone(),
        };
        let response = self.post(URL_CHECK_POLICY, &body)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Platform(format!(
                "policy lookup for {dn} failed with status {status}"
            )));
        }
        let parsed: CheckPolicyResponse = parse_json(response)?;
        if let Some(error) = parsed.error {
            return Err(Error::Platform(error));
        }
        let mut doc = parsed.policy.ok_or_else(|| {
            Error::InvalidResponse("policy response carried no policy".to_owned())
        })?;
        doc.id = Some(dn);
        doc.name = Some(zone.to_owned());
        Ok(doc)
    }

    fn post(&self, path: &str, body: &impl Serialize) -> Result<reqwest::blocking::Response> {
        let key = self.api_key()?;
        let url = self.base.join(path)?;
        Ok(self
            .http
            .post(url)
            .header(TOKEN_HEADER, key)
            .json(body)
            .send()?)
    }

    fn api_key(&self) -> Result<String> {
        let mut guard = self.token.lock().unwrap();
        match guard.as_ref() {
            Some(token) if token.valid_until > SystemTime::now() => Ok(token.key.clone()),
            _ => {
                let token = self.authenticate()?;
                let key = token.key.clone();
                *guard = Some(token);
                Ok(key)
            }
        }
    }

    fn authenticate(&self) -> Result<ApiKey> {
        debug!("authenticating against {}", self.base);
        let url = self.base.join(URL_AUTHORIZE)?;
        let body = AuthRequest {
            username: &self.user,
            password: &self.password,
        };
        let response = self.http.post(url).json(&body).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Platform(format!(
                "authentication failed with status {status}"
            )));
        }
        let auth: AuthResponse = parse_json(response)?;
        let valid_until = match auth.valid_until.as_deref() {
            Some(raw) => parse_dotnet_date(raw)?,
            // Conservative fallback: re-authenticate on the next call.
            None => SystemTime::now(),
        };
        Ok(ApiKey {
            key: auth.api_key,
            valid_until,
        })
    }
}

fn parse_json<T: DeserializeOwned>(response: reqwest::blocking::Response) -> Result<T> {
    let text = response.text()?;
    serde_json::from_str(&text)
        .map_err(|err| Error::InvalidResponse(format!("unexpected payload: {err}")))
}

/// Qualify a zone tag into a policy DN. Already qualified DNs pass through.
fn policy_dn(zone: &str) -> Result<String> {
    if zone.is_empty() {
        return Err(Error::Configuration("zone cannot be empty".to_owned()));
    }
    if zone.starts_with(POLICY_ROOT) {
        Ok(zone.to_owned())
    } else if zone.starts_with('\\') {
        Ok(format!("{POLICY_ROOT}{zone}"))
    } else {
        Ok(format!("{POLICY_ROOT}\\{zone}"))
    }
}

/// Force https, require a host, and make sure the path ends in `/vedsdk/`.
fn normalize_url(raw: &str) -> Result<Url> {
    let mut url = if let Some(rest) = raw.strip_prefix("http://") {
        format!("https://{rest}")
    } else if raw.starts_with("https://") {
        raw.to_owned()
    } else {
        format!("https://{raw}")
    };
    if !url.ends_with('/') {
        url.push('/');
    }
    if !url.ends_with("/vedsdk/") {
        url.push_str("vedsdk/");
    }
    let url = Url::parse(&url)?;
    if url.host_str().is_none() {
        return Err(Error::Configuration(format!(
            "invalid platform URL '{raw}'"
        )));
    }
    Ok(url)
}

/// The platform's `/Date(millis)/` timestamps.
fn parse_dotnet_date(raw: &str) -> Result<SystemTime> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let millis: u64 = digits
        .parse()
        .map_err(|_| Error::InvalidResponse(format!("unparsable expiry '{raw}'")))?;
    Ok(UNIX_EPOCH + Duration::from_millis(millis))
}

/// Split a PEM bundle into leaf and chain, leaf first.
fn parse_cert_bundle(pem: &[u8]) -> Result<Certificate> {
    let stack = X509::stack_from_pem(pem)?;
    let mut certs = stack.into_iter();
    let leaf = certs.next().ok_or_else(|| {
        Error::InvalidResponse("certificate data contained no certificates".to_owned())
    })?;
    let cert = String::from_utf8_lossy(&leaf.to_pem()?).into_owned();
    let chain = certs
        .map(|cert| {
            cert.to_pem()
                .map(|pem| String::from_utf8_lossy(&pem).into_owned())
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Certificate {
        cert,
        chain,
        private_key: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_tags_are_qualified_into_policy_dns() {
        assert_eq!(policy_dn("Default").unwrap(), r"\VED\Policy\Default");
        assert_eq!(
            policy_dn(r"\Certs\Web").unwrap(),
            r"\VED\Policy\Certs\Web"
        );
        assert_eq!(
            policy_dn(r"\VED\Policy\Certs").unwrap(),
            r"\VED\Policy\Certs"
        );
        assert!(matches!(policy_dn(""), Err(Error::Configuration(_))));
    }

    #[test]
    fn urls_are_normalized_to_https_vedsdk() {
        for raw in [
            "tpp.example.com",
            "http://tpp.example.com",
            "https://tpp.example.com",
            "https://tpp.example.com/",
            "https://tpp.example.com/vedsdk/",
        ] {
            let url = normalize_url(raw).unwrap();
            assert_eq!(url.as_str(), "https://tpp.example.com/vedsdk/", "raw {raw:?}");
        }
        let url = normalize_url("tpp.example.com:8443").unwrap();
        assert_eq!(url.as_str(), "https://tpp.example.com:8443/vedsdk/");
    }

    #[test]
    fn dotnet_dates_parse_to_epoch_millis() {
        let time = parse_dotnet_date("/Date(1532012749000)/").unwrap();
        assert_eq!(
            time.duration_since(UNIX_EPOCH).unwrap(),
            Duration::from_millis(1_532_012_749_000)
        );
        assert!(parse_dotnet_date("/Date()/").is_err());
    }

    #[test]
    fn checkpolicy_payload_deserializes() {
        let payload = serde_json::json!({
            "Error": null,
            "Policy": {
                "Subject": {
                    "Organization": {"Locked": true, "Value": "Example Corp"},
                    "OrganizationalUnit": {"Locked": false, "Values": ["DevOps"]},
                    "City": {"Locked": false, "Value": "Salt Lake City"},
                    "State": {"Locked": false, "Value": "Utah"},
                    "Country": {"Locked": true, "Value": "US"}
                },
                "KeyPair": {
                    "KeyAlgorithm": {"Locked": true, "Value": "ECC"},
                    "KeySize": {"Locked": false, "Value": 2048},
                    "EllipticCurve": {"Locked": true, "Value": "P256"}
                },
                "WhitelistedDomains": ["example.com"],
                "WildcardsAllowed": true,
                "SubjAltNameDnsAllowed": true,
                "SubjAltNameIpAllowed": false,
                "SubjAltNameEmailAllowed": false,
                "SubjAltNameUriAllowed": false,
                "SubjAltNameUpnAllowed": false,
                "UniqueSubjectEnforced": false
            }
        });
        let parsed: CheckPolicyResponse = serde_json::from_value(payload).unwrap();
        assert!(parsed.error.is_none());
        let doc = parsed.policy.unwrap();
        assert!(doc.subject.organization.locked);
        assert_eq!(doc.subject.organization.value.as_deref(), Some("Example Corp"));
        assert_eq!(doc.whitelisted_domains, ["example.com"]);
        assert!(doc.wildcards_allowed);
        assert!(doc.subj_alt_name_dns_allowed);
        assert_eq!(doc.key_pair.elliptic_curve.value.as_deref(), Some("P256"));
    }
}
