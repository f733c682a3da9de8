//! Zone policy: the raw platform document, the compiled rule sets used to
//! validate requests before submission, and the zone's default values.
//!
//! A zone document answers two different questions and this module keeps
//! the answers separate: `Policy` compiles the document into matching
//! rules (what the platform will accept), `ZoneConfiguration` extracts the
//! document's default values (what the platform will fill in). Both are
//! derived independently from the same document.

use std::fmt;

use log::info;
use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::key::{Curve, KeyType};
use crate::request::CertificateRequest;

/// A subject field carrying a `Locked` flag and a single value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct LockedField {
    pub locked: bool,
    pub value: Option<String>,
}

/// A subject field carrying a `Locked` flag and a list of values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct LockedList {
    pub locked: bool,
    pub values: Vec<String>,
}

/// A numeric field carrying a `Locked` flag.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct LockedSize {
    pub locked: bool,
    pub value: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SubjectPolicy {
    pub organization: LockedField,
    pub organizational_unit: LockedList,
    pub city: LockedField,
    pub state: LockedField,
    pub country: LockedField,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct KeyPairPolicy {
    /// `RSA` or `ECC`.
    pub key_algorithm: LockedField,
    pub key_size: LockedSize,
    /// Platform short name, e.g. `P256`.
    pub elliptic_curve: LockedField,
}

/// The zone policy document as returned by `certificates/checkpolicy`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ZonePolicyDocument {
    /// Filled in by the client from the queried policy DN; not part of the
    /// wire payload.
    pub id: Option<String>,
    /// Filled in by the client from the zone tag; not part of the wire
    /// payload.
    pub name: Option<String>,
    pub subject: SubjectPolicy,
    pub key_pair: KeyPairPolicy,
    pub whitelisted_domains: Vec<String>,
    pub wildcards_allowed: bool,
    pub subj_alt_name_dns_allowed: bool,
    pub subj_alt_name_ip_allowed: bool,
    pub subj_alt_name_email_allowed: bool,
    pub subj_alt_name_uri_allowed: bool,
    pub subj_alt_name_upn_allowed: bool,
}

/// The fields a policy check can flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyField {
    CommonName,
    Organization,
    OrganizationalUnit,
    Country,
    Province,
    Locality,
    SanDns,
    KeyType,
}

impl PolicyField {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyField::CommonName => "CN",
            PolicyField::Organization => "O",
            PolicyField::OrganizationalUnit => "OU",
            PolicyField::Country => "C",
            PolicyField::Province => "ST",
            PolicyField::Locality => "L",
            PolicyField::SanDns => "SAN",
            PolicyField::KeyType => "keyType",
        }
    }
}

impl fmt::Display for PolicyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of checking a request against a policy.
///
/// `violations` are hard failures the platform would reject or silently
/// mangle. `advisories` flag locked fields the request leaves unset: the
/// platform will fill those in on its own, which is worth surfacing but
/// not failing on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    violations: Vec<PolicyField>,
    advisories: Vec<PolicyField>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[PolicyField] {
        &self.violations
    }

    pub fn advisories(&self) -> &[PolicyField] {
        &self.advisories
    }
}

const ALLOW_ANY: &str = "^.*$";

/// An ordered set of anchored patterns; a value passes if any one matches.
#[derive(Debug, Clone, Default)]
struct RuleSet {
    rules: Vec<Regex>,
}

impl RuleSet {
    fn compile(patterns: impl IntoIterator<Item = String>) -> Result<Self> {
        let rules = patterns
            .into_iter()
            .map(|pattern| {
                Regex::new(&pattern).map_err(|err| {
                    Error::Configuration(format!("invalid policy pattern '{pattern}': {err}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RuleSet { rules })
    }

    fn allow_any() -> Result<Self> {
        RuleSet::compile([ALLOW_ANY.to_owned()])
    }

    fn matches(&self, value: &str) -> bool {
        self.rules.iter().any(|rule| rule.is_match(value))
    }

    fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// An absent value only passes a rule set that allows anything.
    fn allows_absent(&self) -> bool {
        self.rules.iter().any(|rule| rule.as_str() == ALLOW_ANY)
    }
}

/// Anchor a pattern at both ends, leaving already present anchors alone.
fn anchored(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    if !pattern.starts_with('^') {
        out.push('^');
    }
    out.push_str(pattern);
    if !pattern.ends_with('$') {
        out.push('$');
    }
    out
}

/// An anchored pattern matching exactly `value`.
fn literal(value: &str) -> String {
    anchored(&regex::escape(value))
}

/// An anchored pattern matching `<prefix>.<domain>` where the prefix is
/// drawn from `prefix_class`.
fn domain_pattern(domain: &str, prefix_class: &str) -> String {
    anchored(&format!(
        "{prefix_class}{}",
        regex::escape(&format!(".{domain}"))
    ))
}

fn scalar_rules(field: &LockedField) -> Result<RuleSet> {
    if field.locked {
        if let Some(value) = &field.value {
            return RuleSet::compile([literal(value)]);
        }
    }
    RuleSet::allow_any()
}

fn list_rules(field: &LockedList) -> Result<RuleSet> {
    if field.locked && !field.values.is_empty() {
        return RuleSet::compile(field.values.iter().map(|value| literal(value)));
    }
    RuleSet::allow_any()
}

fn common_name_rules(doc: &ZonePolicyDocument) -> Result<RuleSet> {
    if doc.whitelisted_domains.is_empty() {
        return RuleSet::allow_any();
    }
    let prefix = if doc.wildcards_allowed {
        r"[\w.*-]+"
    } else {
        r"[\w.-]+"
    };
    RuleSet::compile(
        doc.whitelisted_domains
            .iter()
            .map(|domain| domain_pattern(domain, prefix)),
    )
}

fn san_dns_rules(doc: &ZonePolicyDocument) -> Result<RuleSet> {
    if !doc.subj_alt_name_dns_allowed {
        // Empty set: a request carrying any DNS SAN fails.
        return Ok(RuleSet::default());
    }
    if doc.whitelisted_domains.is_empty() {
        return RuleSet::allow_any();
    }
    RuleSet::compile(
        doc.whitelisted_domains
            .iter()
            .map(|domain| domain_pattern(domain, r"[\w.-]+")),
    )
}

fn boolean_rules(allowed: bool) -> Result<RuleSet> {
    if allowed {
        RuleSet::allow_any()
    } else {
        Ok(RuleSet::default())
    }
}

fn allowed_key_types(key_pair: &KeyPairPolicy) -> Result<Vec<KeyType>> {
    if !key_pair.key_algorithm.locked {
        let mut all = KeyType::all_rsa();
        all.extend(KeyType::all_ecdsa());
        return Ok(all);
    }
    let algorithm = key_pair
        .key_algorithm
        .value
        .as_deref()
        .map(str::to_ascii_lowercase);
    match algorithm.as_deref() {
        Some("rsa") => match key_pair.key_size {
            LockedSize {
                locked: true,
                value: Some(size),
            } => Ok(vec![KeyType::Rsa(size)]),
            _ => Ok(KeyType::all_rsa()),
        },
        Some("ec") | Some("ecc") | Some("ecdsa") => {
            if key_pair.elliptic_curve.locked {
                if let Some(curve) = &key_pair.elliptic_curve.value {
                    return Ok(vec![KeyType::Ecdsa(Curve::from_name(curve)?)]);
                }
            }
            Ok(KeyType::all_ecdsa())
        }
        Some(other) => Err(Error::Configuration(format!(
            "unsupported key algorithm '{other}' in zone policy"
        ))),
        // Locked but without a value pins nothing.
        None => {
            let mut all = KeyType::all_rsa();
            all.extend(KeyType::all_ecdsa());
            Ok(all)
        }
    }
}

/// SAN kinds the platform distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanKind {
    Dns,
    Ip,
    Email,
    Uri,
    Upn,
}

/// A compiled zone policy. Immutable once compiled; checking requests
/// against it is pure and safe from any number of threads.
#[derive(Debug, Clone)]
pub struct Policy {
    pub id: Option<String>,
    pub name: Option<String>,
    subject_cn: RuleSet,
    subject_o: RuleSet,
    subject_ou: RuleSet,
    subject_st: RuleSet,
    subject_l: RuleSet,
    subject_c: RuleSet,
    san_dns: RuleSet,
    san_ip: RuleSet,
    san_email: RuleSet,
    san_uri: RuleSet,
    san_upn: RuleSet,
    key_types: Vec<KeyType>,
}

impl Policy {
    /// Compile a zone policy document into matching rules.
    pub fn compile(doc: &ZonePolicyDocument) -> Result<Self> {
        Ok(Policy {
            id: doc.id.clone(),
            name: doc.name.clone(),
            subject_cn: common_name_rules(doc)?,
            subject_o: scalar_rules(&doc.subject.organization)?,
            subject_ou: list_rules(&doc.subject.organizational_unit)?,
            subject_st: scalar_rules(&doc.subject.state)?,
            subject_l: scalar_rules(&doc.subject.city)?,
            subject_c: scalar_rules(&doc.subject.country)?,
            san_dns: san_dns_rules(doc)?,
            san_ip: boolean_rules(doc.subj_alt_name_ip_allowed)?,
            san_email: boolean_rules(doc.subj_alt_name_email_allowed)?,
            san_uri: boolean_rules(doc.subj_alt_name_uri_allowed)?,
            san_upn: boolean_rules(doc.subj_alt_name_upn_allowed)?,
            key_types: allowed_key_types(&doc.key_pair)?,
        })
    }

    /// The enumerated key shapes this zone accepts.
    pub fn key_types(&self) -> &[KeyType] {
        &self.key_types
    }

    /// Whether the zone permits SANs of `kind` at all.
    ///
    /// Kinds other than DNS are allow/deny only for now; their rule sets
    /// carry no value matching.
    /// TODO: match IP/email/URI/UPN SAN values once the request model
    /// carries those kinds.
    pub fn san_kind_allowed(&self, kind: SanKind) -> bool {
        let rules = match kind {
            SanKind::Dns => &self.san_dns,
            SanKind::Ip => &self.san_ip,
            SanKind::Email => &self.san_email,
            SanKind::Uri => &self.san_uri,
            SanKind::Upn => &self.san_upn,
        };
        !rules.is_empty()
    }

    /// Check a request against the compiled rules. Pure; the outcome does
    /// not depend on evaluation order.
    pub fn check_request(&self, request: &CertificateRequest) -> CheckReport {
        let mut report = CheckReport::default();
        check_field(
            PolicyField::CommonName,
            request.common_name.as_deref(),
            &self.subject_cn,
            &mut report,
        );
        check_field(
            PolicyField::Organization,
            request.organization.as_deref(),
            &self.subject_o,
            &mut report,
        );
        check_field(
            PolicyField::OrganizationalUnit,
            request.organizational_unit.as_deref(),
            &self.subject_ou,
            &mut report,
        );
        check_field(
            PolicyField::Country,
            request.country.as_deref(),
            &self.subject_c,
            &mut report,
        );
        check_field(
            PolicyField::Province,
            request.province.as_deref(),
            &self.subject_st,
            &mut report,
        );
        check_field(
            PolicyField::Locality,
            request.locality.as_deref(),
            &self.subject_l,
            &mut report,
        );

        if request
            .san_dns
            .iter()
            .any(|entry| !self.san_dns.matches(entry))
        {
            report.violations.push(PolicyField::SanDns);
        }

        if !self.key_types.contains(&request.resolved_key_type()) {
            report.violations.push(PolicyField::KeyType);
        }

        report
    }

    /// Check a request and turn hard violations into a `Validation` error.
    /// Advisories are logged and returned with the passing report.
    pub fn enforce(&self, request: &CertificateRequest) -> Result<CheckReport> {
        let report = self.check_request(request);
        if !report.passed() {
            return Err(Error::Validation {
                fields: report
                    .violations()
                    .iter()
                    .map(|field| field.to_string())
                    .collect(),
            });
        }
        for field in report.advisories() {
            info!("zone locks {field}; the platform will apply its own value");
        }
        Ok(report)
    }
}

fn check_field(
    field: PolicyField,
    value: Option<&str>,
    rules: &RuleSet,
    report: &mut CheckReport,
) {
    match value {
        Some(value) => {
            if !rules.matches(value) {
                report.violations.push(field);
            }
        }
        None => {
            if !rules.allows_absent() {
                report.advisories.push(field);
            }
        }
    }
}

/// A zone default: the value the platform applies, and whether it is
/// locked against caller overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertField {
    value: String,
    locked: bool,
}

impl CertField {
    pub fn new(value: impl Into<String>, locked: bool) -> Self {
        CertField {
            value: value.into(),
            locked,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn locked(&self) -> bool {
        self.locked
    }
}

/// Default values a zone applies to requests that leave fields unset.
/// Extracted from the same document a `Policy` is compiled from, but used
/// only to pre-fill requests, never to validate them.
#[derive(Debug, Clone)]
pub struct ZoneConfiguration {
    pub country: Option<CertField>,
    pub province: Option<CertField>,
    pub locality: Option<CertField>,
    pub organization: Option<CertField>,
    pub organizational_unit: Option<CertField>,
    pub key_type: KeyType,
}

impl ZoneConfiguration {
    pub fn from_document(doc: &ZonePolicyDocument) -> Result<Self> {
        Ok(ZoneConfiguration {
            country: cert_field(&doc.subject.country),
            province: cert_field(&doc.subject.state),
            locality: cert_field(&doc.subject.city),
            organization: cert_field(&doc.subject.organization),
            organizational_unit: doc
                .subject
                .organizational_unit
                .values
                .first()
                .map(|value| CertField::new(value.clone(), doc.subject.organizational_unit.locked)),
            key_type: default_key_type(&doc.key_pair)?,
        })
    }
}

fn cert_field(field: &LockedField) -> Option<CertField> {
    field
        .value
        .as_ref()
        .map(|value| CertField::new(value.clone(), field.locked))
}

fn default_key_type(key_pair: &KeyPairPolicy) -> Result<KeyType> {
    KeyType::from_parts(
        key_pair.key_algorithm.value.as_deref().unwrap_or("rsa"),
        key_pair.key_size.value,
        key_pair.elliptic_curve.value.as_deref(),
    )
}
