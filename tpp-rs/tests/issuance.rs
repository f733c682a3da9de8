//! End-to-end issuance flow, short of the network: compile a zone policy,
//! pre-fill and validate a request, and generate the CSR the transport
//! layer would submit.

use std::sync::Arc;

use openssl::nid::Nid;
use openssl::x509::X509Req;

use tpp_rs::csr::has_extension_attribute;
use tpp_rs::policy::{LockedField, LockedList, LockedSize};
use tpp_rs::{
    CertificateRequest, Curve, KeyType, Policy, PolicyField, ZoneConfiguration,
    ZonePolicyDocument,
};

fn zone_document() -> ZonePolicyDocument {
    let mut doc = ZonePolicyDocument::default();
    doc.subject.organization = LockedField {
        locked: true,
        value: Some("Example Corp".to_owned()),
    };
    doc.subject.organizational_unit = LockedList {
        locked: false,
        values: vec!["DevOps".to_owned()],
    };
    doc.subject.country = LockedField {
        locked: true,
        value: Some("US".to_owned()),
    };
    doc.subject.state = LockedField {
        locked: false,
        value: Some("Utah".to_owned()),
    };
    doc.whitelisted_domains = vec!["example.com".to_owned()];
    doc.subj_alt_name_dns_allowed = true;
    doc.key_pair.key_algorithm = LockedField {
        locked: true,
        value: Some("RSA".to_owned()),
    };
    doc.key_pair.key_size = LockedSize {
        locked: true,
        value: Some(1024),
    };
    doc
}

#[test]
fn zone_policy_drives_a_full_local_issuance_flow() {
    let doc = zone_document();
    let policy = Policy::compile(&doc).unwrap();
    let zone = ZoneConfiguration::from_document(&doc).unwrap();

    let mut request = CertificateRequest::new("web01.example.com");
    request.san_dns = vec![
        "web01.example.com".to_owned(),
        "www.web01.example.com".to_owned(),
    ];
    request.update_from_zone_config(&zone);

    assert_eq!(request.organization.as_deref(), Some("Example Corp"));
    assert_eq!(request.country.as_deref(), Some("US"));
    assert_eq!(request.resolved_key_type(), KeyType::Rsa(1024));

    let report = policy.enforce(&request).unwrap();
    assert!(report.passed());

    let pem = request.csr().unwrap();
    let req = X509Req::from_pem(pem.as_bytes()).unwrap();
    assert!(req.verify(request.private_key().unwrap()).unwrap());
    assert!(has_extension_attribute(&req, Nid::EXT_REQ));
    assert!(has_extension_attribute(&req, Nid::MS_EXT_REQ));
}

#[test]
fn off_zone_requests_are_stopped_before_submission() {
    let policy = Policy::compile(&zone_document()).unwrap();

    let mut request = CertificateRequest::new("web01.example.org");
    request.organization = Some("Example Corp".to_owned());
    request.country = Some("US".to_owned());
    request.key_type = Some(KeyType::Ecdsa(Curve::P256));

    let report = policy.check_request(&request);
    assert!(!report.passed());
    assert_eq!(
        report.violations(),
        [PolicyField::CommonName, PolicyField::KeyType]
    );
}

#[test]
fn enforcement_outcome_is_stable_across_threads() {
    let policy = Arc::new(Policy::compile(&zone_document()).unwrap());

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let policy = Arc::clone(&policy);
            scope.spawn(move || {
                let mut request =
                    CertificateRequest::new(format!("worker{worker}.example.com"));
                request.organization = Some("Example Corp".to_owned());
                request.country = Some("US".to_owned());
                request.key_type = Some(KeyType::Rsa(1024));
                assert!(policy.check_request(&request).passed());

                request.country = Some("DE".to_owned());
                assert_eq!(
                    policy.check_request(&request).violations(),
                    [PolicyField::Country]
                );
            });
        }
    });
}

#[test]
fn concurrent_key_access_yields_one_key() {
    let request = Arc::new(CertificateRequest::new("shared.example.com"));

    let pems: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let request = Arc::clone(&request);
                scope.spawn(move || request.private_key_pem().unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(pems.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(request.private_key_pem().unwrap(), pems[0]);
}
