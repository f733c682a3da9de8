//! Enroll a certificate against a live platform instance.
//!
//! Expects `TPP_URL`, `TPP_USER`, `TPP_PASSWORD` and optionally `TPP_ZONE`
//! in the environment.

use std::time::Duration;

use anyhow::Result;

use tpp_rs::{CertificateRequest, TppClient};

fn main() -> Result<()> {
    tpp_rs::init();

    let url = std::env::var("TPP_URL")?;
    let user = std::env::var("TPP_USER")?;
    let password = std::env::var("TPP_PASSWORD")?;
    let zone = std::env::var("TPP_ZONE").unwrap_or_else(|_| "Default".to_owned());

    let client = TppClient::new(&url, user, password)?;

    let mut request = CertificateRequest::new("demo.example.com");
    request.san_dns = vec![
        "demo.example.com".to_owned(),
        "www.demo.example.com".to_owned(),
    ];

    let zone_config = client.read_zone_configuration(&zone)?;
    request.update_from_zone_config(&zone_config);

    let policy = client.read_policy(&zone)?;
    policy.enforce(&request)?;

    client.request_certificate(&zone, &mut request)?;
    println!("submitted as {}", request.id().unwrap_or("<unknown>"));

    loop {
        match client.retrieve_certificate(&request)? {
            Some(certificate) => {
                println!("{}", certificate.cert);
                for issuer in &certificate.chain {
                    println!("{issuer}");
                }
                break;
            }
            None => std::thread::sleep(Duration::from_secs(5)),
        }
    }

    Ok(())
}
