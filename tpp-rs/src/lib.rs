//! Client library for a Venafi Trust Protection Platform instance.
//!
//! The pieces fit together like this: build a [`CertificateRequest`],
//! optionally pre-fill it from the zone's [`ZoneConfiguration`], check it
//! against the zone's compiled [`Policy`], then hand it to a [`TppClient`]
//! for enrollment and retrieval. Key pairs and the PKCS#10 request itself
//! are generated locally and lazily; the platform never sees a private key.

pub mod client;
pub mod csr;
pub mod error;
pub mod key;
pub mod logger;
pub mod policy;
pub mod request;

pub use client::{Certificate, TppClient};
pub use error::{Error, Result};
pub use key::{Curve, KeyType};
pub use policy::{
    CertField, CheckReport, Policy, PolicyField, SanKind, ZoneConfiguration, ZonePolicyDocument,
};
pub use request::CertificateRequest;

/// Initialize logging for binaries embedding this crate.
pub fn init() {
    logger::init("TPP_LOG", "info");
}
