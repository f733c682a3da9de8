//! PKCS#10 certificate signing request assembly.
//!
//! Requests are built with the OpenSSL request builder. When SAN entries
//! are present the subjectAltName extension is attached twice: once under
//! the PKCS#9 `extensionRequest` attribute and once under the Microsoft
//! `msExtReq` attribute. Some issuing CAs only honor one of the two, so
//! both must be present for the SANs to survive issuance everywhere.

use foreign_types::{ForeignType, ForeignTypeRef};
use libc::c_int;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{HasPrivate, PKeyRef, Private};
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509Extension, X509Name, X509Req, X509ReqRef};
use openssl_sys as ffi;

use crate::error::Result;

// Not exposed by the safe wrapper, which only emits the PKCS#9 attribute.
extern "C" {
    fn X509_REQ_add_extensions_nid(
        req: *mut ffi::X509_REQ,
        exts: *mut ffi::stack_st_X509_EXTENSION,
        nid: c_int,
    ) -> c_int;

    fn X509_REQ_get_attr_by_NID(req: *const ffi::X509_REQ, nid: c_int, lastpos: c_int) -> c_int;
}

/// Subject attributes of a request, in the order they are emitted into the
/// distinguished name.
#[derive(Debug, Clone, Default)]
pub struct Subject {
    pub common_name: String,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    pub country: Option<String>,
    pub province: Option<String>,
    pub locality: Option<String>,
}

/// Build a signed PKCS#10 request and return it as PEM text.
///
/// The subject is emitted in the fixed order CN, O, OU, C, ST, L; unset and
/// empty attributes are omitted. The request carries the legacy version 0
/// tag. The key's public half lands in the request, the private half signs
/// it with `digest`.
pub fn build_csr(
    subject: &Subject,
    san_dns: &[String],
    key: &PKeyRef<Private>,
    digest: MessageDigest,
) -> Result<String> {
    let mut name = X509Name::builder()?;
    name.append_entry_by_text("CN", &subject.common_name)?;
    for (field, value) in [
        ("O", &subject.organization),
        ("OU", &subject.organizational_unit),
        ("C", &subject.country),
        ("ST", &subject.province),
        ("L", &subject.locality),
    ] {
        if let Some(value) = value {
            if !value.is_empty() {
                name.append_entry_by_text(field, value)?;
            }
        }
    }
    let name = name.build();

    let mut builder = X509Req::builder()?;
    builder.set_version(0)?;
    builder.set_subject_name(&name)?;
    builder.set_pubkey(key)?;

    let san_dns: Vec<&str> = san_dns
        .iter()
        .map(String::as_str)
        .filter(|entry| !entry.is_empty())
        .collect();
    if san_dns.is_empty() {
        builder.sign(key, digest)?;
        return pem(&builder.build());
    }

    let mut extensions = Stack::new()?;
    {
        let context = builder.x509v3_context(None);
        let mut alt_names = SubjectAlternativeName::new();
        for entry in &san_dns {
            alt_names.dns(entry);
        }
        extensions.push(alt_names.build(&context)?)?;
    }
    builder.add_extensions(&extensions)?;

    // The builder's signing API is not usable here: the legacy attribute
    // has to go in before the signature, and the builder only adds the
    // PKCS#9 one. Finish the request by hand.
    let req = builder.build();
    add_extensions_under(&req, &extensions, Nid::MS_EXT_REQ)?;
    sign(&req, key, digest)?;
    pem(&req)
}

/// Whether `req` carries an extension-request attribute under `nid`.
///
/// Useful to confirm a request is acceptable to CAs that only read the
/// PKCS#9 `extensionRequest` or only the Microsoft `msExtReq` attribute.
pub fn has_extension_attribute(req: &X509ReqRef, nid: Nid) -> bool {
    unsafe { X509_REQ_get_attr_by_NID(req.as_ptr(), nid.as_raw(), -1) >= 0 }
}

fn add_extensions_under(
    req: &X509Req,
    extensions: &Stack<X509Extension>,
    nid: Nid,
) -> Result<()> {
    let rc =
        unsafe { X509_REQ_add_extensions_nid(req.as_ptr(), extensions.as_ptr(), nid.as_raw()) };
    if rc != 1 {
        return Err(ErrorStack::get().into());
    }
    Ok(())
}

fn sign<T: HasPrivate>(req: &X509Req, key: &PKeyRef<T>, digest: MessageDigest) -> Result<()> {
    let rc = unsafe { ffi::X509_REQ_sign(req.as_ptr(), key.as_ptr(), digest.as_ptr()) };
    if rc <= 0 {
        return Err(ErrorStack::get().into());
    }
    Ok(())
}

fn pem(req: &X509Req) -> Result<String> {
    let pem = req.to_pem()?;
    Ok(String::from_utf8_lossy(&pem).into_owned())
}
