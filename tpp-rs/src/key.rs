//! Key material: the algorithm/size pairs the platform understands and the
//! OpenSSL key generation behind them.

use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;

use crate::error::{Error, Result};

/// RSA modulus sizes accepted by the platform.
pub const RSA_SIZES: [u32; 4] = [1024, 2048, 4096, 8192];

/// Elliptic curves accepted by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    P224,
    P256,
    P384,
    P521,
}

/// Platform short names for the supported curves. The platform's naming
/// conventions evolve separately from OpenSSL's, so this stays a table.
const CURVE_SHORT_NAMES: [(&str, Curve); 4] = [
    ("p224", Curve::P224),
    ("p256", Curve::P256),
    ("p384", Curve::P384),
    ("p521", Curve::P521),
];

impl Curve {
    pub const ALL: [Curve; 4] = [Curve::P224, Curve::P256, Curve::P384, Curve::P521];

    /// Resolve a platform short name (`p256`) or a standard name
    /// (`prime256v1`) to a curve.
    pub fn from_name(name: &str) -> Result<Self> {
        let lowered = name.to_ascii_lowercase();
        CURVE_SHORT_NAMES
            .iter()
            .find(|(short, _)| *short == lowered)
            .map(|&(_, curve)| curve)
            .or_else(|| {
                Curve::ALL
                    .iter()
                    .copied()
                    .find(|curve| curve.standard_name() == lowered)
            })
            .ok_or_else(|| Error::Configuration(format!("unsupported elliptic curve '{name}'")))
    }

    /// The standard (OpenSSL) name of the curve.
    pub fn standard_name(self) -> &'static str {
        match self {
            Curve::P224 => "secp224r1",
            Curve::P256 => "prime256v1",
            Curve::P384 => "secp384r1",
            Curve::P521 => "secp521r1",
        }
    }

    fn nid(self) -> Nid {
        match self {
            Curve::P224 => Nid::SECP224R1,
            Curve::P256 => Nid::X9_62_PRIME256V1,
            Curve::P384 => Nid::SECP384R1,
            Curve::P521 => Nid::SECP521R1,
        }
    }
}

/// The shape of an asymmetric key: algorithm family plus modulus size or
/// curve. Two key types are equal iff both parts match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Rsa(u32),
    Ecdsa(Curve),
}

impl Default for KeyType {
    fn default() -> Self {
        KeyType::Rsa(2048)
    }
}

impl KeyType {
    /// Build a key type from the loose string form used in zone documents
    /// and request parameters.
    pub fn from_parts(algorithm: &str, size: Option<u32>, curve: Option<&str>) -> Result<Self> {
        match algorithm.to_ascii_lowercase().as_str() {
            "rsa" => Ok(KeyType::Rsa(size.unwrap_or(2048))),
            "ec" | "ecc" | "ecdsa" => {
                let curve = match curve {
                    Some(name) => Curve::from_name(name)?,
                    None => Curve::P256,
                };
                Ok(KeyType::Ecdsa(curve))
            }
            other => Err(Error::Configuration(format!(
                "unsupported key algorithm '{other}'"
            ))),
        }
    }

    /// Generate a fresh key pair of this shape. Never cached here; callers
    /// needing idempotence memoize the result (see `CertificateRequest`).
    pub fn generate(self) -> Result<PKey<Private>> {
        match self {
            KeyType::Rsa(bits) => {
                let rsa = Rsa::generate(bits).map_err(Error::Key)?;
                PKey::from_rsa(rsa).map_err(Error::Key)
            }
            KeyType::Ecdsa(curve) => {
                let group = EcGroup::from_curve_name(curve.nid()).map_err(Error::Key)?;
                let key = EcKey::generate(&group).map_err(Error::Key)?;
                PKey::from_ec_key(key).map_err(Error::Key)
            }
        }
    }

    /// Every RSA key type the platform accepts.
    pub fn all_rsa() -> Vec<KeyType> {
        RSA_SIZES.iter().map(|&bits| KeyType::Rsa(bits)).collect()
    }

    /// Every EC key type the platform accepts.
    pub fn all_ecdsa() -> Vec<KeyType> {
        Curve::ALL.iter().map(|&curve| KeyType::Ecdsa(curve)).collect()
    }
}
