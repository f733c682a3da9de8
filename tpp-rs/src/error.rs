use openssl::error::ErrorStack;

/// Result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors reported by this crate.
///
/// `Validation` is the one kind a caller is expected to recover from: the
/// request can be edited and checked again. Everything else propagates
/// unchanged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A request or zone setting the platform cannot act on: missing
    /// common name, unsupported algorithm or curve, empty zone, ...
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Key-pair generation failed.
    #[error("key generation failed: {0}")]
    Key(#[source] ErrorStack),

    /// The request violates the compiled zone policy. Carries the name of
    /// every offending field.
    #[error("request violates zone policy: {}", .fields.join(", "))]
    Validation { fields: Vec<String> },

    #[error(transparent)]
    Ssl(#[from] ErrorStack),

    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The platform answered with an error status or error payload.
    #[error("platform error: {0}")]
    Platform(String),

    /// The platform answered successfully but the payload was unusable.
    #[error("malformed platform response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_field() {
        let err = Error::Validation {
            fields: vec!["CN".to_owned(), "keyType".to_owned()],
        };
        assert_eq!(
            err.to_string(),
            "request violates zone policy: CN, keyType"
        );
    }
}
