//! Input validation for registry fields.
//!
//! Machine names, owners and local users share one identifier rule; public
//! keys must be a single-line OpenSSH key of a recognised algorithm.

use std::sync::LazyLock;

use regex::Regex;

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").expect("static regex is valid")
});

/// Maximum accepted length of a trimmed public key, in bytes.
pub const MAX_PUBLIC_KEY_LEN: usize = 2048;

/// Key algorithms accepted in the first field of a public key line.
pub const SUPPORTED_KEY_TYPES: &[&str] = &[
    "ssh-rsa",
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "ssh-dss",
];

/// Reasons an input is rejected before it reaches storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error(
        "invalid {0}: must start with a letter or digit and contain only letters, digits, dots, hyphens and underscores (max 64 chars)"
    )]
    InvalidIdentifier(&'static str),

    #[error("public key must be a single line")]
    MultiLineKey,

    #[error("public key too large ({0} bytes, max {MAX_PUBLIC_KEY_LEN})")]
    KeyTooLarge(usize),

    #[error("invalid SSH public key format")]
    MalformedKey,

    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),
}

/// Check `value` against the identifier rule. `field` names the input in
/// the error message (`"machine name"`, `"owner"`, `"local_user"`).
pub fn validate_identifier(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Missing(field));
    }
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier(field))
    }
}

/// Validate an OpenSSH public key and return it trimmed.
pub fn validate_public_key(key: &str) -> Result<&str, ValidationError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ValidationError::Missing("public_key"));
    }
    if key.contains(['\n', '\r']) {
        return Err(ValidationError::MultiLineKey);
    }
    if key.len() > MAX_PUBLIC_KEY_LEN {
        return Err(ValidationError::KeyTooLarge(key.len()));
    }

    let mut fields = key.split_whitespace();
    let (Some(key_type), Some(_blob)) = (fields.next(), fields.next()) else {
        return Err(ValidationError::MalformedKey);
    };
    if !SUPPORTED_KEY_TYPES.contains(&key_type) {
        return Err(ValidationError::UnsupportedKeyType(key_type.to_string()));
    }
    Ok(key)
}
