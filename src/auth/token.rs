//! Token generation and hashing.
//!
//! Tokens are 32 bytes of CSPRNG entropy, URL-safe base64 encoded, carrying
//! a kind prefix (`tk_` for workspace API keys, `ses_` for browser
//! sessions). Because a token is a full-entropy 256-bit value, hashing is a
//! single unsalted SHA-256; the hex digest is what gets stored.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of leading characters stored for display next to a key.
const PREFIX_DISPLAY_LEN: usize = 11;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    ApiKey,
    Session,
}

impl TokenKind {
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::ApiKey => "tk_",
            Self::Session => "ses_",
        }
    }
}

/// Generate a fresh token. Returns `(raw_token, hash)`; the raw token is
/// shown to the caller exactly once and never stored.
#[must_use]
pub fn generate_token(kind: TokenKind) -> (String, String) {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let raw = format!("{}{}", kind.prefix(), URL_SAFE_NO_PAD.encode(bytes));
    let hash = hash_token(&raw);
    (raw, hash)
}

/// Hex SHA-256 of the full raw token (prefix included).
#[must_use]
pub fn hash_token(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// The display prefix recorded alongside an API key.
#[must_use]
pub fn key_prefix(raw: &str) -> String {
    raw.chars().take(PREFIX_DISPLAY_LEN).collect()
}

/// Constant-time equality over hash strings.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
