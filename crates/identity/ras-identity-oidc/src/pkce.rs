//! Random login artifacts and the PKCE code challenge.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, thread_rng};
use sha2::{Digest, Sha256};

/// Bytes of entropy behind `state`, `nonce` and session ids.
const TOKEN_BYTES: usize = 32;

/// Bytes behind a code verifier; encodes to 86 characters.
const VERIFIER_BYTES: usize = 64;

pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Unguessable URL-safe string carrying `bytes` of randomness.
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

pub fn new_state() -> String {
    random_token(TOKEN_BYTES)
}

pub fn new_nonce() -> String {
    random_token(TOKEN_BYTES)
}

/// PKCE verifier: 43-128 characters from the unreserved set (RFC 7636 §4.1).
pub fn new_code_verifier() -> String {
    random_token(VERIFIER_BYTES)
}

/// `BASE64URL(SHA256(verifier))` without padding.
pub fn code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// PKCE code challenge and verifier
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: &'static str,
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

impl PkceChallenge {
    /// Generate a new PKCE challenge
    pub fn new() -> Self {
        Self::from_verifier(new_code_verifier())
    }

    pub fn from_verifier(code_verifier: String) -> Self {
        let code_challenge = code_challenge(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
            code_challenge_method: CODE_CHALLENGE_METHOD,
        }
    }
}
