// ABOUTME: CSRF primitive: per-session secrets carried in a signed cookie and masked per-request tokens.
// ABOUTME: Exposed as the CsrfProtector trait so the guard can be driven by any scheme.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Length in bytes of a session secret.
pub const SECRET_LEN: usize = 32;

/// Minimum length in bytes of the server key that signs session cookies.
pub const MIN_KEY_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum CsrfError {
    #[error("CSRF signing key must be at least 32 bytes, got {0}")]
    KeyTooShort(usize),
}

/// Random per-session secret. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSecret([u8; SECRET_LEN]);

impl SessionSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionSecret(..)")
    }
}

/// The black-box capability behind the CSRF guard.
///
/// The guard decides *when* to mint, seal, open, and validate; implementations
/// decide *how*.
pub trait CsrfProtector: Send + Sync + 'static {
    /// Fresh secret for a client that has no valid session cookie yet.
    fn new_session(&self) -> SessionSecret;

    /// Encode a secret as a cookie value.
    fn seal(&self, secret: &SessionSecret) -> String;

    /// Decode a cookie value. Returns `None` for anything tampered or malformed.
    fn open(&self, sealed: &str) -> Option<SessionSecret>;

    /// Mint a token bound to the secret, for embedding in a form or header.
    fn issue_token(&self, secret: &SessionSecret) -> String;

    /// Check a token presented by the client against the session secret.
    fn validate(&self, secret: &SessionSecret, token: &str) -> bool;
}

/// Generate a random signing key suitable for [`HmacCsrf::new`].
pub fn generate_key() -> Vec<u8> {
    let mut key = vec![0u8; MIN_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Default protector.
///
/// The cookie holds `base64url(secret).base64url(HMAC-SHA256(key, secret))`.
/// Tokens are `base64url(pad || pad XOR secret)` with a fresh pad each time, so
/// no two tokens look alike but all of them validate against the same session.
#[derive(Clone)]
pub struct HmacCsrf {
    mac: HmacSha256,
}

impl HmacCsrf {
    pub fn new(key: &[u8]) -> Result<Self, CsrfError> {
        if key.len() < MIN_KEY_LEN {
            return Err(CsrfError::KeyTooShort(key.len()));
        }
        let mac = HmacSha256::new_from_slice(key).map_err(|_| CsrfError::KeyTooShort(key.len()))?;
        Ok(Self { mac })
    }

    fn sign(&self, secret: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(secret);
        mac.finalize().into_bytes().to_vec()
    }
}

impl fmt::Debug for HmacCsrf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacCsrf").finish_non_exhaustive()
    }
}

impl CsrfProtector for HmacCsrf {
    fn new_session(&self) -> SessionSecret {
        SessionSecret::generate()
    }

    fn seal(&self, secret: &SessionSecret) -> String {
        let tag = self.sign(secret.as_bytes());
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(secret.as_bytes()),
            URL_SAFE_NO_PAD.encode(tag)
        )
    }

    fn open(&self, sealed: &str) -> Option<SessionSecret> {
        let (encoded_secret, encoded_tag) = sealed.split_once('.')?;
        let secret = URL_SAFE_NO_PAD.decode(encoded_secret).ok()?;
        let tag = URL_SAFE_NO_PAD.decode(encoded_tag).ok()?;

        let mut mac = self.mac.clone();
        mac.update(&secret);
        mac.verify_slice(&tag).ok()?;

        let bytes: [u8; SECRET_LEN] = secret.try_into().ok()?;
        Some(SessionSecret(bytes))
    }

    fn issue_token(&self, secret: &SessionSecret) -> String {
        let pad = SessionSecret::generate();
        let mut raw = Vec::with_capacity(SECRET_LEN * 2);
        raw.extend_from_slice(pad.as_bytes());
        raw.extend(
            pad.as_bytes()
                .iter()
                .zip(secret.as_bytes())
                .map(|(p, s)| p ^ s),
        );
        URL_SAFE_NO_PAD.encode(raw)
    }

    fn validate(&self, secret: &SessionSecret, token: &str) -> bool {
        let Ok(raw) = URL_SAFE_NO_PAD.decode(token.trim()) else {
            return false;
        };
        if raw.len() != SECRET_LEN * 2 {
            return false;
        }

        let (pad, masked) = raw.split_at(SECRET_LEN);
        let unmasked: Vec<u8> = pad.iter().zip(masked).map(|(p, m)| p ^ m).collect();
        unmasked.ct_eq(secret.as_bytes()).into()
    }
}
