//! Key derivation functionality with security validations.
//!
//! Passwords are stretched with PBKDF2-HMAC-SHA256 into a 32-byte key.
//! The iteration count is stored in every container, so raising the default
//! later never breaks old files.
//!
//! # Security Guidelines
//!
//! - Keep passwords in `SecretString` and let them drop right after derivation
//! - [`DerivedKey`] wipes itself on drop and never prints its bytes
//! - Salts are 32 random bytes, fresh for every encryption

use std::fmt;

use hmac::Hmac;
use pbkdf2::pbkdf2;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::format::SALT_LEN;
use crate::types::{MAX_ITERATIONS, MIN_ITERATIONS, SeftError};

/// Derived key length (AES-256).
pub const KEY_LEN: usize = 32;

/// Symmetric key bound to one encrypt or decrypt call. Zeroed on drop.
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for DerivedKey {}

/// Derive a 32-byte key from a password with PBKDF2-HMAC-SHA256.
///
/// Deterministic: the same password, salt and iteration count always yield
/// the same key.
///
/// # Errors
///
/// Returns `SeftError::InvalidInput` when:
/// - the salt is not exactly 32 bytes
/// - `iterations` is below 100 000 or above 10 000 000
pub fn derive_key(
    password: &SecretString,
    salt: &[u8],
    iterations: u32,
) -> Result<DerivedKey, SeftError> {
    if salt.len() != SALT_LEN {
        return Err(SeftError::InvalidInput("kdf: salt must be exactly 32 bytes"));
    }
    if iterations < MIN_ITERATIONS {
        return Err(SeftError::InvalidInput(
            "kdf: iteration count must be at least 100000",
        ));
    }
    if iterations > MAX_ITERATIONS {
        return Err(SeftError::InvalidInput(
            "kdf: iteration count must be at most 10000000",
        ));
    }

    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::<Hmac<Sha256>>(
        password.expose_secret().as_bytes(),
        salt,
        iterations,
        out.as_mut(),
    )
    .map_err(|_| SeftError::InvalidInput("kdf: invalid output length"))?;

    tracing::debug!(iterations, "derived key");
    Ok(DerivedKey(out))
}
