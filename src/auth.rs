use std::fmt;

use sha1::{Digest, Sha1};
use tss_esapi::structures::Auth;

/// Size of a TPM authorization value, in bytes.
pub const AUTH_VALUE_SIZE: usize = 20;

/// A 20-byte TPM authorization value.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthValue([u8; AUTH_VALUE_SIZE]);

impl AuthValue {
    /// The all-zero secret TPMs use when no password is set.
    pub fn well_known() -> Self {
        AuthValue([0u8; AUTH_VALUE_SIZE])
    }

    /// Derives an authorization value from an operator-supplied secret.
    /// The empty string maps to the well-known value, anything else to its SHA-1 digest.
    pub fn derive(secret: &str) -> Self {
        if secret.is_empty() {
            return Self::well_known()
        }
        let mut value = [0u8; AUTH_VALUE_SIZE];
        value.copy_from_slice(&Sha1::digest(secret.as_bytes()));
        AuthValue(value)
    }

    pub fn is_well_known(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; AUTH_VALUE_SIZE] {
        &self.0
    }

    /// Converts into the representation expected by the TPM 2.0 stack.
    /// TPM 2.0 strips trailing zero octets from auth values, so the
    /// well-known value is the same thing as an empty auth.
    pub fn to_tpm_auth(&self) -> tss_esapi::Result<Auth> {
        if self.is_well_known() {
            Ok(Auth::default())
        } else {
            Auth::try_from(self.0.to_vec())
        }
    }
}

impl fmt::Debug for AuthValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_well_known() {
            f.write_str("AuthValue(well-known)")
        } else {
            f.write_str("AuthValue(<redacted>)")
        }
    }
}
