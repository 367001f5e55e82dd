//! Master key material and password-based derivation.

use std::fmt;

use zeroize::Zeroizing;

use super::{KEY_LEN, cipher};

/// The password-derived symmetric key protecting a dataset.
///
/// Derivation is `SHA-256(password || salt)` where the salt is the dataset
/// IV, so the same password yields a different key for every dataset.
///
/// The key material is wrapped in [`Zeroizing`] so it is erased from memory
/// on drop, and the `Debug` implementation redacts it.
pub struct MasterKey(Zeroizing<[u8; KEY_LEN]>);

impl MasterKey {
    /// Derive a key from a password and a dataset-specific salt.
    pub fn derive(password: &str, salt: &[u8]) -> Self {
        let mut salted = Zeroizing::new(Vec::with_capacity(password.len() + salt.len()));
        salted.extend_from_slice(password.as_bytes());
        salted.extend_from_slice(salt);
        Self::from_bytes(cipher::sha256(&salted))
    }

    /// Wrap existing key material.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        MasterKey(Zeroizing::new(bytes))
    }

    /// Raw key bytes, for handing to the cipher.
    pub(crate) fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MasterKey").field(&"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = MasterKey::derive("password", b"salt");
        let b = MasterKey::derive("password", b"salt");
        assert_eq!(a.bytes(), b.bytes());
    }

    #[test]
    fn salt_changes_the_key() {
        let a = MasterKey::derive("password", b"salt-one");
        let b = MasterKey::derive("password", b"salt-two");
        assert_ne!(a.bytes(), b.bytes());
    }

    #[test]
    fn password_changes_the_key() {
        let a = MasterKey::derive("password-one", b"salt");
        let b = MasterKey::derive("password-two", b"salt");
        assert_ne!(a.bytes(), b.bytes());
    }

    #[test]
    fn debug_redacts_key_material() {
        let key = MasterKey::derive("password", b"salt");
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(&hex::encode(key.bytes())));
    }
}
