//! Per-value encryption for password-protected datasets.
//!
//! Each encrypted dataset carries a random key salt and IV generated once at
//! upload time; every cell value of that dataset is encrypted independently
//! under the same derived key and IV (AES-256-CBC, PKCS7, base64 output), so
//! rows keep their shape and any single field can be decrypted on its own.
//! Password verification material is stored separately from the key salt so
//! a hash comparison never reveals anything about the data key.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 16;

/// Iteration count for the SHA-256 key stretch. Applies to both key
/// derivation and password-verifier hashing.
const SPIN_COUNT: u32 = 50_000;

const KEY_DOMAIN: &[u8] = b"soillab.key.v1";
const VERIFIER_DOMAIN: &[u8] = b"soillab.verifier.v1";

pub type Key = Zeroizing<[u8; KEY_LEN]>;

#[derive(Debug, Error)]
pub enum CipherError {
    /// Malformed base64, truncated ciphertext, bad padding and a wrong key
    /// all collapse into this one condition.
    #[error("decryption failed")]
    DecryptFailed,

    #[error("invalid cipher parameter: {0}")]
    InvalidParameter(&'static str),
}

/// Iterated SHA-256 stretch: seed with a domain tag, the salt and the
/// password, then re-hash with a little-endian round counter prepended.
fn stretch(domain: &[u8], salt: &[u8], password: &str) -> [u8; KEY_LEN] {
    let mut digest = {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(salt);
        hasher.update(password.as_bytes());
        hasher.finalize()
    };

    for round in 0..SPIN_COUNT {
        let mut hasher = Sha256::new();
        hasher.update(round.to_le_bytes());
        hasher.update(digest);
        digest = hasher.finalize();
    }

    digest.into()
}

/// Derive the dataset data key from a password and the dataset's key salt.
/// Deterministic: the same inputs always yield the same key.
pub fn derive_key(password: &str, salt: &[u8]) -> Key {
    Zeroizing::new(stretch(KEY_DOMAIN, salt, password))
}

/// Hash a password for verification storage. Returns the fresh random salt
/// and the stretched hash; the raw password is never persisted.
pub fn hash_password(password: &str) -> (Vec<u8>, Vec<u8>) {
    let salt = generate_salt();
    let hash = stretch(VERIFIER_DOMAIN, &salt, password);
    (salt, hash.to_vec())
}

/// Recompute the verifier for `attempt` and compare in constant time.
pub fn verify_password(salt: &[u8], hash: &[u8], attempt: &str) -> bool {
    let computed = stretch(VERIFIER_DOMAIN, salt, attempt);
    if hash.len() != computed.len() {
        return false;
    }
    hash.ct_eq(&computed).into()
}

pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

pub fn generate_iv() -> Vec<u8> {
    let mut iv = vec![0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// Encrypt one scalar value: AES-256-CBC with PKCS7 padding, base64 output.
pub fn encrypt_value(plaintext: &str, key: &Key, iv: &[u8]) -> Result<String, CipherError> {
    let encryptor = Aes256CbcEnc::new_from_slices(key.as_ref(), iv)
        .map_err(|_| CipherError::InvalidParameter("iv length"))?;
    let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    Ok(BASE64.encode(ciphertext))
}

/// Decrypt one scalar value. Fails (rather than returning garbage) when the
/// padding does not check out, which is how a wrong password shows up.
pub fn decrypt_value(ciphertext_b64: &str, key: &Key, iv: &[u8]) -> Result<String, CipherError> {
    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|_| CipherError::DecryptFailed)?;

    let decryptor =
        Aes256CbcDec::new_from_slices(key.as_ref(), iv).map_err(|_| CipherError::DecryptFailed)?;
    let plaintext = decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CipherError::DecryptFailed)?;

    String::from_utf8(plaintext).map_err(|_| CipherError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> (Key, Vec<u8>) {
        let salt = generate_salt();
        (derive_key("secret123", &salt), generate_iv())
    }

    #[test]
    fn derive_key_is_deterministic() {
        let salt = generate_salt();
        let first = derive_key("secret123", &salt);
        let second = derive_key("secret123", &salt);
        assert_eq!(first.as_ref(), second.as_ref());
    }

    #[test]
    fn derive_key_differs_across_salts() {
        let first = derive_key("secret123", &generate_salt());
        let second = derive_key("secret123", &generate_salt());
        assert_ne!(first.as_ref(), second.as_ref());
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let (key, iv) = test_key();
        for value in ["0.0215", "", "some text", "-1.5e-3", "0"] {
            let ciphertext = encrypt_value(value, &key, &iv).unwrap();
            assert_ne!(ciphertext, value);
            let plaintext = decrypt_value(&ciphertext, &key, &iv).unwrap();
            assert_eq!(plaintext, value);
        }
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let (key, iv) = test_key();
        let ciphertext = encrypt_value("0.5", &key, &iv).unwrap();

        let wrong = derive_key("wrong", &generate_salt());
        assert!(matches!(
            decrypt_value(&ciphertext, &wrong, &iv),
            Err(CipherError::DecryptFailed)
        ));
    }

    #[test]
    fn decrypt_rejects_malformed_input() {
        let (key, iv) = test_key();
        // Not base64 at all.
        assert!(decrypt_value("!!not-base64!!", &key, &iv).is_err());
        // Valid base64 but not a whole number of cipher blocks.
        assert!(decrypt_value(&BASE64.encode(b"short"), &key, &iv).is_err());
    }

    #[test]
    fn password_verification_round_trip() {
        let (salt, hash) = hash_password("secret123");
        assert!(verify_password(&salt, &hash, "secret123"));
        assert!(!verify_password(&salt, &hash, "wrong"));
        // Near miss: trailing space must not verify.
        assert!(!verify_password(&salt, &hash, "secret123 "));
    }

    #[test]
    fn verifier_hash_is_not_the_data_key() {
        let salt = generate_salt();
        let key = derive_key("secret123", &salt);
        let verifier = stretch(VERIFIER_DOMAIN, &salt, "secret123");
        assert_ne!(key.as_ref(), &verifier);
    }
}
