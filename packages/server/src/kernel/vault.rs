//! Credential vault - at-rest encryption for provider API keys plus PIN
//! hashing.
//!
//! Ciphertexts are stored as `nonce:tag:ciphertext` with each segment
//! base64-encoded. The three-segment shape doubles as the is-encrypted
//! discriminator: legacy plaintext values (anything that is not three
//! segments) pass through `decrypt` unchanged.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

/// Nonce size for AES-256-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// GCM authentication tag size.
const TAG_SIZE: usize = 16;

/// PBKDF2 iteration count for the derived key. Fixed so the key is stable
/// across restarts.
const KDF_ITERATIONS: u32 = 100_000;

/// Fixed KDF salt. The derived key must not change between deployments of
/// the same signing secret.
const KDF_SALT: &[u8] = b"draftforge-credential-vault";

/// bcrypt work factor for PIN and password verifiers.
pub const HASH_COST: u32 = 12;

/// Authenticated encryption for stored provider credentials.
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl CredentialCipher {
    /// Build from an explicit 32-byte hex key, or derive one from the
    /// token-signing secret when no key is configured.
    pub fn new(raw_key_hex: Option<&str>, jwt_secret: &str) -> Result<Self> {
        let key = match raw_key_hex {
            Some(hex) => {
                let bytes = decode_hex(hex).context("ENCRYPTION_KEY is not valid hex")?;
                let len = bytes.len();
                bytes
                    .try_into()
                    .map_err(|_| anyhow!("ENCRYPTION_KEY must be 32 bytes, got {len}"))?
            }
            None => {
                let mut key = [0u8; 32];
                pbkdf2_hmac::<Sha256>(jwt_secret.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
                key
            }
        };

        Ok(Self { key })
    }

    /// Encrypt a credential for storage.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow!("failed to create cipher: {e}"))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| anyhow!("failed to generate nonce: {e}"))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut sealed = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &[],
                },
            )
            .map_err(|e| anyhow!("encryption failed: {e}"))?;

        // aes-gcm appends the tag to the ciphertext; store it separately.
        if sealed.len() < TAG_SIZE {
            bail!("ciphertext shorter than tag");
        }
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(format!(
            "{}:{}:{}",
            BASE64.encode(nonce_bytes),
            BASE64.encode(tag),
            BASE64.encode(sealed)
        ))
    }

    /// Decrypt a stored credential.
    ///
    /// Values that are not in the three-segment encrypted form are returned
    /// unchanged (legacy plaintext compatibility).
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let segments: Vec<&str> = stored.split(':').collect();
        if segments.len() != 3 {
            return Ok(stored.to_string());
        }

        let nonce_bytes = BASE64
            .decode(segments[0])
            .context("invalid nonce segment")?;
        let tag = BASE64.decode(segments[1]).context("invalid tag segment")?;
        let mut ciphertext = BASE64
            .decode(segments[2])
            .context("invalid ciphertext segment")?;

        if nonce_bytes.len() != NONCE_SIZE {
            bail!("bad nonce length {}", nonce_bytes.len());
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow!("failed to create cipher: {e}"))?;

        ciphertext.extend_from_slice(&tag);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &ciphertext,
                    aad: &[],
                },
            )
            .map_err(|_| anyhow!("decryption failed: bad key or tampered ciphertext"))?;

        String::from_utf8(plaintext).context("decrypted credential is not valid UTF-8")
    }
}

/// Mask a credential for display: first 4 and last 4 characters kept, the
/// middle replaced with up to 20 asterisks.
pub fn mask_credential(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let len = chars.len();

    if len <= 8 {
        // The kept edges cover the whole value; nothing to hide.
        return value.to_string();
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[len - 4..].iter().collect();
    let stars = (len - 8).min(20);
    format!("{head}{}{tail}", "*".repeat(stars))
}

/// Hash a PIN (or password) with bcrypt at the vault work factor.
pub fn hash_secret(secret: &str) -> Result<String> {
    bcrypt::hash(secret, HASH_COST).context("bcrypt hash failed")
}

/// Verify a PIN (or password) against its stored hash in constant time.
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    bcrypt::verify(secret, hash).unwrap_or(false)
}

fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        bail!("hex string must have even length");
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| anyhow!("invalid hex: {e}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
    const TEST_SECRET: &str = "a-signing-secret-of-at-least-32-characters";

    fn cipher() -> CredentialCipher {
        CredentialCipher::new(Some(TEST_KEY), TEST_SECRET).unwrap()
    }

    #[test]
    fn roundtrip() {
        let cipher = cipher();
        for plaintext in ["sk-or-v1-abcdef", "x", "пароль", "key with spaces"] {
            let stored = cipher.encrypt(plaintext).unwrap();
            assert_eq!(stored.split(':').count(), 3);
            assert_eq!(cipher.decrypt(&stored).unwrap(), plaintext);
        }
    }

    #[test]
    fn fresh_nonce_per_ciphertext() {
        let cipher = cipher();
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn legacy_plaintext_passes_through() {
        let cipher = cipher();
        assert_eq!(cipher.decrypt("plain-api-key").unwrap(), "plain-api-key");
        assert_eq!(cipher.decrypt("one:two").unwrap(), "one:two");
        assert_eq!(cipher.decrypt("a:b:c:d").unwrap(), "a:b:c:d");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = cipher();
        let stored = cipher.encrypt("secret").unwrap();
        let mut segments: Vec<String> = stored.split(':').map(String::from).collect();
        let mut tag = BASE64.decode(&segments[1]).unwrap();
        tag[0] ^= 0xff;
        segments[1] = BASE64.encode(tag);
        assert!(cipher.decrypt(&segments.join(":")).is_err());
    }

    #[test]
    fn derived_key_is_stable() {
        let a = CredentialCipher::new(None, TEST_SECRET).unwrap();
        let b = CredentialCipher::new(None, TEST_SECRET).unwrap();
        let stored = a.encrypt("credential").unwrap();
        assert_eq!(b.decrypt(&stored).unwrap(), "credential");
    }

    #[test]
    fn invalid_key_rejected() {
        assert!(CredentialCipher::new(Some("abcd"), TEST_SECRET).is_err());
        assert!(CredentialCipher::new(Some("zz"), TEST_SECRET).is_err());
    }

    #[test]
    fn masking_short_and_long() {
        assert_eq!(mask_credential("abc"), "abc");
        assert_eq!(mask_credential("abcdefgh"), "abcdefgh");
        let masked = mask_credential("sk-or-v1-0123456789abcdef");
        assert!(masked.starts_with("sk-o"));
        assert!(masked.ends_with("cdef"));
        assert_eq!(masked.matches('*').count(), 17);

        // Middle capped at 20 stars for very long keys.
        let long = "a".repeat(100);
        let masked = mask_credential(&long);
        assert_eq!(masked.len(), 4 + 20 + 4);
    }

    #[test]
    fn pin_hash_and_verify() {
        let hash = hash_secret("4821").unwrap();
        assert!(verify_secret("4821", &hash));
        assert!(!verify_secret("0000", &hash));
        assert!(!verify_secret("4821", "not-a-bcrypt-hash"));
    }
}
