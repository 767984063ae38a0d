//! Credential vault — platform login secrets encrypted at rest.
//!
//! Store policies carry the owner's delivery-platform password; it is
//! encrypted here with AES-256 under a machine-specific key derived from
//! hostname + username, and only decrypted once per platform group,
//! immediately before a collaborator call needs a live session.
//!
//! Ciphertext is versioned (`v1:` + base64). Values without a version
//! prefix predate the vault and pass through decrypt unchanged; that
//! migration tail still exists in long-lived databases.

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use replyflow_core::{ReplyFlowError, Result};
use sha2::{Digest, Sha256};

const V1_PREFIX: &str = "v1:";
const BLOCK_SIZE: usize = 16;

/// Encrypts and decrypts platform credentials.
pub struct CredentialVault {
    key: [u8; 32],
    encrypt: bool,
}

impl CredentialVault {
    /// Vault keyed to this machine.
    pub fn new(encrypt: bool) -> Self {
        Self {
            key: derive_machine_key(),
            encrypt,
        }
    }

    /// Vault with an explicit key (tests, or a shared key from config).
    pub fn with_key(key: [u8; 32]) -> Self {
        Self { key, encrypt: true }
    }

    /// Encrypt a plaintext secret into the versioned format.
    /// Empty input stays empty; with encryption disabled the value passes
    /// through so a dev database stays readable.
    pub fn encrypt(&self, plaintext: &str) -> String {
        if plaintext.is_empty() || !self.encrypt {
            return plaintext.to_string();
        }
        let encrypted = encrypt_aes256(plaintext.as_bytes(), &self.key);
        format!("{V1_PREFIX}{}", BASE64.encode(&encrypted))
    }

    /// Decrypt a stored secret.
    ///
    /// Unversioned values are legacy plaintext and pass through unchanged.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let Some(body) = stored.strip_prefix(V1_PREFIX) else {
            return Ok(stored.to_string());
        };
        let encrypted = BASE64
            .decode(body.trim())
            .map_err(|e| ReplyFlowError::Vault(format!("Base64 decode failed: {e}")))?;
        if encrypted.len() % BLOCK_SIZE != 0 {
            return Err(ReplyFlowError::Vault("truncated ciphertext".into()));
        }
        let decrypted = decrypt_aes256(&encrypted, &self.key);
        String::from_utf8(decrypted)
            .map_err(|e| ReplyFlowError::Vault(format!("Decryption produced invalid UTF-8: {e}")))
    }
}

/// Derive a machine-specific AES-256 key from hostname + username.
fn derive_machine_key() -> [u8; 32] {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "replyflow".into());
    let username = whoami::username();
    let salt = format!("replyflow::{username}@{hostname}::credentials");

    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    let result = hasher.finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&result);
    key
}

/// AES-256-ECB encrypt with PKCS7 padding.
fn encrypt_aes256(data: &[u8], key: &[u8; 32]) -> Vec<u8> {
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let padding_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut padded = data.to_vec();
    padded.extend(std::iter::repeat_n(padding_len as u8, padding_len));

    let mut encrypted = Vec::with_capacity(padded.len());
    for chunk in padded.chunks(BLOCK_SIZE) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.encrypt_block(&mut block);
        encrypted.extend_from_slice(&block);
    }

    encrypted
}

/// AES-256-ECB decrypt with PKCS7 unpadding.
fn decrypt_aes256(data: &[u8], key: &[u8; 32]) -> Vec<u8> {
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut decrypted = Vec::with_capacity(data.len());
    for chunk in data.chunks_exact(BLOCK_SIZE) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.decrypt_block(&mut block);
        decrypted.extend_from_slice(&block);
    }

    if let Some(&pad_len) = decrypted.last() {
        let pad_len = pad_len as usize;
        if pad_len <= BLOCK_SIZE && pad_len <= decrypted.len() {
            let valid = decrypted[decrypted.len() - pad_len..]
                .iter()
                .all(|&b| b == pad_len as u8);
            if valid {
                decrypted.truncate(decrypted.len() - pad_len);
            }
        }
    }

    decrypted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> CredentialVault {
        CredentialVault::with_key([7u8; 32])
    }

    #[test]
    fn test_roundtrip() {
        let vault = test_vault();
        let ciphertext = vault.encrypt("owner-password-123!");
        assert!(ciphertext.starts_with("v1:"));
        assert_ne!(ciphertext, "owner-password-123!");
        assert_eq!(vault.decrypt(&ciphertext).unwrap(), "owner-password-123!");
    }

    #[test]
    fn test_roundtrip_korean() {
        let vault = test_vault();
        let ciphertext = vault.encrypt("비밀번호123");
        assert_eq!(vault.decrypt(&ciphertext).unwrap(), "비밀번호123");
    }

    #[test]
    fn test_legacy_plaintext_passes_through() {
        let vault = test_vault();
        assert_eq!(vault.decrypt("legacy-password").unwrap(), "legacy-password");
    }

    #[test]
    fn test_empty_values() {
        let vault = test_vault();
        assert_eq!(vault.encrypt(""), "");
        assert_eq!(vault.decrypt("").unwrap(), "");
    }

    #[test]
    fn test_encryption_disabled_passes_through() {
        let vault = CredentialVault {
            key: [7u8; 32],
            encrypt: false,
        };
        assert_eq!(vault.encrypt("plain"), "plain");
        assert_eq!(vault.decrypt("plain").unwrap(), "plain");
    }

    #[test]
    fn test_corrupt_ciphertext_is_an_error() {
        let vault = test_vault();
        assert!(vault.decrypt("v1:not-base64!!!").is_err());
        assert!(vault.decrypt("v1:YWJj").is_err()); // 3 bytes, not block-aligned
    }

    #[test]
    fn test_different_keys_differ() {
        let a = CredentialVault::with_key([1u8; 32]);
        let b = CredentialVault::with_key([2u8; 32]);
        let ct = a.encrypt("secret");
        // wrong key produces garbage or invalid utf-8, never the plaintext
        match b.decrypt(&ct) {
            Ok(text) => assert_ne!(text, "secret"),
            Err(_) => {}
        }
    }
}
