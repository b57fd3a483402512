/// Crypto utilities for secure credential handling.
/// Credentials handed to the connector are kept sealed with AES-256-GCM and
/// only opened inside a scoped accessor; the plaintext is wiped on exit.

use std::fmt;
use std::future::Future;

use ring::aead;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Deserializer};
use zeroize::Zeroizing;

/// Encrypt data using AES-256-GCM.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
    let rng = SystemRandom::new();
    let unbound_key = aead::UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| anyhow::anyhow!("Invalid key"))?;
    let sealing_key = aead::LessSafeKey::new(unbound_key);

    let mut nonce_bytes = [0u8; 12];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| anyhow::anyhow!("RNG failed"))?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| anyhow::anyhow!("Encryption failed"))?;

    // Prepend nonce to ciphertext
    let mut result = nonce_bytes.to_vec();
    result.extend(in_out);
    Ok(result)
}

/// Decrypt AES-256-GCM encrypted data.
///
/// The returned buffer is zeroed when dropped, including the authentication
/// tag bytes left in its spare capacity.
pub fn decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, anyhow::Error> {
    if ciphertext.len() < 12 {
        return Err(anyhow::anyhow!("Ciphertext too short"));
    }

    let (nonce_bytes, encrypted) = ciphertext.split_at(12);
    let nonce_bytes: [u8; 12] = nonce_bytes.try_into()?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let unbound_key = aead::UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| anyhow::anyhow!("Invalid key"))?;
    let opening_key = aead::LessSafeKey::new(unbound_key);

    let mut in_out = Zeroizing::new(encrypted.to_vec());
    let plaintext_len = opening_key
        .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| anyhow::anyhow!("Decryption failed"))?
        .len();
    in_out.truncate(plaintext_len);

    Ok(in_out)
}

/// A credential that is never held as plain text outside of [`GuardedSecret::access`].
///
/// Each secret is sealed under its own random key at construction time.
#[derive(Clone)]
pub struct GuardedSecret {
    key: Zeroizing<[u8; 32]>,
    sealed: Vec<u8>,
}

impl GuardedSecret {
    /// Seal a plain-text secret.
    pub fn new(plaintext: &str) -> Result<Self, anyhow::Error> {
        let rng = SystemRandom::new();
        let mut key = Zeroizing::new([0u8; 32]);
        rng.fill(&mut key[..])
            .map_err(|_| anyhow::anyhow!("RNG failed"))?;
        let sealed = encrypt(&key, plaintext.as_bytes())?;
        Ok(Self { key, sealed })
    }

    /// Run `f` with the plain-text secret. The decrypted buffer is wiped
    /// before this returns, so `f` must not keep a copy.
    pub fn access<R>(&self, f: impl FnOnce(&str) -> R) -> Result<R, anyhow::Error> {
        let plain = decrypt(&self.key, &self.sealed)?;
        let text = std::str::from_utf8(&plain)
            .map_err(|_| anyhow::anyhow!("Secret is not valid UTF-8"))?;
        Ok(f(text))
    }

    /// Async flavour of [`GuardedSecret::access`]. The secret is handed over as
    /// a self-wiping string owned by the returned future.
    pub async fn access_async<F, Fut, R>(&self, f: F) -> Result<R, anyhow::Error>
    where
        F: FnOnce(Zeroizing<String>) -> Fut,
        Fut: Future<Output = R>,
    {
        let plain = self.access(|text| Zeroizing::new(text.to_string()))?;
        Ok(f(plain).await)
    }
}

impl fmt::Debug for GuardedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GuardedSecret(***)")
    }
}

impl<'de> Deserialize<'de> for GuardedSecret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let plain = Zeroizing::new(String::deserialize(deserializer)?);
        GuardedSecret::new(&plain).map_err(serde::de::Error::custom)
    }
}
