//! End-to-end encryption of message content.
//!
//! The sync engine only sees the [`Crypter`] seam: `encrypt(text, public_keys)`
//! and `decrypt(ciphertext, private_key)`. [`SealedBoxCrypter`] is the
//! default implementation: a random content key seals the body with
//! XChaCha20-Poly1305 and is wrapped once per recipient through an ephemeral
//! X25519 exchange. Keys travel hex-encoded, envelopes base64-encoded.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::constants::{
    KDF_CONTEXT_WRAP_KEY, NONCE_SIZE, PUBKEY_SIZE, SYMMETRIC_KEY_SIZE, TAG_SIZE,
};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

/// Size of one recipient slot: ephemeral public key || wrapped content key.
const SLOT_SIZE: usize = PUBKEY_SIZE + NONCE_SIZE + SYMMETRIC_KEY_SIZE + TAG_SIZE;

/// Asynchronous, fallible encryption service.
#[async_trait]
pub trait Crypter: Send + Sync {
    async fn encrypt(&self, plaintext: &str, public_keys: &[String]) -> Result<String, CryptoError>;

    async fn decrypt(&self, ciphertext: &str, private_key: &str) -> Result<String, CryptoError>;
}

/// Multi-recipient sealed box over X25519 + XChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, Default)]
pub struct SealedBoxCrypter;

#[async_trait]
impl Crypter for SealedBoxCrypter {
    async fn encrypt(
        &self,
        plaintext: &str,
        public_keys: &[String],
    ) -> Result<String, CryptoError> {
        seal(plaintext.as_bytes(), public_keys)
    }

    async fn decrypt(&self, ciphertext: &str, private_key: &str) -> Result<String, CryptoError> {
        let bytes = open(ciphertext, private_key)?;
        Ok(String::from_utf8(bytes)?)
    }
}

/// Generate an X25519 keypair as `(private_hex, public_hex)`.
pub fn generate_keypair() -> (String, String) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (hex::encode(secret.to_bytes()), hex::encode(public.as_bytes()))
}

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

// BLAKE3 KDF with domain separation over the DH output and both public keys
fn derive_wrap_key(
    shared: &[u8; 32],
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_WRAP_KEY);
    hasher.update(shared);
    hasher.update(ephemeral.as_bytes());
    hasher.update(recipient.as_bytes());
    *hasher.finalize().as_bytes()
}

fn parse_key(hex_key: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(hex_key.trim())?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength)
}

/// Envelope layout: `count:u8 || count * (epk || nonce || wrapped key) || nonce || body`.
fn seal(plaintext: &[u8], public_keys: &[String]) -> Result<String, CryptoError> {
    if public_keys.is_empty() {
        return Err(CryptoError::NoRecipients);
    }
    let count = u8::try_from(public_keys.len()).map_err(|_| CryptoError::EncryptionFailed)?;

    let content_key = generate_symmetric_key();
    let mut envelope = Vec::with_capacity(1 + public_keys.len() * SLOT_SIZE);
    envelope.push(count);

    for key in public_keys {
        let recipient = PublicKey::from(parse_key(key)?);
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&recipient);
        let wrap_key = derive_wrap_key(shared.as_bytes(), &ephemeral_public, &recipient);

        envelope.extend_from_slice(ephemeral_public.as_bytes());
        envelope.extend_from_slice(&encrypt(&wrap_key, &content_key)?);
    }

    envelope.extend_from_slice(&encrypt(&content_key, plaintext)?);
    Ok(STANDARD.encode(envelope))
}

fn open(ciphertext: &str, private_key: &str) -> Result<Vec<u8>, CryptoError> {
    let envelope = STANDARD.decode(ciphertext.trim())?;
    let (&count, rest) = envelope
        .split_first()
        .ok_or(CryptoError::MalformedEnvelope)?;
    let slots_len = count as usize * SLOT_SIZE;
    if rest.len() < slots_len {
        return Err(CryptoError::MalformedEnvelope);
    }
    let (slots, body) = rest.split_at(slots_len);

    let secret = StaticSecret::from(parse_key(private_key)?);
    let own_public = PublicKey::from(&secret);

    for slot in slots.chunks_exact(SLOT_SIZE) {
        let (epk, wrapped) = slot.split_at(PUBKEY_SIZE);
        let mut epk_bytes = [0u8; PUBKEY_SIZE];
        epk_bytes.copy_from_slice(epk);
        let ephemeral_public = PublicKey::from(epk_bytes);

        let shared = secret.diffie_hellman(&ephemeral_public);
        let wrap_key = derive_wrap_key(shared.as_bytes(), &ephemeral_public, &own_public);

        // A slot addressed to another recipient fails authentication.
        if let Ok(key_bytes) = decrypt(&wrap_key, wrapped) {
            let content_key: SymmetricKey = key_bytes
                .try_into()
                .map_err(|_| CryptoError::MalformedEnvelope)?;
            return decrypt(&content_key, body);
        }
    }

    Err(CryptoError::DecryptionFailed)
}
