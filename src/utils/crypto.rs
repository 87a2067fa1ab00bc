//! Session encryption.
//!
//! Session-scoped packets carry a sealed body: `[nonce(24)][ciphertext + tag]`.
//! The algorithm behind the seal is pluggable through [`SessionCipher`]; the
//! default is XChaCha20-Poly1305 ([`XChaChaCipher`]).
//!
//! A [`SessionKey`] couples the key bytes with the cipher that uses them and a
//! process-unique generation number. The network handler compares generations
//! before it sends a session packet, so a packet sealed for a previous login
//! cannot reach the wire after reinitialisation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

use crate::error::{constants, DecodeError, ProtocolError, Result};

/// Key length in bytes
pub const KEY_SIZE: usize = 32;

/// Nonce length in bytes (XChaCha20)
pub const NONCE_SIZE: usize = 24;

/// Thin wrapper over an XChaCha20-Poly1305 instance
pub struct Crypto {
    cipher: XChaCha20Poly1305,
}

impl Crypto {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    pub fn encrypt(&self, data: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(XNonce::from_slice(nonce), data)
            .map_err(|_| ProtocolError::EncryptionFailure)
    }

    pub fn decrypt(
        &self,
        data: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> std::result::Result<Vec<u8>, DecodeError> {
        self.cipher
            .decrypt(XNonce::from_slice(nonce), data)
            .map_err(|_| DecodeError::DecryptionFailure)
    }

    /// Fresh random nonce from the operating system
    pub fn generate_nonce() -> Result<[u8; NONCE_SIZE]> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::fill(&mut nonce)
            .map_err(|_| ProtocolError::Custom(constants::ERR_RANDOM_SOURCE.into()))?;
        Ok(nonce)
    }
}

/// Symmetric cipher applied to session-scoped payloads.
pub trait SessionCipher: Send + Sync + fmt::Debug + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Encrypt `plaintext`, returning a self-contained sealed body.
    fn seal(&self, key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Reverse of [`seal`](Self::seal).
    fn open(&self, key: &[u8; KEY_SIZE], sealed: &[u8])
        -> std::result::Result<Vec<u8>, DecodeError>;
}

/// Default session cipher: random 24-byte nonce followed by the AEAD output.
#[derive(Debug, Default, Clone, Copy)]
pub struct XChaChaCipher;

impl SessionCipher for XChaChaCipher {
    fn name(&self) -> &'static str {
        "xchacha20poly1305"
    }

    fn seal(&self, key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Crypto::generate_nonce()?;
        let ciphertext = Crypto::new(key).encrypt(plaintext, &nonce)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    fn open(
        &self,
        key: &[u8; KEY_SIZE],
        sealed: &[u8],
    ) -> std::result::Result<Vec<u8>, DecodeError> {
        if sealed.len() < NONCE_SIZE {
            return Err(DecodeError::DecryptionFailure);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);

        Crypto::new(key).decrypt(ciphertext, &nonce)
    }
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

struct SessionKeyInner {
    bytes: Zeroizing<[u8; KEY_SIZE]>,
    generation: u64,
    cipher: Arc<dyn SessionCipher>,
}

/// Secret issued by the server after a successful login.
///
/// Cloning is cheap and shares the same key material and generation.
#[derive(Clone)]
pub struct SessionKey {
    inner: Arc<SessionKeyInner>,
}

impl SessionKey {
    pub fn new(bytes: [u8; KEY_SIZE], cipher: Arc<dyn SessionCipher>) -> Self {
        Self {
            inner: Arc::new(SessionKeyInner {
                bytes: Zeroizing::new(bytes),
                generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
                cipher,
            }),
        }
    }

    /// Random key, as a server would issue one
    pub fn generate(cipher: Arc<dyn SessionCipher>) -> Result<Self> {
        let mut bytes = [0u8; KEY_SIZE];
        getrandom::fill(&mut bytes)
            .map_err(|_| ProtocolError::Custom(constants::ERR_RANDOM_SOURCE.into()))?;
        Ok(Self::new(bytes, cipher))
    }

    /// Process-unique number identifying this key instance.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.inner.bytes
    }

    pub fn cipher(&self) -> &Arc<dyn SessionCipher> {
        &self.inner.cipher
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.inner.cipher.seal(&self.inner.bytes, plaintext)
    }

    pub fn open(&self, sealed: &[u8]) -> std::result::Result<Vec<u8>, DecodeError> {
        self.inner.cipher.open(&self.inner.bytes, sealed)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("generation", &self.inner.generation)
            .field("cipher", &self.inner.cipher.name())
            .finish_non_exhaustive()
    }
}
