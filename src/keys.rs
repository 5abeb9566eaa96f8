//! # Key Exchange
//!
//! Ephemeral X25519 key pairs for job outputs, using the `age` hybrid scheme.
//!
//! A fresh [`KeyPair`] is generated for every job. Its public half travels to
//! the control plane as an `age1…` recipient string; the control plane encrypts
//! the job outputs to it. The private half becomes a [`PrivateKey`] that is moved
//! into the completion waiter and dropped as soon as the wait returns, so the
//! secret never outlives the single call that needs it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let (recipient, private_key) = KeyPair::generate().split();
//! let ciphertext = keys::encrypt(&recipient, b"{\"url\":\"https://example.test\"}")?;
//! let plaintext = private_key.decrypt(&ciphertext)?;
//! ```

use std::fmt;
use std::io::{Read, Write};
use std::iter;

use age::x25519;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncryptError {
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("no recipients to encrypt to")]
    NoRecipients,

    #[error(transparent)]
    Age(#[from] age::EncryptError),

    #[error("failed to write ciphertext: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error(transparent)]
    Age(#[from] age::DecryptError),

    #[error("ciphertext is not encrypted to a recipient key")]
    NotRecipientEncrypted,

    #[error("failed to read plaintext: {0}")]
    Io(#[from] std::io::Error),
}

/// An ephemeral asymmetric key pair, created fresh for every job request.
pub struct KeyPair {
    identity: x25519::Identity,
}

impl KeyPair {
    /// Generates a new key pair from OS entropy. Cannot fail.
    pub fn generate() -> Self {
        Self {
            identity: x25519::Identity::generate(),
        }
    }

    /// The public half in the `age1…` recipient encoding.
    pub fn recipient(&self) -> String {
        self.identity.to_public().to_string()
    }

    /// Consumes the pair, returning the recipient string to submit and the
    /// private key to decrypt with.
    pub fn split(self) -> (String, PrivateKey) {
        let recipient = self.recipient();
        (
            recipient,
            PrivateKey {
                identity: self.identity,
            },
        )
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("recipient", &self.recipient())
            .finish_non_exhaustive()
    }
}

/// The private half of a [`KeyPair`]. The underlying secret is zeroed on drop.
pub struct PrivateKey {
    identity: x25519::Identity,
}

impl PrivateKey {
    /// Decrypts a binary `age` ciphertext addressed to this key.
    ///
    /// Ciphertext produced for any other recipient fails with
    /// [`DecryptError::Age`]; it never yields plausible-looking plaintext.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        let decryptor = match age::Decryptor::new(ciphertext)? {
            age::Decryptor::Recipients(decryptor) => decryptor,
            _ => return Err(DecryptError::NotRecipientEncrypted),
        };

        let identity: &dyn age::Identity = &self.identity;
        let mut reader = decryptor.decrypt(iter::once(identity))?;

        let mut plaintext = vec![];
        reader.read_to_end(&mut plaintext)?;
        Ok(plaintext)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// Checks that `recipient` is a well-formed `age1…` X25519 recipient.
pub fn validate_recipient(recipient: &str) -> Result<(), EncryptError> {
    parse_recipient(recipient).map(|_| ())
}

fn parse_recipient(recipient: &str) -> Result<x25519::Recipient, EncryptError> {
    recipient
        .parse()
        .map_err(|e| EncryptError::InvalidRecipient(format!("{e}")))
}

/// Encrypts `plaintext` to an `age1…` recipient. This is the control plane's
/// side of the exchange.
pub fn encrypt(recipient: &str, plaintext: &[u8]) -> Result<Vec<u8>, EncryptError> {
    let recipient = parse_recipient(recipient)?;

    let encryptor = age::Encryptor::with_recipients(vec![Box::new(recipient)])
        .ok_or(EncryptError::NoRecipients)?;

    let mut ciphertext = vec![];
    let mut writer = encryptor.wrap_output(&mut ciphertext)?;
    writer.write_all(plaintext)?;
    writer.finish()?;

    Ok(ciphertext)
}
