// ABOUTME: Turns raw private-key bytes and an optional passphrase into a signing identity.
// ABOUTME: Decoding failures are final; a bad key or passphrase is never retried.

use super::error::{Error, Op, Result};
use russh::keys::ssh_key::{self, HashAlg, PrivateKey};
use russh::keys::{PrivateKeyWithHashAlg, decode_secret_key};
use std::fmt;
use std::sync::Arc;

/// The credential every hop authenticates with.
#[derive(Clone)]
pub struct Identity {
    key: Arc<PrivateKey>,
}

impl Identity {
    /// Decode `key` (OpenSSH or PEM text), using `passphrase` when it is non-empty.
    pub fn resolve(key: &[u8], passphrase: Option<&[u8]>) -> Result<Self> {
        let text = std::str::from_utf8(key).map_err(|e| {
            Error::new(Op::ParseKey)
                .with_message("private key is not valid UTF-8 text")
                .with_source(e)
        })?;

        let passphrase = match passphrase.filter(|p| !p.is_empty()) {
            Some(bytes) => Some(std::str::from_utf8(bytes).map_err(|e| {
                Error::new(Op::ParseKey)
                    .with_message("passphrase is not valid UTF-8")
                    .with_source(e)
            })?),
            None => None,
        };

        let key = decode_secret_key(text, passphrase).map_err(|e| {
            let message = if passphrase.is_some() {
                format!("failed to decrypt private key: {e}")
            } else {
                format!("failed to parse private key: {e}")
            };
            Error::new(Op::ParseKey).with_message(message).with_source(e)
        })?;

        tracing::debug!(
            algorithm = %key.algorithm(),
            fingerprint = %key.public_key().fingerprint(HashAlg::Sha256),
            "resolved signing identity"
        );

        Ok(Self { key: Arc::new(key) })
    }

    pub fn public_key(&self) -> &ssh_key::PublicKey {
        self.key.public_key()
    }

    /// Pair the key with the hash algorithm negotiated for this connection.
    pub(crate) fn signer(&self, hash_alg: Option<HashAlg>) -> PrivateKeyWithHashAlg {
        PrivateKeyWithHashAlg::new(Arc::clone(&self.key), hash_alg)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("algorithm", &self.key.algorithm().as_str())
            .field(
                "fingerprint",
                &self.public_key().fingerprint(HashAlg::Sha256).to_string(),
            )
            .finish()
    }
}
