//! Key file identities for "publickey" authentication.
//!
//! OpenSSH private key files (optionally passphrase protected) are parsed
//! with `ssh-key`; signing uses `ed25519-dalek`. Only Ed25519 keys can sign.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use tether_proto::ssh::identity::Identity;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = Identity::from_files(Path::new("/home/me/.ssh/id_ed25519"), None, None)?;
//! assert_eq!(identity.algorithm(), "ssh-ed25519");
//! let signature = identity.sign(b"data to sign");
//! # Ok(())
//! # }
//! ```

use crate::ssh::wire::write_bytes;
use crate::ssh::wire::write_string;
use bytes::BytesMut;
use ed25519_dalek::{Signer, SigningKey};
use ssh_key::{PrivateKey, PublicKey};
use std::fmt;
use std::path::Path;
use tether_platform::{TetherError, TetherResult};
use tracing::debug;

/// A loaded key pair able to sign authentication requests.
pub struct Identity {
    algorithm: String,
    public_blob: Vec<u8>,
    signing_key: SigningKey,
}

impl Identity {
    /// Loads an identity from an OpenSSH private key file.
    ///
    /// When `public_key` is given, it must describe the same key.
    ///
    /// # Errors
    ///
    /// - [`TetherError::Io`] if a file cannot be read
    /// - [`TetherError::Authentication`] if the key cannot be decoded,
    ///   decrypted, or is not an Ed25519 key
    pub fn from_files(
        private_key: &Path,
        public_key: Option<&Path>,
        passphrase: Option<&str>,
    ) -> TetherResult<Self> {
        let text = std::fs::read_to_string(private_key)?;
        let identity = Self::from_openssh(&text, passphrase)?;

        if let Some(path) = public_key {
            let text = std::fs::read_to_string(path)?;
            let public = PublicKey::from_openssh(text.trim()).map_err(|e| {
                TetherError::Authentication(format!("Invalid public key file: {}", e))
            })?;
            let blob = public.to_bytes().map_err(|e| {
                TetherError::Authentication(format!("Cannot encode public key: {}", e))
            })?;
            if blob != identity.public_blob {
                return Err(TetherError::Authentication(
                    "Public key file does not match the private key".to_string(),
                ));
            }
        }

        debug!("Loaded {} identity from {}", identity.algorithm, private_key.display());
        Ok(identity)
    }

    /// Decodes an identity from OpenSSH private key text.
    pub fn from_openssh(text: &str, passphrase: Option<&str>) -> TetherResult<Self> {
        let mut key = PrivateKey::from_openssh(text)
            .map_err(|e| TetherError::Authentication(format!("Invalid private key: {}", e)))?;

        if key.is_encrypted() {
            let passphrase = passphrase.ok_or_else(|| {
                TetherError::Authentication("Private key is encrypted".to_string())
            })?;
            key = key.decrypt(passphrase).map_err(|e| {
                TetherError::Authentication(format!("Cannot decrypt private key: {}", e))
            })?;
        }

        let keypair = key.key_data().ed25519().ok_or_else(|| {
            TetherError::Authentication(format!(
                "Unsupported key algorithm: {}",
                key.algorithm().as_str()
            ))
        })?;
        let signing_key = SigningKey::from_bytes(&keypair.private.to_bytes());

        let public_blob = key.public_key().to_bytes().map_err(|e| {
            TetherError::Authentication(format!("Cannot encode public key: {}", e))
        })?;

        Ok(Self {
            algorithm: key.algorithm().as_str().to_string(),
            public_blob,
            signing_key,
        })
    }

    /// Returns the public key algorithm name.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Returns the public key blob in SSH wire format.
    pub fn public_blob(&self) -> &[u8] {
        &self.public_blob
    }

    /// Signs `data` and returns an SSH signature blob.
    ///
    /// ```text
    /// string    "ssh-ed25519"
    /// string    signature (64 bytes)
    /// ```
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signature = self.signing_key.sign(data);
        let mut buf = BytesMut::new();
        write_string(&mut buf, &self.algorithm);
        write_bytes(&mut buf, &signature.to_bytes());
        buf.to_vec()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("algorithm", &self.algorithm)
            .field("public_blob", &hex::encode(&self.public_blob))
            .finish_non_exhaustive()
    }
}
