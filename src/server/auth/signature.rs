// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Signature algorithms and verification.
//!
//! A signature algorithm name selects a [`SignatureType`], which in turn
//! fixes the [`KeyType`] the client's key must have. Binding the two keeps a
//! client from pairing a key with an algorithm of another family.
//!
//! Verification is behind the [`SignatureVerifier`] trait; the default
//! [`SshKeyVerifier`] uses the `ssh-key` crate.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use signature::Verifier;
use ssh_key::{Algorithm, PublicKey, Signature};

use super::wire::PayloadReader;
use crate::shared::error::DecodeError;

/// Security key flag: user presence was tested.
pub const SK_USER_PRESENCE_REQD: u8 = 0x01;
/// Security key flag: user verification was performed.
pub const SK_USER_VERIFICATION_REQD: u8 = 0x04;

/// Supported signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureType {
    /// `ssh-ed25519`
    Ed25519,
    /// `sk-ssh-ed25519@openssh.com`
    SkEd25519,
    /// `ssh-rsa` (SHA-1)
    RsaSha1,
    /// `rsa-sha2-256`
    RsaSha256,
    /// `rsa-sha2-512`
    RsaSha512,
    /// `ecdsa-sha2-nistp256`
    EcdsaP256,
    /// `ecdsa-sha2-nistp384`
    EcdsaP384,
    /// `ecdsa-sha2-nistp521`
    EcdsaP521,
    /// `sk-ecdsa-sha2-nistp256@openssh.com`
    SkEcdsaP256,
}

impl SignatureType {
    const ALL: [SignatureType; 9] = [
        SignatureType::Ed25519,
        SignatureType::SkEd25519,
        SignatureType::RsaSha1,
        SignatureType::RsaSha256,
        SignatureType::RsaSha512,
        SignatureType::EcdsaP256,
        SignatureType::EcdsaP384,
        SignatureType::EcdsaP521,
        SignatureType::SkEcdsaP256,
    ];

    /// Resolve a wire algorithm name. Unknown names yield `None`.
    pub fn from_name(name: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|sig_type| sig_type.name().as_bytes() == name)
    }

    /// The wire algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            SignatureType::Ed25519 => "ssh-ed25519",
            SignatureType::SkEd25519 => "sk-ssh-ed25519@openssh.com",
            SignatureType::RsaSha1 => "ssh-rsa",
            SignatureType::RsaSha256 => "rsa-sha2-256",
            SignatureType::RsaSha512 => "rsa-sha2-512",
            SignatureType::EcdsaP256 => "ecdsa-sha2-nistp256",
            SignatureType::EcdsaP384 => "ecdsa-sha2-nistp384",
            SignatureType::EcdsaP521 => "ecdsa-sha2-nistp521",
            SignatureType::SkEcdsaP256 => "sk-ecdsa-sha2-nistp256@openssh.com",
        }
    }

    /// The key type that signs with this algorithm.
    pub fn key_type(&self) -> KeyType {
        match self {
            SignatureType::Ed25519 => KeyType::Ed25519,
            SignatureType::SkEd25519 => KeyType::SkEd25519,
            SignatureType::RsaSha1 | SignatureType::RsaSha256 | SignatureType::RsaSha512 => {
                KeyType::Rsa
            }
            SignatureType::EcdsaP256 => KeyType::EcdsaP256,
            SignatureType::EcdsaP384 => KeyType::EcdsaP384,
            SignatureType::EcdsaP521 => KeyType::EcdsaP521,
            SignatureType::SkEcdsaP256 => KeyType::SkEcdsaP256,
        }
    }

    /// Returns `true` for FIDO security key algorithms.
    pub fn is_security_key(&self) -> bool {
        self.key_type().is_security_key()
    }
}

/// Public key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// `ssh-ed25519`
    Ed25519,
    /// `sk-ssh-ed25519@openssh.com`
    SkEd25519,
    /// `ssh-rsa`
    Rsa,
    /// `ecdsa-sha2-nistp256`
    EcdsaP256,
    /// `ecdsa-sha2-nistp384`
    EcdsaP384,
    /// `ecdsa-sha2-nistp521`
    EcdsaP521,
    /// `sk-ecdsa-sha2-nistp256@openssh.com`
    SkEcdsaP256,
}

impl KeyType {
    /// The key algorithm name, as found in key blobs and authorized_keys.
    pub fn name(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => "ssh-ed25519",
            KeyType::SkEd25519 => "sk-ssh-ed25519@openssh.com",
            KeyType::Rsa => "ssh-rsa",
            KeyType::EcdsaP256 => "ecdsa-sha2-nistp256",
            KeyType::EcdsaP384 => "ecdsa-sha2-nistp384",
            KeyType::EcdsaP521 => "ecdsa-sha2-nistp521",
            KeyType::SkEcdsaP256 => "sk-ecdsa-sha2-nistp256@openssh.com",
        }
    }

    /// Returns `true` for FIDO security key types.
    pub fn is_security_key(&self) -> bool {
        matches!(self, KeyType::SkEd25519 | KeyType::SkEcdsaP256)
    }
}

/// Human-readable fingerprint of a key blob: `SHA256:` followed by the
/// unpadded base64 digest, as printed by OpenSSH.
pub fn fingerprint(key_blob: &[u8]) -> String {
    let digest = Sha256::digest(key_blob);
    format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
}

/// Decode a public key blob and check it is of the `expected` type.
pub fn decode_public_key(key_blob: &[u8], expected: KeyType) -> Result<PublicKey, DecodeError> {
    let key =
        PublicKey::from_bytes(key_blob).map_err(|e| DecodeError::InvalidKey(e.to_string()))?;

    let found = key.algorithm();
    if found.as_str() != expected.name() {
        return Err(DecodeError::KeyTypeMismatch {
            expected: expected.name().to_string(),
            found: found.as_str().to_string(),
        });
    }

    Ok(key)
}

/// A signature blob split into its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlob<'a> {
    /// Algorithm name inside the blob.
    pub algorithm: &'a [u8],
    /// Raw signature bytes.
    pub data: &'a [u8],
    /// Security key flags and counter, for `sk-*` algorithms.
    pub security_key: Option<(u8, u32)>,
}

impl<'a> SignatureBlob<'a> {
    /// Parse `string algorithm, string signature[, byte flags, uint32 counter]`.
    pub fn parse(blob: &'a [u8], sig_type: SignatureType) -> Result<Self, DecodeError> {
        let mut reader = PayloadReader::new(blob);
        let algorithm = reader.get_string("signature algorithm")?;
        let data = reader.get_string("signature")?;

        let security_key = if sig_type.is_security_key() {
            let flags = reader.get_byte("security key flags")?;
            let counter = reader.get_u32("security key counter")?;
            Some((flags, counter))
        } else {
            None
        };

        Ok(Self {
            algorithm,
            data,
            security_key,
        })
    }
}

/// Verifies public key signatures.
pub trait SignatureVerifier: Send + Sync {
    /// Returns `true` if `signature` (an SSH signature blob) by `key` over
    /// `signed_data` is valid for `sig_type`.
    ///
    /// For security key algorithms, every flag bit in `sk_flags_mask` must
    /// be set in the signature's flags.
    fn verify(
        &self,
        key: &PublicKey,
        sig_type: SignatureType,
        signature: &[u8],
        signed_data: &[u8],
        sk_flags_mask: u8,
    ) -> bool;
}

/// [`SignatureVerifier`] backed by the `ssh-key` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshKeyVerifier;

impl SignatureVerifier for SshKeyVerifier {
    fn verify(
        &self,
        key: &PublicKey,
        sig_type: SignatureType,
        signature: &[u8],
        signed_data: &[u8],
        sk_flags_mask: u8,
    ) -> bool {
        let blob = match SignatureBlob::parse(signature, sig_type) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed signature blob");
                return false;
            }
        };

        if blob.algorithm != sig_type.name().as_bytes() {
            tracing::debug!(
                expected = sig_type.name(),
                found = %String::from_utf8_lossy(blob.algorithm),
                "Signature algorithm does not match request"
            );
            return false;
        }

        let mut data = blob.data.to_vec();
        if let Some((flags, counter)) = blob.security_key {
            if flags & sk_flags_mask != sk_flags_mask {
                tracing::debug!(
                    flags = flags,
                    required = sk_flags_mask,
                    "Security key flags do not satisfy policy"
                );
                return false;
            }
            data.push(flags);
            data.extend_from_slice(&counter.to_be_bytes());
        }

        let signature = match Algorithm::new(sig_type.name())
            .and_then(|algorithm| Signature::new(algorithm, data))
        {
            Ok(signature) => signature,
            Err(e) => {
                tracing::debug!(error = %e, "Unusable signature");
                return false;
            }
        };

        match Verifier::verify(key.key_data(), signed_data, &signature) {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!(error = %e, "Signature verification failed");
                false
            }
        }
    }
}
