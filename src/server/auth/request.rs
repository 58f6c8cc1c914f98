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

//! Decoding of `publickey` authentication requests.
//!
//! ```text
//! byte      SSH_MSG_USERAUTH_REQUEST
//! string    user name
//! string    service name
//! string    "publickey"
//! boolean   FALSE (probe) / TRUE (signed attempt)
//! string    public key algorithm name
//! string    public key blob
//! string    signature                  (signed attempts only)
//! ```
//!
//! The signature covers `string session_id` followed by every payload byte
//! from the message type up to the signature field.

use bytes::{BufMut, Bytes, BytesMut};

use super::wire::{put_string, PayloadReader, SSH_MSG_USERAUTH_REQUEST};
use crate::shared::error::DecodeError;

/// The generic part of SSH_MSG_USERAUTH_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserauthHeader<'a> {
    /// Requested account name.
    pub username: &'a str,
    /// Service to start after authentication.
    pub service: &'a str,
    /// Authentication method name.
    pub method: &'a str,
}

/// Decode the generic request header, returning a reader positioned at the
/// method-specific fields. The reader's payload beginning is the message
/// type byte.
pub fn decode_userauth_header(
    payload: &[u8],
) -> Result<(UserauthHeader<'_>, PayloadReader<'_>), DecodeError> {
    let mut reader = PayloadReader::new(payload);

    let msg = reader.get_byte("message type")?;
    if msg != SSH_MSG_USERAUTH_REQUEST {
        return Err(DecodeError::UnexpectedMessage {
            expected: SSH_MSG_USERAUTH_REQUEST,
            found: msg,
        });
    }

    let username = reader.get_utf8("user name")?;
    let service = reader.get_utf8("service name")?;
    let method = reader.get_utf8("method name")?;

    Ok((
        UserauthHeader {
            username,
            service,
            method,
        },
        reader,
    ))
}

/// A decoded `publickey` request.
///
/// Holds borrowed views into the packet payload; the remaining cursor points
/// at the signature field of a signed attempt.
#[derive(Debug, Clone)]
pub struct AuthRequest<'a> {
    /// The client sent a signature (TRUE) rather than a probe (FALSE).
    pub want_signature_check: bool,
    /// Signature algorithm name, e.g. `rsa-sha2-256`.
    pub sig_algo_name: &'a [u8],
    /// Public key blob in SSH wire format.
    pub key_blob: &'a [u8],
    remaining: PayloadReader<'a>,
}

impl<'a> AuthRequest<'a> {
    /// Decode the method-specific fields from `reader`.
    pub fn decode(mut reader: PayloadReader<'a>) -> Result<Self, DecodeError> {
        let want_signature_check = reader.get_bool("signature flag")?;
        let sig_algo_name = reader.get_string("signature algorithm")?;
        let key_blob = reader.get_string("public key blob")?;

        Ok(Self {
            want_signature_check,
            sig_algo_name,
            key_blob,
            remaining: reader,
        })
    }

    /// Returns `true` if the client only asks whether the key is acceptable.
    pub fn is_probe(&self) -> bool {
        !self.want_signature_check
    }

    /// Cursor over the rest of the payload.
    pub fn remaining(&mut self) -> &mut PayloadReader<'a> {
        &mut self.remaining
    }
}

/// Build the blob a signed attempt's signature must cover.
pub fn signed_data(session_id: &[u8], payload_prefix: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + session_id.len() + payload_prefix.len());
    put_string(&mut buf, session_id);
    buf.put_slice(payload_prefix);
    buf.freeze()
}

/// Encode a `publickey` SSH_MSG_USERAUTH_REQUEST.
///
/// The signed flag is derived from `signature`: `None` builds a probe.
/// This is the client side of [`AuthRequest::decode`]; the server uses it in
/// tests and tools.
pub fn encode_publickey_request(
    username: &str,
    service: &str,
    sig_algo: &[u8],
    key_blob: &[u8],
    signature: Option<&[u8]>,
) -> Vec<u8> {
    let mut buf = encode_unsigned_prefix(username, service, sig_algo, key_blob, signature.is_some());
    if let Some(signature) = signature {
        put_string(&mut buf, signature);
    }
    buf.to_vec()
}

/// Encode everything up to the signature field of a signed request: exactly
/// the bytes a client signs after the session identifier.
pub fn encode_signed_prefix(
    username: &str,
    service: &str,
    sig_algo: &[u8],
    key_blob: &[u8],
) -> Vec<u8> {
    encode_unsigned_prefix(username, service, sig_algo, key_blob, true).to_vec()
}

fn encode_unsigned_prefix(
    username: &str,
    service: &str,
    sig_algo: &[u8],
    key_blob: &[u8],
    signed: bool,
) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(SSH_MSG_USERAUTH_REQUEST);
    put_string(&mut buf, username.as_bytes());
    put_string(&mut buf, service.as_bytes());
    put_string(&mut buf, b"publickey");
    buf.put_u8(u8::from(signed));
    put_string(&mut buf, sig_algo);
    put_string(&mut buf, key_blob);
    buf
}
