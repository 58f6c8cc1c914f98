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

//! SSH wire primitives for the user authentication protocol.
//!
//! [`PayloadReader`] is a cursor over one decrypted packet payload. It
//! remembers where the payload begins so the signed-data blob can be
//! rebuilt from the exact bytes the client sent. [`Response`] encodes the
//! three messages the public key method can answer with (RFC 4252).

use bytes::{BufMut, Bytes, BytesMut};

use crate::shared::auth_types::AuthMethods;
use crate::shared::error::DecodeError;

/// SSH_MSG_USERAUTH_REQUEST
pub const SSH_MSG_USERAUTH_REQUEST: u8 = 50;
/// SSH_MSG_USERAUTH_FAILURE
pub const SSH_MSG_USERAUTH_FAILURE: u8 = 51;
/// SSH_MSG_USERAUTH_SUCCESS
pub const SSH_MSG_USERAUTH_SUCCESS: u8 = 52;
/// SSH_MSG_USERAUTH_PK_OK
pub const SSH_MSG_USERAUTH_PK_OK: u8 = 60;

/// Cursor over a request payload.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    begin: usize,
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    /// Create a reader whose payload starts at offset 0.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            begin: 0,
            pos: 0,
        }
    }

    /// Create a reader over `data` whose payload starts at `begin` and whose
    /// cursor sits at `pos`.
    #[cfg(test)]
    pub(crate) fn with_position(data: &'a [u8], begin: usize, pos: usize) -> Result<Self, DecodeError> {
        if begin > pos || pos > data.len() {
            return Err(DecodeError::BadPosition {
                position: pos.max(begin),
                length: data.len(),
            });
        }
        Ok(Self { data, begin, pos })
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// The payload bytes from its beginning up to (not including) `end`.
    pub fn prefix(&self, end: usize) -> Result<&'a [u8], DecodeError> {
        if end < self.begin || end > self.data.len() {
            return Err(DecodeError::BadPosition {
                position: end,
                length: self.data.len(),
            });
        }
        Ok(&self.data[self.begin..end])
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::Truncated {
                field,
                needed: len,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Read a single byte.
    pub fn get_byte(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(field, 1)?[0])
    }

    /// Read an SSH boolean: any non-zero byte is true.
    pub fn get_bool(&mut self, field: &'static str) -> Result<bool, DecodeError> {
        Ok(self.get_byte(field)? != 0)
    }

    /// Read a big-endian uint32.
    pub fn get_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let bytes = self.take(field, 4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a length-prefixed byte string.
    pub fn get_string(&mut self, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let start = self.pos;
        let len = self.get_u32(field)? as usize;
        match self.take(field, len) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                self.pos = start;
                Err(e)
            }
        }
    }

    /// Read a length-prefixed string that must be UTF-8.
    pub fn get_utf8(&mut self, field: &'static str) -> Result<&'a str, DecodeError> {
        let bytes = self.get_string(field)?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { field })
    }
}

/// Append an SSH string (uint32 length + bytes).
pub fn put_string(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

/// The answer to one public key authentication request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// SSH_MSG_USERAUTH_FAILURE.
    ///
    /// `partial_success` is carried on the wire. `malformed` is not: it marks
    /// a failure that counts against the session's attempt budget (a bad
    /// continuation or a bad signature) as opposed to a plain "key not
    /// acceptable" answer.
    Failure {
        /// This method succeeded but more methods are required.
        partial_success: bool,
        /// The attempt was malformed or its signature was invalid.
        malformed: bool,
    },

    /// SSH_MSG_USERAUTH_SUCCESS.
    Success,

    /// SSH_MSG_USERAUTH_PK_OK, echoing the probed algorithm and key blob.
    PkOk {
        /// Signature algorithm name from the request.
        sig_algo: Vec<u8>,
        /// Key blob from the request.
        key_blob: Vec<u8>,
    },
}

impl Response {
    /// Plain rejection.
    pub const fn failure() -> Self {
        Response::Failure {
            partial_success: false,
            malformed: false,
        }
    }

    /// Rejection of a malformed attempt or a bad signature.
    pub const fn malformed() -> Self {
        Response::Failure {
            partial_success: false,
            malformed: true,
        }
    }

    /// This method succeeded, more are required.
    pub const fn partial_success() -> Self {
        Response::Failure {
            partial_success: true,
            malformed: false,
        }
    }

    /// Returns `true` for SSH_MSG_USERAUTH_SUCCESS.
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success)
    }

    /// Encode the message. `continue_with` is the name-list sent with a
    /// failure.
    pub fn to_bytes(&self, continue_with: &AuthMethods) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Response::Failure {
                partial_success, ..
            } => {
                buf.put_u8(SSH_MSG_USERAUTH_FAILURE);
                put_string(&mut buf, continue_with.to_string().as_bytes());
                buf.put_u8(u8::from(*partial_success));
            }
            Response::Success => {
                buf.put_u8(SSH_MSG_USERAUTH_SUCCESS);
            }
            Response::PkOk { sig_algo, key_blob } => {
                buf.put_u8(SSH_MSG_USERAUTH_PK_OK);
                put_string(&mut buf, sig_algo);
                put_string(&mut buf, key_blob);
            }
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_primitives() {
        let data = [1u8, 0, 0, 0, 3, b'a', b'b', b'c', 0, 0, 1, 0];
        let mut reader = PayloadReader::new(&data);

        assert!(reader.get_bool("flag").unwrap());
        assert_eq!(reader.get_string("name").unwrap(), b"abc");
        assert_eq!(reader.get_u32("value").unwrap(), 256);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reader_bool_nonzero_is_true() {
        let data = [7u8, 0];
        let mut reader = PayloadReader::new(&data);
        assert!(reader.get_bool("flag").unwrap());
        assert!(!reader.get_bool("flag").unwrap());
    }

    #[test]
    fn test_reader_truncated_string_keeps_position() {
        // Length claims 16 bytes, only 2 present
        let data = [0u8, 0, 0, 16, b'x', b'y'];
        let mut reader = PayloadReader::new(&data);

        let err = reader.get_string("key blob").unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                field: "key blob",
                needed: 16,
                available: 2
            }
        );
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_reader_prefix_from_payload_beginning() {
        let data = [9u8, 9, 50, 1, 2, 3];
        let mut reader = PayloadReader::with_position(&data, 2, 2).unwrap();
        reader.get_byte("type").unwrap();
        reader.get_byte("a").unwrap();

        assert_eq!(reader.prefix(reader.position()).unwrap(), &[50, 1]);
        assert!(reader.prefix(1).is_err());
        assert!(PayloadReader::with_position(&data, 3, 2).is_err());
    }

    #[test]
    fn test_reader_utf8() {
        let data = [0u8, 0, 0, 2, 0xff, 0xfe];
        let mut reader = PayloadReader::new(&data);
        assert_eq!(
            reader.get_utf8("user").unwrap_err(),
            DecodeError::InvalidUtf8 { field: "user" }
        );
    }

    #[test]
    fn test_failure_encoding_hides_malformed_flag() {
        let methods = AuthMethods::PUBLICKEY | AuthMethods::PASSWORD;
        let plain = Response::failure().to_bytes(&methods);
        let malformed = Response::malformed().to_bytes(&methods);

        assert_eq!(plain, malformed);
        assert_eq!(plain[0], SSH_MSG_USERAUTH_FAILURE);
        assert_eq!(&plain[1..5], &[0, 0, 0, 18]);
        assert_eq!(&plain[5..23], b"publickey,password");
        assert_eq!(plain[23], 0);
    }

    #[test]
    fn test_partial_success_encoding() {
        let bytes = Response::partial_success().to_bytes(&AuthMethods::PASSWORD);
        assert_eq!(bytes[0], SSH_MSG_USERAUTH_FAILURE);
        assert_eq!(&bytes[5..13], b"password");
        assert_eq!(bytes[13], 1);
    }

    #[test]
    fn test_pk_ok_encoding() {
        let response = Response::PkOk {
            sig_algo: b"ssh-ed25519".to_vec(),
            key_blob: vec![1, 2, 3],
        };
        let bytes = response.to_bytes(&AuthMethods::empty());

        assert_eq!(bytes[0], SSH_MSG_USERAUTH_PK_OK);
        let mut reader = PayloadReader::new(&bytes[1..]);
        assert_eq!(reader.get_string("algo").unwrap(), b"ssh-ed25519");
        assert_eq!(reader.get_string("blob").unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_success_encoding() {
        let bytes = Response::Success.to_bytes(&AuthMethods::PUBLICKEY);
        assert_eq!(&bytes[..], &[SSH_MSG_USERAUTH_SUCCESS]);
    }
}
