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

//! Error types for public key authentication.
//!
//! # Error Categories
//!
//! - [`ValidationError`]: Input validation failures
//! - [`DecodeError`]: Malformed wire fields in an authentication request
//! - [`OptionsError`]: Malformed authorized_keys options string
//! - [`PrivilegeError`]: Failure to assume the target account's identity
//!
//! Unacceptable keys, bad keys-file permissions and bad signatures are not
//! errors here: they are ordinary rejections reported through the
//! authentication response.

use std::fmt;

use thiserror::Error;

/// Error type for input validation failures.
///
/// # Examples
///
/// ```
/// use bssh_authkeys::shared::error::ValidationError;
///
/// let err = ValidationError::new("username", "contains invalid characters");
/// assert!(err.to_string().contains("username"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field or input that failed validation
    pub field: String,
    /// Description of why validation failed
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an error for an empty field.
    pub fn empty(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("{field} cannot be empty"),
            field,
        }
    }

    /// Create an error for a field that is too long.
    pub fn too_long(field: impl Into<String>, max_length: usize) -> Self {
        let field = field.into();
        Self {
            message: format!("{field} exceeds maximum length of {max_length}"),
            field,
        }
    }

    /// Create an error for invalid characters.
    pub fn invalid_characters(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("{field} contains invalid characters"),
            field,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation error for '{}': {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// A wire field could not be decoded from the request payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload ended before the field was complete.
    #[error("truncated {field}: need {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// A cursor position outside the payload was requested.
    #[error("position {position} is outside the payload (length {length})")]
    BadPosition { position: usize, length: usize },

    /// The message type byte is not the one expected.
    #[error("unexpected message type {found} (expected {expected})")]
    UnexpectedMessage { expected: u8, found: u8 },

    /// A field that must be UTF-8 is not.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// The public key material could not be parsed.
    #[error("invalid public key: {0}")]
    InvalidKey(String),

    /// The public key is not of the type bound to the signature algorithm.
    #[error("key type mismatch: expected {expected}, found {found}")]
    KeyTypeMismatch { expected: String, found: String },
}

/// An authorized_keys options string could not be parsed.
///
/// `line` and `origin` locate the options for the operator: the line number
/// within the keys file and the file name (or a label such as `override`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bad public key options at {origin}:{line}: {reason}")]
pub struct OptionsError {
    /// Label of the options origin.
    pub origin: String,
    /// Line number within the origin (0 when not line based).
    pub line: usize,
    /// What was wrong.
    pub reason: String,
}

impl OptionsError {
    /// Create a new options error.
    pub fn new(origin: impl Into<String>, line: usize, reason: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            line,
            reason: reason.into(),
        }
    }
}

/// The effective identity of the process could not be switched.
///
/// Failing to *assume* the account identity aborts the connection. Failing
/// to *restore* the original identity never surfaces as this error: the
/// process aborts instead.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// `setegid` to the account group failed.
    #[error("failed to set effective gid to {gid}: {source}")]
    SetGid {
        gid: u32,
        #[source]
        source: nix::Error,
    },

    /// `seteuid` to the account user failed.
    #[error("failed to set effective uid to {uid}: {source}")]
    SetUid {
        uid: u32,
        #[source]
        source: nix::Error,
    },

    /// Another identity switch is still in effect.
    #[error("effective identity is already switched")]
    AlreadySwitched,
}
