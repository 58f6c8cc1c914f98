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

//! External key authorities.
//!
//! A [`KeyAuthority`] is an alternate source of authorization decisions,
//! consulted before the authorized_keys file. Typical backends ask a
//! directory service or a certificate store. A session holds at most one.
//!
//! # Implementing KeyAuthority
//!
//! ```
//! use bssh_authkeys::server::auth::KeyAuthority;
//! use bssh_authkeys::shared::AuthResult;
//!
//! struct DenyAll;
//!
//! impl KeyAuthority for DenyAll {
//!     fn check_key(&mut self, _algo: &str, _blob: &[u8], _user: &str) -> AuthResult {
//!         AuthResult::Reject
//!     }
//! }
//! ```

use crate::shared::auth_types::AuthResult;

/// Alternate authorization backend for public keys.
///
/// An authority is per session and may keep state between calls, e.g. the
/// identity it resolved for an accepted key.
pub trait KeyAuthority: Send {
    /// Decide whether `key_blob` (of key algorithm `key_algo`) may log in
    /// as `username`.
    fn check_key(&mut self, key_algo: &str, key_blob: &[u8], username: &str) -> AuthResult;

    /// Options to apply to the key accepted by the last `check_key`, in
    /// authorized_keys option syntax.
    fn options(&self) -> Option<String> {
        None
    }

    /// The signature for the accepted key was verified.
    fn notify_success(&mut self) {}
}

/// An authority backed by a fixed list of keys.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyAuthority {
    entries: Vec<StaticEntry>,
    accepted: Option<usize>,
    successes: usize,
}

#[derive(Debug, Clone)]
struct StaticEntry {
    username: String,
    key_blob: Vec<u8>,
    options: Option<String>,
}

impl StaticKeyAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorize `key_blob` for `username`, optionally with options.
    pub fn with_key(
        mut self,
        username: impl Into<String>,
        key_blob: impl Into<Vec<u8>>,
        options: Option<&str>,
    ) -> Self {
        self.entries.push(StaticEntry {
            username: username.into(),
            key_blob: key_blob.into(),
            options: options.map(str::to_string),
        });
        self
    }

    /// Number of verified logins reported through
    /// [`KeyAuthority::notify_success`].
    pub fn successes(&self) -> usize {
        self.successes
    }
}

impl KeyAuthority for StaticKeyAuthority {
    fn check_key(&mut self, key_algo: &str, key_blob: &[u8], username: &str) -> AuthResult {
        self.accepted = self
            .entries
            .iter()
            .position(|entry| entry.username == username && entry.key_blob == key_blob);

        tracing::debug!(
            user = %username,
            algorithm = %key_algo,
            accepted = self.accepted.is_some(),
            "Static key authority checked key"
        );
        AuthResult::from(self.accepted.is_some())
    }

    fn options(&self) -> Option<String> {
        self.accepted
            .and_then(|index| self.entries.get(index))
            .and_then(|entry| entry.options.clone())
    }

    fn notify_success(&mut self) {
        self.successes += 1;
    }
}
