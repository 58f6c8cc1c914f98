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

//! Per-connection authentication state.

use std::fmt;
use std::net::SocketAddr;

use super::authority::KeyAuthority;
use super::options::KeyOptions;
use super::permissions::PermissionWarnings;
use crate::shared::auth_types::AuthMethods;

/// Number of failed attempts allowed when neither the session nor the
/// configuration sets a limit.
pub const DEFAULT_MAX_AUTH_TRIES: u32 = 10;

/// Authentication state of one SSH connection.
///
/// Requests on a connection are handled one at a time, so the state is
/// owned and mutated without synchronization.
pub struct AuthSession {
    session_id: Vec<u8>,
    peer: Option<SocketAddr>,
    remaining: AuthMethods,
    auth_done: bool,
    failures: u32,
    max_auth_tries: Option<u32>,
    pubkey_options: Option<KeyOptions>,
    pubkey_info: Option<String>,
    pub(crate) perm_warnings: PermissionWarnings,
    pub(crate) authority: Option<Box<dyn KeyAuthority>>,
}

impl AuthSession {
    /// Create the state for a session with identifier `session_id`, where
    /// `required` lists the methods that must succeed.
    pub fn new(session_id: impl Into<Vec<u8>>, required: AuthMethods) -> Self {
        Self {
            session_id: session_id.into(),
            peer: None,
            remaining: required,
            auth_done: false,
            failures: 0,
            max_auth_tries: None,
            pubkey_options: None,
            pubkey_info: None,
            perm_warnings: PermissionWarnings::new(),
            authority: None,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Limit failed attempts for this session. Without it the limit comes
    /// from the authenticator's configuration.
    pub fn with_max_auth_tries(mut self, tries: u32) -> Self {
        self.max_auth_tries = Some(tries);
        self
    }

    /// Consult `authority` before the authorized_keys file.
    pub fn with_authority(mut self, authority: Box<dyn KeyAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn session_id(&self) -> &[u8] {
        &self.session_id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Peer address for log records.
    pub(crate) fn peer_display(&self) -> String {
        self.peer
            .map_or_else(|| "unknown".to_string(), |peer| peer.to_string())
    }

    /// Methods that still have to succeed.
    pub fn remaining_methods(&self) -> AuthMethods {
        self.remaining
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_done
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Returns `true` once the session used up its failed attempts; the
    /// transport should disconnect.
    pub fn exhausted(&self) -> bool {
        self.failures >= self.max_auth_tries()
    }

    /// Failed attempts allowed before [`exhausted`](Self::exhausted).
    pub fn max_auth_tries(&self) -> u32 {
        self.max_auth_tries.unwrap_or(DEFAULT_MAX_AUTH_TRIES)
    }

    /// Apply the configured limit unless the session set its own.
    pub(crate) fn default_max_auth_tries(&mut self, tries: u32) {
        self.max_auth_tries.get_or_insert(tries);
    }

    /// Options of the key that authenticated the session.
    pub fn pubkey_options(&self) -> Option<&KeyOptions> {
        self.pubkey_options.as_ref()
    }

    /// Info field of the key that authenticated the session, suitable for
    /// export as `SSH_PUBKEYINFO`.
    pub fn pubkey_info(&self) -> Option<&str> {
        self.pubkey_info.as_deref()
    }

    pub(crate) fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Mark the session fully authenticated.
    pub(crate) fn mark_authenticated(&mut self) {
        self.remaining = AuthMethods::empty();
        self.auth_done = true;
    }

    /// Mark `method` as passed while others remain.
    pub(crate) fn complete_method(&mut self, method: AuthMethods) {
        self.remaining.remove(method);
    }

    /// Keep the key state of a successful authentication.
    pub(crate) fn retain_pubkey_state(&mut self, options: Option<KeyOptions>, info: Option<String>) {
        self.pubkey_options = options;
        self.pubkey_info = info;
    }

    /// Drop key state unless the session is authenticated.
    pub(crate) fn discard_unless_authenticated(&mut self) {
        if !self.auth_done {
            self.pubkey_options = None;
            self.pubkey_info = None;
        }
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("peer", &self.peer)
            .field("remaining", &self.remaining)
            .field("auth_done", &self.auth_done)
            .field("failures", &self.failures)
            .field("max_auth_tries", &self.max_auth_tries())
            .field("pubkey_options", &self.pubkey_options)
            .field("has_authority", &self.authority.is_some())
            .finish_non_exhaustive()
    }
}
