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

//! Server-side public key authentication.
//!
//! # Architecture
//!
//! - [`PublicKeyAuthenticator`] decodes `publickey` requests, drives the
//!   decision and verifies signatures.
//! - [`DecisionEngine`] decides whether a key is authorized for an account,
//!   from the override key or the account's authorized_keys file.
//! - [`authorized_keys`] matches single lines; [`options`] parses the
//!   option strings found there.
//! - [`permissions`] checks ownership and modes along the path to the file,
//!   which is opened under an [`IdentityGuard`].
//! - [`KeyAuthority`] is an optional external decision source.
//!
//! # Usage
//!
//! ```no_run
//! use bssh_authkeys::server::auth::{AuthSession, PublicKeyAuthenticator};
//! use bssh_authkeys::server::config::PublicKeyAuthConfig;
//! use bssh_authkeys::shared::{AuthMethods, UserInfo};
//!
//! # fn example(session_id: &[u8], payload: &[u8]) -> anyhow::Result<()> {
//! let authenticator = PublicKeyAuthenticator::new(PublicKeyAuthConfig::default());
//! let mut session = AuthSession::new(session_id, AuthMethods::PUBLICKEY);
//!
//! let response = authenticator.handle_request(&mut session, payload, |name| {
//!     UserInfo::from_system(name).ok().flatten()
//! })?;
//! let reply = response.to_bytes(&session.remaining_methods());
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod authority;
pub mod authorized_keys;
pub mod decision;
pub mod identity;
pub mod keyfile;
pub mod options;
pub mod permissions;
pub mod publickey;
pub mod request;
pub mod session;
pub mod signature;
pub mod wire;

pub use self::authority::{KeyAuthority, StaticKeyAuthority};
pub use self::authorized_keys::{match_line, LineMatch, LineReader, MAX_LINE, MIN_LINE};
pub use self::decision::{AuthorizationOutcome, DecisionEngine, KeySource};
pub use self::identity::IdentityGuard;
pub use self::keyfile::authorized_keys_path;
pub use self::options::KeyOptions;
pub use self::permissions::{validate_path, PathPermission, PermissionWarnings};
pub use self::publickey::PublicKeyAuthenticator;
pub use self::request::{decode_userauth_header, AuthRequest, UserauthHeader};
pub use self::session::AuthSession;
pub use self::signature::{
    fingerprint, KeyType, SignatureType, SignatureVerifier, SshKeyVerifier,
};
pub use self::wire::{PayloadReader, Response};

// Re-export shared auth types for convenience
pub use crate::shared::auth_types::{AuthResult, UserInfo};
