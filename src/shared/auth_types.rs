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

//! Shared authentication types.
//!
//! # Types
//!
//! - [`AuthResult`]: The verdict of an external key authority
//! - [`UserInfo`]: Account context of the user being authenticated
//! - [`AuthMethods`]: Set of authentication methods still required

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// The result of asking an authentication backend about a key.
///
/// # Examples
///
/// ```
/// use bssh_authkeys::shared::auth_types::AuthResult;
///
/// let result = AuthResult::from(true);
/// assert!(result.is_accepted());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthResult {
    /// The backend accepts the key.
    Accept,

    /// The backend does not accept the key.
    #[default]
    Reject,
}

impl AuthResult {
    /// Returns `true` if the key was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, AuthResult::Accept)
    }

    /// Returns `true` if the key was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, AuthResult::Reject)
    }
}

impl From<bool> for AuthResult {
    fn from(accepted: bool) -> Self {
        if accepted {
            AuthResult::Accept
        } else {
            AuthResult::Reject
        }
    }
}

/// Account context for the user being authenticated.
///
/// This is supplied by the caller (password database lookup is not done by
/// the authentication core itself), except through [`UserInfo::from_system`]
/// which is a convenience for tools.
///
/// # Examples
///
/// ```
/// use bssh_authkeys::shared::auth_types::UserInfo;
///
/// let user = UserInfo::new("johndoe", 1000, 1000)
///     .with_home_dir("/srv/johndoe")
///     .with_display_name("John Doe");
///
/// assert_eq!(user.username, "johndoe");
/// assert_eq!(user.uid, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// The account name.
    pub username: String,

    /// The account's home directory.
    pub home_dir: PathBuf,

    /// Numeric user ID.
    pub uid: u32,

    /// Primary group ID.
    pub gid: u32,

    /// Display name or full name of the user.
    pub display_name: Option<String>,
}

impl UserInfo {
    /// Create a new UserInfo with home directory `/home/<username>`.
    pub fn new(username: impl Into<String>, uid: u32, gid: u32) -> Self {
        let username = username.into();
        Self {
            home_dir: PathBuf::from(format!("/home/{username}")),
            username,
            uid,
            gid,
            display_name: None,
        }
    }

    /// Look up an account in the system user database.
    ///
    /// Returns `Ok(None)` if no such account exists.
    pub fn from_system(username: &str) -> Result<Option<Self>> {
        let user = nix::unistd::User::from_name(username)
            .with_context(|| format!("Failed to look up user '{username}'"))?;

        Ok(user.map(|user| {
            let gecos = user.gecos.to_string_lossy().into_owned();
            let display_name = gecos
                .split(',')
                .next()
                .filter(|name| !name.is_empty())
                .map(str::to_string);

            Self {
                username: user.name,
                home_dir: user.dir,
                uid: user.uid.as_raw(),
                gid: user.gid.as_raw(),
                display_name,
            }
        }))
    }

    /// Set the home directory.
    pub fn with_home_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.home_dir = path.into();
        self
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Common SSH authentication method identifiers (RFC 4252).
pub mod auth_method_names {
    /// Password authentication (RFC 4252)
    pub const PASSWORD: &str = "password";

    /// Public key authentication (RFC 4252)
    pub const PUBLICKEY: &str = "publickey";

    /// Keyboard-interactive authentication (RFC 4256)
    pub const KEYBOARD_INTERACTIVE: &str = "keyboard-interactive";
}

/// A set of authentication methods.
///
/// Used as the per-session record of which methods still have to succeed,
/// and rendered as the name-list carried by `SSH_MSG_USERAUTH_FAILURE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthMethods(u8);

impl AuthMethods {
    /// Public key authentication.
    pub const PUBLICKEY: Self = Self(0b001);
    /// Password authentication.
    pub const PASSWORD: Self = Self(0b010);
    /// Keyboard-interactive authentication.
    pub const KEYBOARD_INTERACTIVE: Self = Self(0b100);

    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns `true` if no method is in the set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every method in `other` is in the set.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Add the methods of `other` to the set.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Remove the methods of `other` from the set.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Returns `true` if the set holds any method outside `other`.
    pub fn has_other_than(&self, other: Self) -> bool {
        self.0 & !other.0 != 0
    }

    /// Look up a single method by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            auth_method_names::PUBLICKEY => Some(Self::PUBLICKEY),
            auth_method_names::PASSWORD => Some(Self::PASSWORD),
            auth_method_names::KEYBOARD_INTERACTIVE => Some(Self::KEYBOARD_INTERACTIVE),
            _ => None,
        }
    }

    /// Method names in wire order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(Self::PUBLICKEY) {
            names.push(auth_method_names::PUBLICKEY);
        }
        if self.contains(Self::PASSWORD) {
            names.push(auth_method_names::PASSWORD);
        }
        if self.contains(Self::KEYBOARD_INTERACTIVE) {
            names.push(auth_method_names::KEYBOARD_INTERACTIVE);
        }
        names
    }
}

impl std::ops::BitOr for AuthMethods {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for AuthMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_result_states() {
        let accept = AuthResult::Accept;
        assert!(accept.is_accepted());
        assert!(!accept.is_rejected());

        let reject = AuthResult::default();
        assert!(!reject.is_accepted());
        assert!(reject.is_rejected());

        assert_eq!(AuthResult::from(true), AuthResult::Accept);
        assert_eq!(AuthResult::from(false), AuthResult::Reject);
    }

    #[test]
    fn test_user_info_builder() {
        let user = UserInfo::new("testuser", 1001, 1002)
            .with_home_dir("/custom/home")
            .with_display_name("Test User");

        assert_eq!(user.username, "testuser");
        assert_eq!(user.home_dir, PathBuf::from("/custom/home"));
        assert_eq!(user.uid, 1001);
        assert_eq!(user.gid, 1002);
        assert_eq!(user.display_name, Some("Test User".to_string()));
    }

    #[test]
    fn test_user_info_default_home() {
        let user = UserInfo::new("alice", 1000, 1000);
        assert_eq!(user.home_dir, PathBuf::from("/home/alice"));
    }

    #[test]
    fn test_user_info_from_system_unknown() {
        let user = UserInfo::from_system("no-such-user-bssh-authkeys").unwrap();
        assert!(user.is_none());
    }

    #[test]
    fn test_auth_methods_set_operations() {
        let mut methods = AuthMethods::PUBLICKEY | AuthMethods::PASSWORD;
        assert!(methods.contains(AuthMethods::PUBLICKEY));
        assert!(methods.has_other_than(AuthMethods::PUBLICKEY));
        assert_eq!(methods.to_string(), "publickey,password");

        methods.remove(AuthMethods::PASSWORD);
        assert!(!methods.has_other_than(AuthMethods::PUBLICKEY));
        assert_eq!(methods.names(), vec!["publickey"]);

        methods.remove(AuthMethods::PUBLICKEY);
        assert!(methods.is_empty());
        assert_eq!(methods.to_string(), "");
    }
}
