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

//! Configuration types for bssh-authkeys.
//!
//! All types support serde serialization/deserialization and fall back to
//! defaults for missing fields.

use serde::{Deserialize, Serialize};

use crate::shared::auth_types::{auth_method_names, AuthMethods};

/// Root configuration loaded from YAML files.
///
/// # Example YAML
///
/// ```yaml
/// auth:
///   methods:
///     - publickey
///     - password
///   publickey:
///     authorized_keys_dir: "~/.ssh"
///     multi_auth_method: true
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerFileConfig {
    /// Authentication configuration.
    pub auth: AuthConfig,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enabled authentication methods, by wire name.
    ///
    /// With `publickey.multi_auth_method` every listed method has to
    /// succeed before the session is authenticated.
    pub methods: Vec<String>,

    /// Public key authentication settings.
    pub publickey: PublicKeyAuthConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            methods: vec![auth_method_names::PUBLICKEY.to_string()],
            publickey: PublicKeyAuthConfig::default(),
        }
    }
}

impl AuthConfig {
    /// The configured methods as a set. Unknown names are skipped; the
    /// loader rejects them before this is used.
    pub fn method_set(&self) -> AuthMethods {
        self.methods
            .iter()
            .filter_map(|name| AuthMethods::from_name(name))
            .fold(AuthMethods::empty(), |set, method| set | method)
    }
}

/// Public key authentication settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PublicKeyAuthConfig {
    /// Directory holding the authorized_keys file.
    ///
    /// A leading `~` expands to the account's home directory and `{user}`
    /// to the (validated) username, e.g. `/etc/ssh/keys/{user}`.
    pub authorized_keys_dir: String,

    /// File name inside `authorized_keys_dir`.
    pub authorized_keys_file: String,

    /// Break-glass key accepted for every account, in authorized_keys line
    /// format. Bypasses the keys file entirely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_authorized_key: Option<String>,

    /// Require every configured method, not just one of them.
    pub multi_auth_method: bool,

    /// Assume the account's uid/gid while inspecting the keys file.
    pub switch_identity: bool,

    /// Malformed or failed attempts allowed per session.
    pub max_auth_tries: u32,
}

impl Default for PublicKeyAuthConfig {
    fn default() -> Self {
        Self {
            authorized_keys_dir: "~/.ssh".to_string(),
            authorized_keys_file: "authorized_keys".to_string(),
            override_authorized_key: None,
            multi_auth_method: false,
            switch_identity: true,
            max_auth_tries: 10,
        }
    }
}

impl PublicKeyAuthConfig {
    /// Use keys from `dir` (supports `~` and `{user}`).
    pub fn with_directory(dir: impl Into<String>) -> Self {
        Self {
            authorized_keys_dir: dir.into(),
            ..Self::default()
        }
    }

    /// Set the override key line.
    pub fn with_override_key(mut self, line: impl Into<String>) -> Self {
        self.override_authorized_key = Some(line.into());
        self
    }

    /// Enable or disable the identity switch.
    pub fn with_switch_identity(mut self, enabled: bool) -> Self {
        self.switch_identity = enabled;
        self
    }

    /// Enable or disable multi-method authentication.
    pub fn with_multi_auth_method(mut self, enabled: bool) -> Self {
        self.multi_auth_method = enabled;
        self
    }
}
