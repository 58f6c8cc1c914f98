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

//! Location of an account's authorized_keys file.

use std::path::PathBuf;

use crate::server::config::PublicKeyAuthConfig;
use crate::shared::auth_types::UserInfo;
use crate::shared::error::ValidationError;
use crate::shared::validation::{validate_file_name, validate_username};

/// Resolve the authorized_keys path for `account`.
///
/// In `authorized_keys_dir`, `{user}` is replaced by the username (which
/// must pass [`validate_username`]) and a leading `~` by the home
/// directory. Relative directories are taken relative to the home
/// directory.
pub fn authorized_keys_path(
    config: &PublicKeyAuthConfig,
    account: &UserInfo,
) -> Result<PathBuf, ValidationError> {
    let file_name = validate_file_name("authorized_keys_file", &config.authorized_keys_file)?;

    let mut dir = config.authorized_keys_dir.clone();
    if dir.contains("{user}") {
        let username = validate_username(&account.username)?;
        dir = dir.replace("{user}", username);
    }

    let dir = if dir == "~" {
        account.home_dir.clone()
    } else if let Some(rest) = dir.strip_prefix("~/") {
        account.home_dir.join(rest)
    } else {
        account.home_dir.join(dir)
    };

    Ok(dir.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserInfo {
        UserInfo::new("alice", 1000, 1000).with_home_dir("/home/alice")
    }

    #[test]
    fn test_default_path() {
        let path = authorized_keys_path(&PublicKeyAuthConfig::default(), &alice()).unwrap();
        assert_eq!(path, PathBuf::from("/home/alice/.ssh/authorized_keys"));
    }

    #[test]
    fn test_user_placeholder() {
        let config = PublicKeyAuthConfig::with_directory("/etc/ssh/keys/{user}");
        let path = authorized_keys_path(&config, &alice()).unwrap();
        assert_eq!(path, PathBuf::from("/etc/ssh/keys/alice/authorized_keys"));
    }

    #[test]
    fn test_home_and_relative_dirs() {
        let config = PublicKeyAuthConfig::with_directory("~");
        let path = authorized_keys_path(&config, &alice()).unwrap();
        assert_eq!(path, PathBuf::from("/home/alice/authorized_keys"));

        let config = PublicKeyAuthConfig::with_directory(".config/ssh");
        let path = authorized_keys_path(&config, &alice()).unwrap();
        assert_eq!(path, PathBuf::from("/home/alice/.config/ssh/authorized_keys"));
    }

    #[test]
    fn test_custom_file_name() {
        let config = PublicKeyAuthConfig {
            authorized_keys_file: "authorized_keys2".to_string(),
            ..PublicKeyAuthConfig::default()
        };
        let path = authorized_keys_path(&config, &alice()).unwrap();
        assert_eq!(path, PathBuf::from("/home/alice/.ssh/authorized_keys2"));
    }

    #[test]
    fn test_placeholder_rejects_traversal() {
        let config = PublicKeyAuthConfig::with_directory("/etc/ssh/keys/{user}");
        let account = UserInfo::new("../root", 0, 0);
        assert!(authorized_keys_path(&config, &account).is_err());
    }

    #[test]
    fn test_bad_file_name_rejected() {
        let config = PublicKeyAuthConfig {
            authorized_keys_file: "../../etc/shadow".to_string(),
            ..PublicKeyAuthConfig::default()
        };
        assert!(authorized_keys_path(&config, &alice()).is_err());
    }
}
