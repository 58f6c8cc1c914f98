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

//! Authorization decisions for a candidate key.
//!
//! The [`DecisionEngine`] answers whether a key (algorithm and blob) is
//! authorized for an account, looking at the override key and then at the
//! account's authorized_keys file.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::authorized_keys::{match_line, LineMatch, LineReader, MAX_LINE};
use super::identity::IdentityGuard;
use super::keyfile::authorized_keys_path;
use super::options::KeyOptions;
use super::permissions::{validate_path, PermissionWarnings};
use super::signature::fingerprint;
use crate::server::config::PublicKeyAuthConfig;
use crate::shared::auth_types::UserInfo;
use crate::shared::error::PrivilegeError;

/// Label used for the override key in diagnostics.
pub const OVERRIDE_ORIGIN: &str = "override";

/// Where an accepted key was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// The configured override key.
    Override,
    /// A line of an authorized_keys file.
    AuthorizedKeys { path: PathBuf, line: usize },
    /// An external key authority.
    Authority,
}

/// The verdict for one candidate key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationOutcome {
    pub accepted: bool,
    /// Options of the accepted entry.
    pub options: Option<KeyOptions>,
    /// Allow-listed info field of the accepted entry.
    pub info: Option<String>,
    pub source: Option<KeySource>,
}

impl AuthorizationOutcome {
    pub fn rejected() -> Self {
        Self::default()
    }

    pub fn accepted(source: KeySource, options: Option<KeyOptions>, info: Option<String>) -> Self {
        Self {
            accepted: true,
            options,
            info,
            source: Some(source),
        }
    }
}

/// Decides whether keys are authorized under a [`PublicKeyAuthConfig`].
#[derive(Debug, Clone, Copy)]
pub struct DecisionEngine<'a> {
    config: &'a PublicKeyAuthConfig,
}

impl<'a> DecisionEngine<'a> {
    pub fn new(config: &'a PublicKeyAuthConfig) -> Self {
        Self { config }
    }

    /// Decide whether `key_blob` of key algorithm `key_algo` may log in as
    /// `account`.
    ///
    /// Only a failure to assume the account identity is an error; every
    /// other problem (missing file, bad permissions, bad options) is a
    /// rejection.
    pub fn decide(
        &self,
        key_algo: &str,
        key_blob: &[u8],
        account: &UserInfo,
        warnings: &mut PermissionWarnings,
    ) -> Result<AuthorizationOutcome, PrivilegeError> {
        if let Some(outcome) = self.check_override(key_algo, key_blob, account) {
            return Ok(outcome);
        }

        let Some((path, file)) = self.open_keys_file(account, warnings)? else {
            return Ok(AuthorizationOutcome::rejected());
        };

        Ok(scan_keys_file(file, &path, key_algo, key_blob))
    }

    /// Match the override key. Returns `None` when it is not configured or
    /// does not match, so the keys file is consulted.
    fn check_override(
        &self,
        key_algo: &str,
        key_blob: &[u8],
        account: &UserInfo,
    ) -> Option<AuthorizationOutcome> {
        let line = self.config.override_authorized_key.as_deref()?;

        let LineMatch::Accepted { options, info } = match_line(line.as_bytes(), key_algo, key_blob)
        else {
            tracing::debug!(user = %account.username, "Override key does not match");
            return None;
        };

        let options = match options.map(|o| KeyOptions::parse(o, 1, OVERRIDE_ORIGIN)).transpose() {
            Ok(options) => options,
            Err(e) => {
                tracing::warn!(error = %e, "Rejecting override key with bad options");
                return Some(AuthorizationOutcome::rejected());
            }
        };

        tracing::warn!(
            user = %account.username,
            fingerprint = %fingerprint(key_blob),
            "Accepted override authorized key"
        );
        Some(AuthorizationOutcome::accepted(KeySource::Override, options, info))
    }

    /// Resolve, check and open the keys file as the account.
    fn open_keys_file(
        &self,
        account: &UserInfo,
        warnings: &mut PermissionWarnings,
    ) -> Result<Option<(PathBuf, File)>, PrivilegeError> {
        let guard = if self.config.switch_identity {
            IdentityGuard::assume(account.uid, account.gid)?
        } else {
            IdentityGuard::unchanged()
        };

        let opened = match authorized_keys_path(self.config, account) {
            Ok(path) if validate_path(&path, &account.home_dir, account.uid, warnings) => {
                match File::open(&path) {
                    Ok(file) => {
                        tracing::trace!(
                            path = %path.display(),
                            as_account = guard.is_switched(),
                            "Opened authorized_keys"
                        );
                        Some((path, file))
                    }
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "Failed to open authorized_keys");
                        None
                    }
                }
            }
            Ok(path) => {
                tracing::debug!(
                    path = %path.display(),
                    "Bad authorized_keys permissions, or file doesn't exist"
                );
                None
            }
            Err(e) => {
                tracing::debug!(user = %account.username, error = %e, "Cannot resolve authorized_keys path");
                None
            }
        };

        guard.release();
        Ok(opened)
    }
}

/// Scan an opened keys file for the first line authorizing the key.
fn scan_keys_file(
    file: File,
    path: &Path,
    key_algo: &str,
    key_blob: &[u8],
) -> AuthorizationOutcome {
    let origin = path.display().to_string();
    let mut reader = LineReader::new(BufReader::new(file));
    let mut line = Vec::with_capacity(MAX_LINE + 1);
    let mut line_num = 0;

    loop {
        match reader.read_line(&mut line) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                tracing::debug!(path = %origin, error = %e, "Error reading authorized_keys");
                break;
            }
        }
        line_num += 1;

        let LineMatch::Accepted { options, info } = match_line(&line, key_algo, key_blob) else {
            continue;
        };

        // A matching line with options we cannot parse fails the request.
        return match options.map(|o| KeyOptions::parse(o, line_num, &origin)).transpose() {
            Ok(options) => {
                tracing::debug!(path = %origin, line = line_num, "Key matched authorized_keys entry");
                AuthorizationOutcome::accepted(
                    KeySource::AuthorizedKeys {
                        path: path.to_path_buf(),
                        line: line_num,
                    },
                    options,
                    info,
                )
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rejecting key with bad options");
                AuthorizationOutcome::rejected()
            }
        };
    }

    tracing::trace!(path = %origin, lines = line_num, "authorized_keys EOF reached");
    AuthorizationOutcome::rejected()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::auth::wire::put_string;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::BytesMut;
    use serial_test::serial;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const ALGO: &str = "ssh-ed25519";

    fn key_blob(seed: u8) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, ALGO.as_bytes());
        put_string(&mut buf, &[seed; 32]);
        buf.to_vec()
    }

    fn entry(seed: u8) -> String {
        format!("{ALGO} {}", STANDARD.encode(key_blob(seed)))
    }

    struct Home {
        _temp: TempDir,
        account: UserInfo,
    }

    impl Home {
        fn new(keys: &str) -> Self {
            let temp = TempDir::new().unwrap();
            let home = temp.path().join("alice");
            let ssh_dir = home.join(".ssh");
            fs::create_dir_all(&ssh_dir).unwrap();
            fs::set_permissions(&home, fs::Permissions::from_mode(0o755)).unwrap();
            fs::set_permissions(&ssh_dir, fs::Permissions::from_mode(0o700)).unwrap();

            let keys_file = ssh_dir.join("authorized_keys");
            fs::write(&keys_file, keys).unwrap();
            fs::set_permissions(&keys_file, fs::Permissions::from_mode(0o600)).unwrap();

            let account = UserInfo::new(
                "alice",
                nix::unistd::getuid().as_raw(),
                nix::unistd::getgid().as_raw(),
            )
            .with_home_dir(home);

            Self {
                _temp: temp,
                account,
            }
        }

        fn ssh_dir(&self) -> PathBuf {
            self.account.home_dir.join(".ssh")
        }

        fn keys_file(&self) -> PathBuf {
            self.ssh_dir().join("authorized_keys")
        }
    }

    fn config() -> PublicKeyAuthConfig {
        PublicKeyAuthConfig::default().with_switch_identity(false)
    }

    fn decide(config: &PublicKeyAuthConfig, home: &Home, seed: u8) -> AuthorizationOutcome {
        DecisionEngine::new(config)
            .decide(ALGO, &key_blob(seed), &home.account, &mut PermissionWarnings::new())
            .unwrap()
    }

    #[test]
    fn test_accepts_listed_key() {
        let keys = format!("# keys\n\n{}\n{} laptop\n", entry(1), entry(2));
        let home = Home::new(&keys);

        let outcome = decide(&config(), &home, 2);
        assert!(outcome.accepted);
        assert_eq!(outcome.info.as_deref(), Some("laptop"));
        assert!(outcome.options.is_none());
        assert_eq!(
            outcome.source,
            Some(KeySource::AuthorizedKeys {
                path: home.keys_file(),
                line: 4
            })
        );
    }

    #[test]
    fn test_rejects_unlisted_key() {
        let home = Home::new(&format!("{}\n", entry(1)));
        assert_eq!(decide(&config(), &home, 9), AuthorizationOutcome::rejected());
    }

    #[test]
    fn test_first_matching_line_wins() {
        let keys = format!("no-pty {}\ncommand=\"true\" {}\n", entry(3), entry(3));
        let home = Home::new(&keys);

        let outcome = decide(&config(), &home, 3);
        let options = outcome.options.unwrap();
        assert!(options.no_pty);
        assert!(options.command.is_none());
    }

    #[test]
    fn test_bad_options_fail_closed() {
        let keys = format!("bogus-option {}\n{}\n", entry(4), entry(4));
        let home = Home::new(&keys);
        assert!(!decide(&config(), &home, 4).accepted);
    }

    #[test]
    fn test_bad_permissions_reject() {
        let home = Home::new(&format!("{}\n", entry(5)));
        fs::set_permissions(home.ssh_dir(), fs::Permissions::from_mode(0o770)).unwrap();

        let mut warnings = PermissionWarnings::new();
        let outcome = DecisionEngine::new(&config())
            .decide(ALGO, &key_blob(5), &home.account, &mut warnings)
            .unwrap();
        assert!(!outcome.accepted);
        assert!(!warnings.is_empty());
    }

    #[test]
    fn test_missing_file_rejects() {
        let home = Home::new("");
        fs::remove_file(home.keys_file()).unwrap();
        assert!(!decide(&config(), &home, 1).accepted);
    }

    #[test]
    fn test_override_key_bypasses_file() {
        let home = Home::new("");
        fs::remove_file(home.keys_file()).unwrap();
        fs::set_permissions(home.ssh_dir(), fs::Permissions::from_mode(0o777)).unwrap();

        let config = config().with_override_key(format!("no-pty {} recovery", entry(6)));
        let outcome = decide(&config, &home, 6);

        assert!(outcome.accepted);
        assert_eq!(outcome.source, Some(KeySource::Override));
        assert!(outcome.options.unwrap().no_pty);
        assert_eq!(outcome.info.as_deref(), Some("recovery"));
    }

    #[test]
    fn test_override_key_mismatch_falls_through() {
        let home = Home::new(&format!("{}\n", entry(7)));
        let config = config().with_override_key(entry(8));

        assert!(decide(&config, &home, 7).accepted);
        assert!(!decide(&config, &home, 9).accepted);
    }

    #[test]
    fn test_override_key_with_bad_options_rejects() {
        let home = Home::new(&format!("{}\n", entry(7)));
        let config = config().with_override_key(format!("nonsense {}", entry(7)));

        // The matching override fails closed even though the file lists the key.
        assert!(!decide(&config, &home, 7).accepted);
    }

    #[test]
    fn test_custom_directory() {
        let home = Home::new("");
        let dir = home.account.home_dir.join("keys");
        fs::create_dir(&dir).unwrap();
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(dir.join("alice"), format!("{}\n", entry(10))).unwrap();
        fs::set_permissions(dir.join("alice"), fs::Permissions::from_mode(0o644)).unwrap();

        let config = PublicKeyAuthConfig {
            authorized_keys_dir: "~/keys".to_string(),
            authorized_keys_file: "alice".to_string(),
            ..config()
        };
        assert!(decide(&config, &home, 10).accepted);
    }

    #[test]
    #[serial]
    fn test_accepts_with_identity_switch() {
        let home = Home::new(&format!("{}\n", entry(11)));
        let config = PublicKeyAuthConfig::default();
        assert!(config.switch_identity);
        assert!(decide(&config, &home, 11).accepted);
    }
}
