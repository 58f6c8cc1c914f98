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

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bssh_authkeys::server::auth::request::{encode_publickey_request, encode_signed_prefix};
use bssh_authkeys::server::auth::wire::put_string;
use bssh_authkeys::shared::UserInfo;
use bytes::BytesMut;
use signature::Signer;
use ssh_key::{Algorithm, PrivateKey, Signature};
use tempfile::TempDir;

pub const SESSION_ID: &[u8] = b"integration-test-session-identifier";

/// A freshly generated Ed25519 client key.
pub struct ClientKey {
    pub key: PrivateKey,
    pub blob: Vec<u8>,
}

impl ClientKey {
    pub fn generate() -> Self {
        let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
        let blob = key.public_key().to_bytes().unwrap();
        Self { key, blob }
    }

    /// The key as an authorized_keys entry without options.
    pub fn entry(&self) -> String {
        format!("ssh-ed25519 {}", STANDARD.encode(&self.blob))
    }

    pub fn probe(&self, user: &str) -> Vec<u8> {
        encode_publickey_request(user, "ssh-connection", b"ssh-ed25519", &self.blob, None)
    }

    /// A signed request for `user`, signed for `session_id`.
    pub fn signed(&self, user: &str, session_id: &[u8]) -> Vec<u8> {
        let prefix = encode_signed_prefix(user, "ssh-connection", b"ssh-ed25519", &self.blob);
        let mut message = BytesMut::new();
        put_string(&mut message, session_id);
        message.extend_from_slice(&prefix);

        let signature: Signature = self.key.try_sign(&message).unwrap();
        self.with_signature(user, &encode_signature(&signature))
    }

    /// A signed request carrying an arbitrary signature blob.
    pub fn with_signature(&self, user: &str, signature: &[u8]) -> Vec<u8> {
        encode_publickey_request(
            user,
            "ssh-connection",
            b"ssh-ed25519",
            &self.blob,
            Some(signature),
        )
    }
}

pub fn encode_signature(signature: &Signature) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_string(&mut buf, signature.algorithm().as_str().as_bytes());
    put_string(&mut buf, signature.as_bytes());
    buf.to_vec()
}

/// A home directory with a correctly protected `~/.ssh/authorized_keys`.
pub struct TestHome {
    _temp: TempDir,
    pub account: UserInfo,
}

impl TestHome {
    pub fn new(user: &str, authorized_keys: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join(user);
        let ssh_dir = home.join(".ssh");
        fs::create_dir_all(&ssh_dir).unwrap();
        fs::set_permissions(&home, fs::Permissions::from_mode(0o755)).unwrap();
        fs::set_permissions(&ssh_dir, fs::Permissions::from_mode(0o700)).unwrap();

        let account = UserInfo::new(
            user,
            nix::unistd::getuid().as_raw(),
            nix::unistd::getgid().as_raw(),
        )
        .with_home_dir(home);

        let test_home = Self {
            _temp: temp,
            account,
        };
        test_home.write_keys(authorized_keys);
        test_home
    }

    pub fn ssh_dir(&self) -> PathBuf {
        self.account.home_dir.join(".ssh")
    }

    pub fn keys_file(&self) -> PathBuf {
        self.ssh_dir().join("authorized_keys")
    }

    pub fn write_keys(&self, contents: &str) {
        fs::write(self.keys_file(), contents).unwrap();
        fs::set_permissions(self.keys_file(), fs::Permissions::from_mode(0o600)).unwrap();
    }

    pub fn set_mode(&self, path: &std::path::Path, mode: u32) {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    pub fn lookup(&self) -> impl FnOnce(&str) -> Option<UserInfo> + '_ {
        move |name: &str| (name == self.account.username).then(|| self.account.clone())
    }
}
