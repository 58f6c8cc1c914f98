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

//! Public key authentication (RFC 4252 section 7).
//!
//! [`PublicKeyAuthenticator`] handles the `publickey` method of
//! SSH_MSG_USERAUTH_REQUEST and returns the reply to send:
//!
//! 1. The request is decoded in full before the account is looked at, so
//!    an unknown account looks the same on the wire as a rejected key.
//! 2. The signature algorithm fixes the key type; unknown algorithms fail.
//! 3. The session's key authority, if any, is asked first. Otherwise the
//!    [`DecisionEngine`] checks the override key and the keys file.
//! 4. A probe gets SSH_MSG_USERAUTH_PK_OK. A signed attempt has its
//!    signature checked over `string session_id || payload prefix`.
//!
//! Key options and info survive the request only if the session ends up
//! fully authenticated.

use super::authorized_keys::MAX_LINE;
use super::decision::{AuthorizationOutcome, DecisionEngine, KeySource};
use super::options::{sk_flags_mask, KeyOptions};
use super::request::{decode_userauth_header, signed_data, AuthRequest};
use super::session::AuthSession;
use super::signature::{
    decode_public_key, fingerprint, SignatureType, SignatureVerifier, SshKeyVerifier,
};
use super::wire::{PayloadReader, Response};
use crate::server::config::PublicKeyAuthConfig;
use crate::shared::auth_types::{auth_method_names, AuthMethods, UserInfo};
use crate::shared::error::PrivilegeError;

/// Label for options supplied by a key authority.
const AUTHORITY_ORIGIN: &str = "N/A";

/// Handles `publickey` authentication requests.
pub struct PublicKeyAuthenticator {
    config: PublicKeyAuthConfig,
    verifier: Box<dyn SignatureVerifier>,
}

impl PublicKeyAuthenticator {
    /// Create an authenticator verifying signatures with [`SshKeyVerifier`].
    pub fn new(config: PublicKeyAuthConfig) -> Self {
        Self::with_verifier(config, Box::new(SshKeyVerifier))
    }

    pub fn with_verifier(config: PublicKeyAuthConfig, verifier: Box<dyn SignatureVerifier>) -> Self {
        Self { config, verifier }
    }

    pub fn config(&self) -> &PublicKeyAuthConfig {
        &self.config
    }

    /// Handle a complete SSH_MSG_USERAUTH_REQUEST payload.
    ///
    /// `lookup` resolves the requested username to an account; `None`
    /// means the account does not exist or may not log in.
    pub fn handle_request<F>(
        &self,
        session: &mut AuthSession,
        payload: &[u8],
        lookup: F,
    ) -> Result<Response, PrivilegeError>
    where
        F: FnOnce(&str) -> Option<UserInfo>,
    {
        let (header, reader) = match decode_userauth_header(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed userauth request");
                return Ok(self.finish(session, Response::malformed()));
            }
        };

        if header.method != auth_method_names::PUBLICKEY {
            tracing::debug!(method = %header.method, "Not a publickey request");
            return Ok(self.finish(session, Response::failure()));
        }

        let account = lookup(header.username);
        self.handle(session, account.as_ref(), reader)
    }

    /// Handle the method-specific part of a `publickey` request.
    ///
    /// `reader` is positioned after the method name, with its payload
    /// beginning at the message type byte. `account` is `None` for users
    /// that do not exist.
    ///
    /// Only a failure to assume the account identity is an error; it must
    /// end the connection.
    pub fn handle(
        &self,
        session: &mut AuthSession,
        account: Option<&UserInfo>,
        reader: PayloadReader<'_>,
    ) -> Result<Response, PrivilegeError> {
        let response = self.process(session, account, reader)?;
        Ok(self.finish(session, response))
    }

    fn finish(&self, session: &mut AuthSession, response: Response) -> Response {
        session.default_max_auth_tries(self.config.max_auth_tries);
        if matches!(response, Response::Failure { malformed: true, .. }) {
            session.record_failure();
        }
        session.discard_unless_authenticated();
        response
    }

    fn process(
        &self,
        session: &mut AuthSession,
        account: Option<&UserInfo>,
        reader: PayloadReader<'_>,
    ) -> Result<Response, PrivilegeError> {
        let mut request = match AuthRequest::decode(reader) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed publickey request");
                return Ok(Response::malformed());
            }
        };

        // Only now, with the request consumed, may unknown accounts differ.
        let Some(account) = account else {
            return Ok(Response::failure());
        };

        let Some(sig_type) = SignatureType::from_name(request.sig_algo_name) else {
            tracing::debug!(
                algorithm = %String::from_utf8_lossy(request.sig_algo_name),
                "Unsupported signature algorithm"
            );
            return Ok(Response::failure());
        };
        let key_type = sig_type.key_type();
        let key_algo = key_type.name();

        let outcome = match self.ask_authority(session, key_algo, request.key_blob, account) {
            AuthorityVerdict::Accepted(outcome) => outcome,
            AuthorityVerdict::BadOptions => return Ok(Response::failure()),
            AuthorityVerdict::NotAccepted => DecisionEngine::new(&self.config).decide(
                key_algo,
                request.key_blob,
                account,
                &mut session.perm_warnings,
            )?,
        };

        if !outcome.accepted {
            return Ok(Response::failure());
        }

        if request.is_probe() {
            tracing::debug!(user = %account.username, algorithm = key_algo, "Key is acceptable");
            return Ok(Response::PkOk {
                sig_algo: request.sig_algo_name.to_vec(),
                key_blob: request.key_blob.to_vec(),
            });
        }

        let key = match decode_public_key(request.key_blob, key_type) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(user = %account.username, error = %e, "Unusable public key");
                return Ok(Response::malformed());
            }
        };

        let key_blob = request.key_blob;
        let remaining = request.remaining();
        let prefix = match remaining.prefix(remaining.position()) {
            Ok(prefix) => prefix,
            Err(e) => {
                tracing::debug!(error = %e, "Cannot locate signed payload");
                return Ok(Response::malformed());
            }
        };
        let signature = match remaining.get_string("signature") {
            Ok(signature) => signature,
            Err(e) => {
                tracing::debug!(user = %account.username, error = %e, "Missing signature");
                return Ok(Response::malformed());
            }
        };

        let signed = signed_data(session.session_id(), prefix);
        let mask = sk_flags_mask(outcome.options.as_ref());
        let fp = fingerprint(key_blob);

        if !self
            .verifier
            .verify(&key, sig_type, signature, &signed, mask)
        {
            tracing::warn!(
                user = %account.username,
                fingerprint = %fp,
                peer = %session.peer_display(),
                "Pubkey auth bad signature"
            );
            return Ok(Response::malformed());
        }

        let response = self.complete(session, account, key_algo, &fp, outcome);
        Ok(response)
    }

    /// Record a verified signature in the session and pick the reply.
    fn complete(
        &self,
        session: &mut AuthSession,
        account: &UserInfo,
        key_algo: &str,
        fp: &str,
        outcome: AuthorizationOutcome,
    ) -> Response {
        let from_authority = outcome.source == Some(KeySource::Authority);

        let response = if self.config.multi_auth_method
            && session
                .remaining_methods()
                .has_other_than(AuthMethods::PUBLICKEY)
        {
            session.complete_method(AuthMethods::PUBLICKEY);
            tracing::info!(
                user = %account.username,
                algorithm = key_algo,
                fingerprint = %fp,
                peer = %session.peer_display(),
                remaining = %session.remaining_methods(),
                "Pubkey auth succeeded, extra auth required"
            );
            Response::partial_success()
        } else {
            session.mark_authenticated();
            session.retain_pubkey_state(outcome.options, outcome.info);
            tracing::info!(
                user = %account.username,
                algorithm = key_algo,
                fingerprint = %fp,
                peer = %session.peer_display(),
                "Pubkey auth succeeded"
            );
            Response::Success
        };

        if from_authority {
            if let Some(authority) = session.authority.as_mut() {
                authority.notify_success();
            }
        }

        response
    }

    fn ask_authority(
        &self,
        session: &mut AuthSession,
        key_algo: &str,
        key_blob: &[u8],
        account: &UserInfo,
    ) -> AuthorityVerdict {
        let Some(authority) = session.authority.as_mut() else {
            return AuthorityVerdict::NotAccepted;
        };

        if authority
            .check_key(key_algo, key_blob, &account.username)
            .is_rejected()
        {
            return AuthorityVerdict::NotAccepted;
        }

        let options = match authority.options() {
            None => None,
            Some(options) if options.len() > MAX_LINE => {
                tracing::warn!(user = %account.username, "Key authority options too long");
                return AuthorityVerdict::BadOptions;
            }
            Some(options) => match KeyOptions::parse(options.as_bytes(), 0, AUTHORITY_ORIGIN) {
                Ok(options) => Some(options),
                Err(e) => {
                    tracing::warn!(user = %account.username, error = %e, "Key authority supplied bad options");
                    return AuthorityVerdict::BadOptions;
                }
            },
        };

        tracing::debug!(user = %account.username, "Key accepted by key authority");
        AuthorityVerdict::Accepted(AuthorizationOutcome::accepted(
            KeySource::Authority,
            options,
            None,
        ))
    }
}

enum AuthorityVerdict {
    Accepted(AuthorizationOutcome),
    BadOptions,
    NotAccepted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::auth::authority::{KeyAuthority, StaticKeyAuthority};
    use crate::server::auth::request::{encode_publickey_request, encode_signed_prefix};
    use crate::server::auth::signature::{SK_USER_PRESENCE_REQD, SK_USER_VERIFICATION_REQD};
    use crate::server::auth::wire::put_string;
    use crate::shared::auth_types::AuthResult;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::BytesMut;
    use signature::Signer;
    use ssh_key::{Algorithm, PrivateKey, PublicKey};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    const SESSION_ID: &[u8] = b"0123456789abcdef0123456789abcdef";

    struct Fixture {
        _temp: TempDir,
        account: UserInfo,
        key: PrivateKey,
        blob: Vec<u8>,
    }

    impl Fixture {
        fn new(line_prefix: &str) -> Self {
            let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
            let blob = key.public_key().to_bytes().unwrap();

            let temp = TempDir::new().unwrap();
            let home = temp.path().join("alice");
            let ssh_dir = home.join(".ssh");
            fs::create_dir_all(&ssh_dir).unwrap();
            fs::set_permissions(&home, fs::Permissions::from_mode(0o755)).unwrap();
            fs::set_permissions(&ssh_dir, fs::Permissions::from_mode(0o700)).unwrap();
            let keys_file = ssh_dir.join("authorized_keys");
            fs::write(
                &keys_file,
                format!("{line_prefix}ssh-ed25519 {} alice@laptop\n", STANDARD.encode(&blob)),
            )
            .unwrap();
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
                key,
                blob,
            }
        }

        fn probe(&self) -> Vec<u8> {
            encode_publickey_request("alice", "ssh-connection", b"ssh-ed25519", &self.blob, None)
        }

        fn signed(&self, session_id: &[u8]) -> Vec<u8> {
            let prefix = encode_signed_prefix("alice", "ssh-connection", b"ssh-ed25519", &self.blob);
            let mut message = BytesMut::new();
            put_string(&mut message, session_id);
            message.extend_from_slice(&prefix);

            let signature: ssh_key::Signature = self.key.try_sign(&message).unwrap();
            let mut encoded = BytesMut::new();
            put_string(&mut encoded, signature.algorithm().as_str().as_bytes());
            put_string(&mut encoded, signature.as_bytes());

            encode_publickey_request(
                "alice",
                "ssh-connection",
                b"ssh-ed25519",
                &self.blob,
                Some(&encoded),
            )
        }

        fn lookup(&self) -> impl FnOnce(&str) -> Option<UserInfo> + '_ {
            move |name: &str| (name == self.account.username).then(|| self.account.clone())
        }
    }

    fn authenticator() -> PublicKeyAuthenticator {
        PublicKeyAuthenticator::new(PublicKeyAuthConfig::default().with_switch_identity(false))
    }

    fn session() -> AuthSession {
        AuthSession::new(SESSION_ID.to_vec(), AuthMethods::PUBLICKEY)
    }

    /// Records the flag mask it was asked to enforce.
    struct MaskRecorder {
        mask: Arc<AtomicU8>,
    }

    impl SignatureVerifier for MaskRecorder {
        fn verify(&self, _: &PublicKey, _: SignatureType, _: &[u8], _: &[u8], mask: u8) -> bool {
            self.mask.store(mask, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn test_probe_gets_pk_ok() {
        let fixture = Fixture::new("");
        let mut session = session();

        let response = authenticator()
            .handle_request(&mut session, &fixture.probe(), fixture.lookup())
            .unwrap();
        assert_eq!(
            response,
            Response::PkOk {
                sig_algo: b"ssh-ed25519".to_vec(),
                key_blob: fixture.blob.clone()
            }
        );
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_valid_signature_succeeds() {
        let fixture = Fixture::new("no-pty ");
        let mut session = session();

        let response = authenticator()
            .handle_request(&mut session, &fixture.signed(SESSION_ID), fixture.lookup())
            .unwrap();
        assert_eq!(response, Response::Success);
        assert!(session.is_authenticated());
        assert!(session.pubkey_options().unwrap().no_pty);
        assert_eq!(session.pubkey_info(), Some("alice@laptop"));
    }

    #[test]
    fn test_signature_for_other_session_fails() {
        let fixture = Fixture::new("no-pty ");
        let mut session = session();

        let response = authenticator()
            .handle_request(&mut session, &fixture.signed(b"another session"), fixture.lookup())
            .unwrap();
        assert_eq!(response, Response::malformed());
        assert!(!session.is_authenticated());
        assert!(session.pubkey_options().is_none());
        assert_eq!(session.failures(), 1);
    }

    #[test]
    fn test_unknown_user_fails_plainly() {
        let fixture = Fixture::new("");
        let mut session = session();

        let response = authenticator()
            .handle_request(&mut session, &fixture.signed(SESSION_ID), |_| None)
            .unwrap();
        assert_eq!(response, Response::failure());
        assert_eq!(session.failures(), 0);
    }

    #[test]
    fn test_unknown_user_with_truncated_request_is_malformed() {
        let fixture = Fixture::new("");
        let mut payload = fixture.probe();
        payload.truncate(payload.len() - 8);

        let response = authenticator()
            .handle_request(&mut session(), &payload, |_| None)
            .unwrap();
        assert_eq!(response, Response::malformed());
    }

    #[test]
    fn test_unknown_algorithm_fails() {
        let fixture = Fixture::new("");
        let payload =
            encode_publickey_request("alice", "ssh-connection", b"ssh-dss", &fixture.blob, None);

        let response = authenticator()
            .handle_request(&mut session(), &payload, fixture.lookup())
            .unwrap();
        assert_eq!(response, Response::failure());
    }

    #[test]
    fn test_algorithm_key_mismatch_fails() {
        let fixture = Fixture::new("");
        // An RSA signature algorithm binds the ssh-rsa key type
        let payload =
            encode_publickey_request("alice", "ssh-connection", b"rsa-sha2-256", &fixture.blob, None);

        let response = authenticator()
            .handle_request(&mut session(), &payload, fixture.lookup())
            .unwrap();
        assert_eq!(response, Response::failure());
    }

    #[test]
    fn test_other_method_rejected() {
        let mut payload = BytesMut::new();
        payload.extend_from_slice(&[crate::server::auth::wire::SSH_MSG_USERAUTH_REQUEST]);
        put_string(&mut payload, b"alice");
        put_string(&mut payload, b"ssh-connection");
        put_string(&mut payload, b"password");

        let response = authenticator()
            .handle_request(&mut session(), &payload, |_| None)
            .unwrap();
        assert_eq!(response, Response::failure());
    }

    #[test]
    fn test_missing_signature_is_malformed() {
        let fixture = Fixture::new("");
        let mut payload = fixture.probe();
        // Flip the probe flag to "signed" without adding a signature.
        let flag = 1 + 4 + 5 + 4 + 14 + 4 + 9;
        payload[flag] = 1;

        let mut session = session();
        let response = authenticator()
            .handle_request(&mut session, &payload, fixture.lookup())
            .unwrap();
        assert_eq!(response, Response::malformed());
        assert_eq!(session.failures(), 1);
    }

    #[test]
    fn test_multi_auth_gives_partial_success() {
        let fixture = Fixture::new("");
        let config = PublicKeyAuthConfig::default()
            .with_switch_identity(false)
            .with_multi_auth_method(true);
        let mut session = AuthSession::new(
            SESSION_ID.to_vec(),
            AuthMethods::PUBLICKEY | AuthMethods::PASSWORD,
        );

        let response = PublicKeyAuthenticator::new(config)
            .handle_request(&mut session, &fixture.signed(SESSION_ID), fixture.lookup())
            .unwrap();
        assert_eq!(response, Response::partial_success());
        assert!(!session.is_authenticated());
        assert_eq!(session.remaining_methods(), AuthMethods::PASSWORD);
        assert!(session.pubkey_info().is_none());
    }

    #[test]
    fn test_security_key_flags_follow_options() {
        let cases = [
            ("", SK_USER_PRESENCE_REQD),
            ("no-touch-required ", 0),
            ("verify-required ", SK_USER_PRESENCE_REQD | SK_USER_VERIFICATION_REQD),
        ];

        for (prefix, expected) in cases {
            let fixture = Fixture::new(prefix);
            let mask = Arc::new(AtomicU8::new(0xff));
            let authenticator = PublicKeyAuthenticator::with_verifier(
                PublicKeyAuthConfig::default().with_switch_identity(false),
                Box::new(MaskRecorder { mask: mask.clone() }),
            );

            let response = authenticator
                .handle_request(&mut session(), &fixture.signed(SESSION_ID), fixture.lookup())
                .unwrap();
            assert_eq!(response, Response::Success);
            assert_eq!(mask.load(Ordering::SeqCst), expected, "options {prefix:?}");
        }
    }

    #[test]
    fn test_authority_accepts_without_keys_file() {
        let fixture = Fixture::new("");
        fs::remove_file(fixture.account.home_dir.join(".ssh/authorized_keys")).unwrap();

        let authority =
            StaticKeyAuthority::new().with_key("alice", fixture.blob.clone(), Some("restrict"));
        let mut session = session().with_authority(Box::new(authority));

        let response = authenticator()
            .handle_request(&mut session, &fixture.signed(SESSION_ID), fixture.lookup())
            .unwrap();
        assert_eq!(response, Response::Success);
        assert!(session.pubkey_options().unwrap().no_port_forwarding);
    }

    struct BadOptionsAuthority;

    impl KeyAuthority for BadOptionsAuthority {
        fn check_key(&mut self, _: &str, _: &[u8], _: &str) -> AuthResult {
            AuthResult::Accept
        }

        fn options(&self) -> Option<String> {
            Some("no-such-option".to_string())
        }
    }

    #[test]
    fn test_authority_bad_options_fail_even_if_file_lists_key() {
        let fixture = Fixture::new("");
        let mut session = session().with_authority(Box::new(BadOptionsAuthority));

        let response = authenticator()
            .handle_request(&mut session, &fixture.probe(), fixture.lookup())
            .unwrap();
        assert_eq!(response, Response::failure());
    }

    #[test]
    fn test_authority_rejection_falls_back_to_file() {
        let fixture = Fixture::new("");
        let mut session = session().with_authority(Box::new(StaticKeyAuthority::new()));

        let response = authenticator()
            .handle_request(&mut session, &fixture.probe(), fixture.lookup())
            .unwrap();
        assert!(matches!(response, Response::PkOk { .. }));
    }
}
