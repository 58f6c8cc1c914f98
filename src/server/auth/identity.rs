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

//! Scoped effective-identity switch.
//!
//! While an [`IdentityGuard`] is alive the process runs with the account's
//! effective uid and gid, so file checks see exactly what the account
//! itself may access. The original identity comes back when the guard is
//! released or dropped. If it cannot be restored the process aborts.
//!
//! The switch is process-wide: only one guard may exist at a time.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::unistd::{getegid, geteuid, setegid, seteuid, Gid, Uid};

use crate::shared::error::PrivilegeError;

static SWITCHED: AtomicBool = AtomicBool::new(false);

/// Holds the account identity until released.
#[derive(Debug)]
#[must_use = "the original identity is restored when the guard is dropped"]
pub struct IdentityGuard {
    original: Option<(Uid, Gid)>,
}

impl IdentityGuard {
    /// Switch the effective gid, then the effective uid, to the account's.
    pub fn assume(uid: u32, gid: u32) -> Result<Self, PrivilegeError> {
        if SWITCHED.swap(true, Ordering::SeqCst) {
            return Err(PrivilegeError::AlreadySwitched);
        }

        let original = (geteuid(), getegid());

        if let Err(source) = setegid(Gid::from_raw(gid)) {
            SWITCHED.store(false, Ordering::SeqCst);
            return Err(PrivilegeError::SetGid { gid, source });
        }

        // From here on the guard owns the restore, including the partial
        // switch if seteuid fails below.
        let guard = Self {
            original: Some(original),
        };

        if let Err(source) = seteuid(Uid::from_raw(uid)) {
            drop(guard);
            return Err(PrivilegeError::SetUid { uid, source });
        }

        tracing::trace!(uid = uid, gid = gid, "Assumed account identity");
        Ok(guard)
    }

    /// A guard that switches nothing, for servers running without the
    /// identity switch.
    pub fn unchanged() -> Self {
        Self { original: None }
    }

    /// Returns `true` while the account identity is in effect.
    pub fn is_switched(&self) -> bool {
        self.original.is_some()
    }

    /// Restore the original identity now.
    pub fn release(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        let Some((uid, gid)) = self.original.take() else {
            return;
        };

        if let Err(e) = seteuid(uid).and_then(|()| setegid(gid)) {
            tracing::error!(
                uid = uid.as_raw(),
                gid = gid.as_raw(),
                error = %e,
                "Failed to restore effective identity, aborting"
            );
            std::process::abort();
        }

        SWITCHED.store(false, Ordering::SeqCst);
        tracing::trace!("Restored original identity");
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{getgid, getuid};
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_assume_own_identity() {
        let uid = getuid().as_raw();
        let gid = getgid().as_raw();

        let guard = IdentityGuard::assume(uid, gid).unwrap();
        assert!(guard.is_switched());
        assert_eq!(geteuid().as_raw(), uid);
        guard.release();

        assert_eq!(geteuid(), getuid());
        assert_eq!(getegid(), getgid());
    }

    #[test]
    #[serial]
    fn test_guard_is_not_reentrant() {
        let guard = IdentityGuard::assume(getuid().as_raw(), getgid().as_raw()).unwrap();
        assert!(matches!(
            IdentityGuard::assume(getuid().as_raw(), getgid().as_raw()),
            Err(PrivilegeError::AlreadySwitched)
        ));
        drop(guard);

        // Released on drop, so a new switch is possible.
        IdentityGuard::assume(getuid().as_raw(), getgid().as_raw())
            .unwrap()
            .release();
    }

    #[test]
    #[serial]
    fn test_assume_foreign_identity_fails_unprivileged() {
        if getuid().is_root() {
            return;
        }
        let gid = getgid().as_raw().wrapping_add(4242);
        let err = IdentityGuard::assume(getuid().as_raw().wrapping_add(4242), gid).unwrap_err();
        assert!(matches!(err, PrivilegeError::SetGid { .. }));

        // A failed switch leaves nothing behind.
        IdentityGuard::assume(getuid().as_raw(), getgid().as_raw())
            .unwrap()
            .release();
    }

    #[test]
    fn test_unchanged_guard() {
        let guard = IdentityGuard::unchanged();
        assert!(!guard.is_switched());
        guard.release();
    }
}
