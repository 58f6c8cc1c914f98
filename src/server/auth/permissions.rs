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

//! Ownership and mode checks along the path to an authorized_keys file.
//!
//! Every component from the keys file up to the account's home directory
//! (or up to `/` for files outside it) must be owned by root or the account
//! and must not be group- or world-writable. Otherwise another local user
//! could replace or edit the file through a writable ancestor.

use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

const GROUP_OTHER_WRITE: u32 = 0o022;

/// Verdict for one path component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPermission {
    pub path: PathBuf,
    /// Owned by root or the account.
    pub owner_ok: bool,
    /// Not writable by group or others.
    pub write_ok: bool,
}

impl PathPermission {
    /// Stat `path` (following symlinks) and judge it for account `uid`.
    /// Returns `None` when the path cannot be inspected.
    pub fn check(path: &Path, uid: u32) -> Option<Self> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::trace!(path = %path.display(), error = %e, "Cannot stat path");
                return None;
            }
        };

        Some(Self {
            path: path.to_path_buf(),
            owner_ok: metadata.uid() == 0 || metadata.uid() == uid,
            write_ok: metadata.mode() & GROUP_OTHER_WRITE == 0,
        })
    }

    pub fn is_ok(&self) -> bool {
        self.owner_ok && self.write_ok
    }
}

/// Paths already reported during a session.
#[derive(Debug, Default)]
pub struct PermissionWarnings {
    warned: HashSet<PathBuf>,
}

impl PermissionWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path`; returns `true` the first time it is seen.
    pub fn first_report(&mut self, path: &Path) -> bool {
        self.warned.insert(path.to_path_buf())
    }

    pub fn is_empty(&self) -> bool {
        self.warned.is_empty()
    }
}

/// Components checked for `keys_file`: the file, then each ancestor up to
/// and including `home_dir`, or up to `/`.
pub fn walk_path(keys_file: &Path, home_dir: &Path) -> Vec<PathBuf> {
    let mut components = Vec::new();
    for path in keys_file.ancestors() {
        if path.as_os_str().is_empty() {
            break;
        }
        components.push(path.to_path_buf());
        if path == home_dir || path == Path::new("/") {
            break;
        }
    }
    components
}

/// Check every component of the path to `keys_file`.
///
/// The walk does not stop at the first bad component, so each one gets
/// reported. Returns `true` only if all components pass.
pub fn validate_path(
    keys_file: &Path,
    home_dir: &Path,
    uid: u32,
    warnings: &mut PermissionWarnings,
) -> bool {
    let mut ok = true;

    for path in walk_path(keys_file, home_dir) {
        match PathPermission::check(&path, uid) {
            Some(verdict) if verdict.is_ok() => {}
            Some(verdict) => {
                ok = false;
                if warnings.first_report(&verdict.path) {
                    tracing::info!(
                        path = %verdict.path.display(),
                        owner_ok = verdict.owner_ok,
                        write_ok = verdict.write_ok,
                        "Path must be owned by user or root, and not writable by group or others"
                    );
                }
            }
            None => ok = false,
        }
    }

    ok
}
