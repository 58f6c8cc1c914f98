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

//! Validation of user input that ends up in filesystem paths.
//!
//! # Security
//!
//! Usernames are substituted into keys-file path patterns, so they are
//! restricted to the POSIX portable username character set to rule out
//! path traversal through the account name.

use super::error::ValidationError;

/// Maximum accepted username length.
const MAX_USERNAME_LENGTH: usize = 32;

/// Validate a username for use in a keys-file path.
///
/// Allows ASCII alphanumerics, underscore, hyphen and dot, and rejects a
/// leading hyphen or dot.
///
/// # Examples
///
/// ```
/// use bssh_authkeys::shared::validation::validate_username;
///
/// assert!(validate_username("alice").is_ok());
/// assert!(validate_username("../etc").is_err());
/// ```
pub fn validate_username(username: &str) -> Result<&str, ValidationError> {
    if username.is_empty() {
        return Err(ValidationError::empty("username"));
    }

    if username.len() > MAX_USERNAME_LENGTH {
        return Err(ValidationError::too_long("username", MAX_USERNAME_LENGTH));
    }

    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if !valid_chars {
        return Err(ValidationError::invalid_characters("username"));
    }

    if username.starts_with('-') {
        return Err(ValidationError::new(
            "username",
            "username cannot start with a hyphen",
        ));
    }

    // "." and ".." pass the charset check but name directories
    if username.starts_with('.') {
        return Err(ValidationError::new(
            "username",
            "username cannot start with a dot",
        ));
    }

    Ok(username)
}

/// Validate a single path component such as the keys file name.
pub fn validate_file_name<'a>(field: &str, name: &'a str) -> Result<&'a str, ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::empty(field));
    }
    if name.contains('/') || name.contains('\0') || name == "." || name == ".." {
        return Err(ValidationError::invalid_characters(field));
    }
    Ok(name)
}
