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

//! Parsing of authorized_keys key options.
//!
//! Options are the comma-separated prefix of an authorized_keys line (or the
//! options string supplied by an external key authority):
//!
//! ```text
//! no-pty,command="echo \"hi\"",permitopen="localhost:8080"
//! ```
//!
//! Names are case-insensitive. Values are double-quoted and `\"` stands for
//! a literal quote. An unknown option fails the whole string: options that
//! cannot be understood cannot be enforced.

use crate::shared::error::OptionsError;

use super::signature::{SK_USER_PRESENCE_REQD, SK_USER_VERIFICATION_REQD};

/// Restrictions parsed from an authorized_keys entry.
///
/// The record is consulted after authentication by the session layer
/// (forced command, forwarding and pty policy) and during signature
/// verification (security key flags).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyOptions {
    /// Force a specific command to be executed
    pub command: Option<String>,

    /// Environment variables to set (`NAME=value`)
    pub environment: Vec<String>,

    /// Source address patterns the key may be used from
    pub from: Vec<String>,

    /// Permitted local port forwarding destinations (`host:port`)
    pub permit_open: Vec<String>,

    /// Disable PTY allocation
    pub no_pty: bool,

    /// Disable port forwarding
    pub no_port_forwarding: bool,

    /// Disable agent forwarding
    pub no_agent_forwarding: bool,

    /// Disable X11 forwarding
    pub no_x11_forwarding: bool,

    /// Accept security key signatures made without a touch
    pub no_touch_required: bool,

    /// Require user verification (PIN or biometrics) on security keys
    pub verify_required: bool,
}

impl KeyOptions {
    /// Parse an options string.
    ///
    /// `line` and `origin` only label errors: the keys file line number and
    /// path, or `0` and a descriptive label for other origins.
    pub fn parse(options: &[u8], line: usize, origin: &str) -> Result<Self, OptionsError> {
        let fail = |reason: String| OptionsError::new(origin, line, reason);

        if options.is_empty() {
            return Err(fail("empty options string".to_string()));
        }

        let mut parsed = KeyOptions::default();
        let mut rest = options;

        loop {
            let name_end = rest
                .iter()
                .position(|&c| c == b'=' || c == b',')
                .unwrap_or(rest.len());
            let name = String::from_utf8_lossy(&rest[..name_end]).to_ascii_lowercase();
            if name.is_empty() {
                return Err(fail("empty option name".to_string()));
            }
            rest = &rest[name_end..];

            let value = match rest.first() {
                Some(b'=') => {
                    let (value, after) = parse_quoted(&rest[1..]).map_err(|reason| {
                        fail(format!("option '{name}': {reason}"))
                    })?;
                    rest = after;
                    Some(value)
                }
                _ => None,
            };

            parsed.apply(&name, value).map_err(fail)?;

            match rest.first() {
                None => break,
                Some(b',') => {
                    rest = &rest[1..];
                    if rest.is_empty() {
                        return Err(fail("trailing comma".to_string()));
                    }
                }
                Some(&c) => {
                    return Err(fail(format!(
                        "unexpected character '{}' after option '{name}'",
                        c.escape_ascii()
                    )));
                }
            }
        }

        tracing::trace!(origin = %origin, line = line, options = ?parsed, "Parsed key options");
        Ok(parsed)
    }

    fn apply(&mut self, name: &str, value: Option<String>) -> Result<(), String> {
        match (name, value) {
            ("restrict", None) => {
                self.no_pty = true;
                self.no_port_forwarding = true;
                self.no_agent_forwarding = true;
                self.no_x11_forwarding = true;
            }
            ("no-pty", None) => self.no_pty = true,
            ("no-port-forwarding", None) => self.no_port_forwarding = true,
            ("no-agent-forwarding", None) => self.no_agent_forwarding = true,
            ("no-x11-forwarding", None) => self.no_x11_forwarding = true,
            ("pty", None) => self.no_pty = false,
            ("port-forwarding", None) => self.no_port_forwarding = false,
            ("agent-forwarding", None) => self.no_agent_forwarding = false,
            ("x11-forwarding", None) => self.no_x11_forwarding = false,
            ("no-touch-required", None) => self.no_touch_required = true,
            ("verify-required", None) => self.verify_required = true,
            ("command", Some(value)) => {
                if self.command.is_some() {
                    return Err("command specified more than once".to_string());
                }
                self.command = Some(value);
            }
            ("environment", Some(value)) => match value.split_once('=') {
                Some((var, _)) if !var.is_empty() && !var.contains(char::is_whitespace) => {
                    self.environment.push(value);
                }
                _ => return Err(format!("invalid environment '{value}'")),
            },
            ("from", Some(value)) => {
                let patterns: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
                if patterns.is_empty() {
                    return Err("empty from pattern list".to_string());
                }
                self.from.extend(patterns);
            }
            ("permitopen", Some(value)) => match value.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && !port.is_empty() => {
                    self.permit_open.push(value);
                }
                _ => return Err(format!("invalid permitopen '{value}'")),
            },
            (
                "restrict" | "no-pty" | "no-port-forwarding" | "no-agent-forwarding"
                | "no-x11-forwarding" | "pty" | "port-forwarding" | "agent-forwarding"
                | "x11-forwarding" | "no-touch-required" | "verify-required",
                Some(_),
            ) => return Err(format!("option '{name}' takes no value")),
            ("command" | "environment" | "from" | "permitopen", None) => {
                return Err(format!("option '{name}' requires a value"));
            }
            (other, _) => return Err(format!("unsupported option '{other}'")),
        }
        Ok(())
    }

    /// Security key flags a signature must carry under these options.
    pub fn sk_flags_mask(&self) -> u8 {
        sk_flags_mask(Some(self))
    }
}

/// Security key flags required for a key with optional `options`.
///
/// User presence is required unless `no-touch-required` is set;
/// `verify-required` adds user verification.
pub fn sk_flags_mask(options: Option<&KeyOptions>) -> u8 {
    let mut mask = SK_USER_PRESENCE_REQD;
    if let Some(options) = options {
        if options.no_touch_required {
            mask &= !SK_USER_PRESENCE_REQD;
        }
        if options.verify_required {
            mask |= SK_USER_VERIFICATION_REQD;
        }
    }
    mask
}

/// Parse a double-quoted value, returning it unescaped together with the
/// bytes following the closing quote.
fn parse_quoted(input: &[u8]) -> Result<(String, &[u8]), String> {
    if input.first() != Some(&b'"') {
        return Err("value must be double-quoted".to_string());
    }

    let mut value = Vec::new();
    let mut i = 1;
    while i < input.len() {
        match input[i] {
            b'\\' if input.get(i + 1) == Some(&b'"') => {
                value.push(b'"');
                i += 2;
            }
            b'"' => {
                let value = String::from_utf8(value).map_err(|_| "value is not UTF-8")?;
                return Ok((value, &input[i + 1..]));
            }
            c => {
                value.push(c);
                i += 1;
            }
        }
    }

    Err("missing end quote".to_string())
}
