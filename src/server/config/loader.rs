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

//! Configuration loading with environment overrides.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::types::ServerFileConfig;
use crate::server::auth::authorized_keys::{MAX_LINE, MIN_LINE};
use crate::shared::auth_types::AuthMethods;
use crate::shared::validation::validate_file_name;

/// Load configuration from a file (or the default locations), then apply
/// environment overrides and validate.
///
/// # Configuration Precedence
///
/// 1. Environment variables (`BSSH_AUTHKEYS_*` prefix)
/// 2. Configuration file
/// 3. Default values
///
/// # Environment Variables
///
/// - `BSSH_AUTHKEYS_AUTH_METHODS` - Comma-separated methods (e.g., "publickey,password")
/// - `BSSH_AUTHKEYS_AUTHORIZED_KEYS_DIR` - Directory for authorized_keys files
/// - `BSSH_AUTHKEYS_OVERRIDE_KEY` - Break-glass authorized_keys line
/// - `BSSH_AUTHKEYS_MULTI_AUTH` - Require all methods ("true"/"false")
/// - `BSSH_AUTHKEYS_SWITCH_IDENTITY` - Assume the account identity ("true"/"false")
/// - `BSSH_AUTHKEYS_MAX_AUTH_TRIES` - Failed attempts allowed per session
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, an environment
/// variable has an invalid value, or validation fails.
pub fn load_config(config_path: Option<&Path>) -> Result<ServerFileConfig> {
    let mut config = ServerFileConfig::default();

    if let Some(path) = config_path {
        config = load_config_file(path).context("Failed to load configuration file")?;
        tracing::info!(path = %path.display(), "Loaded configuration from file");
    } else {
        for path in default_config_paths() {
            if path.exists() {
                config = load_config_file(&path).context("Failed to load configuration file")?;
                tracing::info!(path = %path.display(), "Loaded configuration from file");
                break;
            }
        }
    }

    config = apply_env_overrides(config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Generate a configuration template with the default values.
pub fn generate_config_template() -> String {
    let mut yaml = String::new();
    yaml.push_str("# bssh-authkeys configuration file\n");
    yaml.push_str("#\n");
    yaml.push_str("# Configuration hierarchy (highest to lowest precedence):\n");
    yaml.push_str("# 1. Environment variables (BSSH_AUTHKEYS_* prefix)\n");
    yaml.push_str("# 2. This configuration file\n");
    yaml.push_str("# 3. Default values\n");
    yaml.push_str("#\n");
    yaml.push_str("# auth.publickey.override_authorized_key accepts one authorized_keys\n");
    yaml.push_str("# line for every account. Leave it unset unless you need recovery access.\n\n");

    yaml.push_str(&serde_yaml::to_string(&ServerFileConfig::default()).unwrap_or_default());
    yaml
}

fn load_config_file(path: &Path) -> Result<ServerFileConfig> {
    let content =
        std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;

    serde_yaml::from_str(&content).context(format!("Failed to parse {}", path.display()))
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("./bssh-authkeys.yaml"),
        PathBuf::from("/etc/bssh/authkeys.yaml"),
    ];

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("bssh/authkeys.yaml"));
    }

    paths
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("Invalid {name} value: {value}"),
    }
}

fn apply_env_overrides(mut config: ServerFileConfig) -> Result<ServerFileConfig> {
    // BSSH_AUTHKEYS_AUTH_METHODS (comma-separated: "publickey,password")
    if let Ok(methods) = std::env::var("BSSH_AUTHKEYS_AUTH_METHODS") {
        config.auth.methods = methods
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
        tracing::debug!(
            methods = ?config.auth.methods,
            "Applied BSSH_AUTHKEYS_AUTH_METHODS override"
        );
    }

    if let Ok(dir) = std::env::var("BSSH_AUTHKEYS_AUTHORIZED_KEYS_DIR") {
        tracing::debug!(dir = %dir, "Applied BSSH_AUTHKEYS_AUTHORIZED_KEYS_DIR override");
        config.auth.publickey.authorized_keys_dir = dir;
    }

    if let Ok(key) = std::env::var("BSSH_AUTHKEYS_OVERRIDE_KEY") {
        config.auth.publickey.override_authorized_key = (!key.trim().is_empty()).then_some(key);
        tracing::debug!("Applied BSSH_AUTHKEYS_OVERRIDE_KEY override");
    }

    if let Ok(value) = std::env::var("BSSH_AUTHKEYS_MULTI_AUTH") {
        config.auth.publickey.multi_auth_method = parse_bool("BSSH_AUTHKEYS_MULTI_AUTH", &value)?;
        tracing::debug!(
            enabled = config.auth.publickey.multi_auth_method,
            "Applied BSSH_AUTHKEYS_MULTI_AUTH override"
        );
    }

    if let Ok(value) = std::env::var("BSSH_AUTHKEYS_SWITCH_IDENTITY") {
        config.auth.publickey.switch_identity =
            parse_bool("BSSH_AUTHKEYS_SWITCH_IDENTITY", &value)?;
        tracing::debug!(
            enabled = config.auth.publickey.switch_identity,
            "Applied BSSH_AUTHKEYS_SWITCH_IDENTITY override"
        );
    }

    if let Ok(value) = std::env::var("BSSH_AUTHKEYS_MAX_AUTH_TRIES") {
        config.auth.publickey.max_auth_tries = value
            .parse()
            .context(format!("Invalid BSSH_AUTHKEYS_MAX_AUTH_TRIES value: {value}"))?;
        tracing::debug!(
            max_auth_tries = config.auth.publickey.max_auth_tries,
            "Applied BSSH_AUTHKEYS_MAX_AUTH_TRIES override"
        );
    }

    Ok(config)
}

fn validate_config(config: &ServerFileConfig) -> Result<()> {
    if config.auth.methods.is_empty() {
        anyhow::bail!("At least one authentication method must be enabled (auth.methods)");
    }
    for method in &config.auth.methods {
        if AuthMethods::from_name(method).is_none() {
            anyhow::bail!("Unknown authentication method: {method}");
        }
    }
    if !config.auth.method_set().contains(AuthMethods::PUBLICKEY) {
        anyhow::bail!("auth.methods must include publickey");
    }

    let publickey = &config.auth.publickey;

    if publickey.authorized_keys_dir.trim().is_empty() {
        anyhow::bail!("auth.publickey.authorized_keys_dir cannot be empty");
    }
    if publickey.authorized_keys_dir.contains('\0') {
        anyhow::bail!("auth.publickey.authorized_keys_dir contains a NUL byte");
    }

    validate_file_name(
        "auth.publickey.authorized_keys_file",
        &publickey.authorized_keys_file,
    )?;

    if let Some(key) = &publickey.override_authorized_key {
        if key.len() < MIN_LINE || key.len() > MAX_LINE {
            anyhow::bail!(
                "auth.publickey.override_authorized_key must be {MIN_LINE} to {MAX_LINE} bytes"
            );
        }
        if key.contains(['\0', '\n', '\r']) {
            anyhow::bail!("auth.publickey.override_authorized_key must be a single line");
        }
    }

    if publickey.max_auth_tries == 0 {
        anyhow::bail!("auth.publickey.max_auth_tries must be greater than 0");
    }

    tracing::debug!("Configuration validation passed");
    Ok(())
}
