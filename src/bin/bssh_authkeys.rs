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

//! bssh-authkeys binary - check authorized_keys decisions offline
//!
//! Runs the same decision the server makes for a public key login, without
//! a client: useful to debug a user's authorized_keys file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use bssh_authkeys::server::auth::{fingerprint, DecisionEngine, KeySource, PermissionWarnings};
use bssh_authkeys::server::config::{generate_config_template, load_config, ServerFileConfig};
use bssh_authkeys::shared::UserInfo;
use bssh_authkeys::utils::logging;
use clap::{ArgAction, Parser, Subcommand};
use ssh_key::PublicKey;

/// bssh-authkeys - SSH public key authorization checker
#[derive(Parser, Debug)]
#[command(name = "bssh-authkeys")]
#[command(version)]
#[command(about = "Check SSH public key authorization against authorized_keys files", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether a public key may log in as a user
    Check {
        /// Account to check
        #[arg(short, long, value_name = "NAME")]
        user: String,

        /// Public key file in OpenSSH format (e.g. id_ed25519.pub)
        #[arg(short, long, value_name = "FILE")]
        key: PathBuf,

        /// Inspect the keys file with the current identity
        #[arg(long)]
        no_switch_identity: bool,
    },

    /// Print the fingerprint of a public key
    Fingerprint {
        /// Public key file in OpenSSH format
        #[arg(value_name = "FILE")]
        key: PathBuf,
    },

    /// Generate a configuration file template
    GenConfig {
        /// Output path (stdout if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Check configuration file for errors
    CheckConfig,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    logging::init_logging(cli.verbose);

    match &cli.command {
        Commands::Check {
            user,
            key,
            no_switch_identity,
        } => check(&cli, user, key, *no_switch_identity),
        Commands::Fingerprint { key } => {
            let (_, blob) = read_public_key(key)?;
            println!("{}", fingerprint(&blob));
            Ok(ExitCode::SUCCESS)
        }
        Commands::GenConfig { output } => gen_config(output.as_deref()),
        Commands::CheckConfig => check_config(&cli),
    }
}

fn config_for(cli: &Cli) -> Result<ServerFileConfig> {
    match &cli.config {
        Some(path) => load_config(Some(path))
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(load_config(None).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Using default configuration");
            ServerFileConfig::default()
        })),
    }
}

/// Read an OpenSSH public key file, returning its algorithm name and blob.
fn read_public_key(path: &Path) -> Result<(String, Vec<u8>)> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read public key {}", path.display()))?;
    let key = PublicKey::from_openssh(text.trim())
        .with_context(|| format!("Failed to parse public key {}", path.display()))?;
    let blob = key.to_bytes().context("Failed to encode public key")?;

    Ok((key.algorithm().as_str().to_string(), blob))
}

fn check(cli: &Cli, user: &str, key: &Path, no_switch_identity: bool) -> Result<ExitCode> {
    let mut config = config_for(cli)?.auth.publickey;
    if no_switch_identity {
        config.switch_identity = false;
    }

    let account = UserInfo::from_system(user)?
        .with_context(|| format!("Unknown user: {user}"))?;
    let (algo, blob) = read_public_key(key)?;

    let mut warnings = PermissionWarnings::new();
    let outcome = DecisionEngine::new(&config)
        .decide(&algo, &blob, &account, &mut warnings)
        .context("Failed to switch to the account identity")?;

    let fp = fingerprint(&blob);
    if !outcome.accepted {
        println!("rejected: {algo} {fp} for {user}");
        return Ok(ExitCode::FAILURE);
    }

    match &outcome.source {
        Some(KeySource::AuthorizedKeys { path, line }) => {
            println!("accepted: {algo} {fp} for {user} ({}:{line})", path.display());
        }
        Some(KeySource::Override) => println!("accepted: {algo} {fp} for {user} (override key)"),
        Some(KeySource::Authority) | None => println!("accepted: {algo} {fp} for {user}"),
    }
    if let Some(options) = &outcome.options {
        println!("options: {options:?}");
    }
    if let Some(info) = &outcome.info {
        println!("info: {info}");
    }

    Ok(ExitCode::SUCCESS)
}

fn gen_config(output: Option<&Path>) -> Result<ExitCode> {
    let template = generate_config_template();

    if let Some(path) = output {
        // The override key is a credential: keep the file private.
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .context("Failed to create configuration file")?;
        file.write_all(template.as_bytes())
            .context("Failed to write configuration file")?;

        println!("Configuration template written to {}", path.display());
    } else {
        print!("{template}");
    }

    Ok(ExitCode::SUCCESS)
}

fn check_config(cli: &Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    let publickey = &config.auth.publickey;

    println!("Configuration is valid");
    println!("  methods: {}", config.auth.method_set());
    println!(
        "  authorized keys: {}/{}",
        publickey.authorized_keys_dir, publickey.authorized_keys_file
    );
    println!(
        "  override key: {}",
        if publickey.override_authorized_key.is_some() {
            "configured"
        } else {
            "none"
        }
    );
    println!("  multi auth: {}", publickey.multi_auth_method);
    println!("  switch identity: {}", publickey.switch_identity);

    Ok(ExitCode::SUCCESS)
}
