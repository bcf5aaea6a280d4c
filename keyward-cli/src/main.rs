//! `keyward` CLI for data keys and encryption schemas.
//!
//! # Commands
//!
//! - `local-key` - Ensure the local master key file exists
//! - `data-key` - Find or create the application's data key
//! - `schema` - Print the compiled schema map for a key identifier
//! - `options` - Print auto-encryption options with credentials redacted
//!
//! Settings come from `FLE_*` environment variables.

#![warn(clippy::pedantic, clippy::nursery)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keyward::client::{prepare_auto_encryption, ExtraOptions};
use keyward::config::{ConfigSource, Settings};
use keyward::data_key::{CreationPolicy, DataKeyManager};
use keyward::key_vault::{CallContext, LocalKeyVault, Namespace};
use keyward::provider::MasterKeyProvider;
use keyward::schema::{EncryptionSchema, SchemaMap};
use keyward_key_file::{KeyFileError, LocalKeyFile};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keyward")]
#[command(author, version, about = "Field-level encryption key management", long_about = None)]
struct Cli {
    /// Give up on key vault calls after this many seconds
    #[arg(global = true, long)]
    timeout: Option<u64>,

    /// Enable debug logging
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ensure the local master key file exists
    LocalKey {
        /// Key file path (defaults to FLE_LOCAL_MASTER_KEY_PATH or master-key.txt)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Find or create the data key and print its base64 identifier
    DataKey {
        /// JSON file backing the key vault
        #[arg(long)]
        vault_file: PathBuf,

        /// Enforce a unique index on keyAltNames
        #[arg(long)]
        unique: bool,
    },

    /// Print the schema map for a data key
    Schema {
        /// Base64 data key identifier
        #[arg(long)]
        key_id: String,

        /// Target collection as database.collection
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Print auto-encryption options with credentials redacted
    Options {
        /// JSON file backing the key vault
        #[arg(long)]
        vault_file: PathBuf,

        /// Do not spawn the query analysis process
        #[arg(long)]
        bypass_spawn: bool,

        /// Path of the query analysis binary
        #[arg(long)]
        spawn_path: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("keyward=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyward=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let source = ConfigSource::from_env();
    let ctx = cli.timeout.map_or_else(CallContext::new, |secs| {
        CallContext::new().with_timeout(Duration::from_secs(secs))
    });

    match cli.command {
        Commands::LocalKey { path } => {
            let path = local_key_path(path, &source);
            LocalKeyFile::new(&path)
                .load_or_create()
                .with_context(|| format!("preparing local master key at {}", path.display()))?;
            println!("{}", path.display());
        }
        Commands::DataKey { vault_file, unique } => {
            let settings = load_settings(&source)?;
            let provider = load_provider(&settings, &source)?;
            let vault = open_vault(&vault_file)?;
            let policy = if unique { CreationPolicy::UniqueAltName } else { CreationPolicy::default() };

            let key_id = DataKeyManager::new(settings.key_vault_namespace.clone(), &vault)
                .with_policy(policy)
                .get_or_create(&settings.key_alt_name, &provider, &ctx)
                .context("resolving data key")?;
            println!("{key_id}");
        }
        Commands::Schema { key_id, namespace } => {
            let namespace = match namespace {
                Some(text) => text.parse::<Namespace>().context("parsing --namespace")?,
                None => load_settings(&source)?.target_namespace,
            };
            let schema = EncryptionSchema::compile(&key_id).context("compiling schema")?;
            let map: SchemaMap = [(namespace, schema)].into_iter().collect();
            println!("{}", serde_json::to_string_pretty(&map.to_document())?);
        }
        Commands::Options { vault_file, bypass_spawn, spawn_path } => {
            let settings = load_settings(&source)?;
            let provider = load_provider(&settings, &source)?;
            let vault = open_vault(&vault_file)?;
            let extra = ExtraOptions {
                mongocryptd_bypass_spawn: bypass_spawn.then_some(true),
                mongocryptd_spawn_path: spawn_path,
                ..ExtraOptions::default()
            };

            let options = prepare_auto_encryption(&settings, &provider, &vault, &ctx)
                .context("preparing auto encryption")?
                .with_extra_options(extra);
            println!("{}", serde_json::to_string_pretty(&options.to_redacted_document())?);
        }
    }

    Ok(())
}

fn load_settings(source: &ConfigSource) -> Result<Settings> {
    Settings::load(source).context("loading settings")
}

/// The local key file needs no other setting, so a bad provider tag does not block it.
fn local_key_path(path: Option<PathBuf>, source: &ConfigSource) -> PathBuf {
    path.unwrap_or_else(|| Settings::local_master_key_path(source))
}

fn load_provider(settings: &Settings, source: &ConfigSource) -> Result<MasterKeyProvider> {
    MasterKeyProvider::from_config::<KeyFileError, _>(settings.provider, source, || {
        LocalKeyFile::new(&settings.local_master_key_path).load_or_create()
    })
    .with_context(|| format!("configuring `{}` master key provider", settings.provider))
}

fn open_vault(path: &Path) -> Result<LocalKeyVault> {
    LocalKeyVault::open(path).with_context(|| format!("opening key vault file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward::config::{ENV_KMS_PROVIDER, ENV_LOCAL_MASTER_KEY_PATH};

    #[test]
    fn test_local_key_path_ignores_provider_tag() {
        let source = ConfigSource::from_pairs([
            (ENV_KMS_PROVIDER, "kmip"),
            (ENV_LOCAL_MASTER_KEY_PATH, "/tmp/keys/master-key.txt"),
        ]);
        assert!(load_settings(&source).is_err());
        assert_eq!(local_key_path(None, &source), PathBuf::from("/tmp/keys/master-key.txt"));
        assert_eq!(local_key_path(Some("own.key".into()), &source), PathBuf::from("own.key"));
    }

    #[test]
    fn test_local_key_path_default() {
        let source = ConfigSource::from_pairs([(ENV_KMS_PROVIDER, "kmip")]);
        assert_eq!(local_key_path(None, &source), PathBuf::from("master-key.txt"));
    }

    #[test]
    fn test_cli_parses_local_key() {
        let cli = Cli::try_parse_from(["keyward", "local-key", "--path", "k.txt"]).unwrap();
        assert!(matches!(cli.command, Commands::LocalKey { path: Some(p) } if p == Path::new("k.txt")));
    }
}
