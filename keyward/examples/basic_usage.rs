//! Basic usage example for `keyward`.

use keyward::client::prepare_auto_encryption;
use keyward::prelude::*;
use keyward_key_file::LocalKeyFile;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("keyward Basic Usage Example");
    println!("===========================\n");

    let key_dir = PathBuf::from("./example_keys");
    let settings = Settings {
        local_master_key_path: key_dir.join("master-key.txt"),
        ..Settings::default()
    };

    // Load or generate the local master key
    let provider = LocalKeyFile::new(&settings.local_master_key_path).provider()?;
    println!("✓ Local master key at {}\n", settings.local_master_key_path.display());

    // A file-backed key vault stands in for the document store
    let vault = LocalKeyVault::open(key_dir.join("key-vault.json"))?;
    let ctx = CallContext::new();

    let key_id = get_or_create_data_key(
        &settings.key_vault_namespace,
        &vault,
        &settings.key_alt_name,
        &provider,
        &ctx,
    )?;
    println!("Data key `{}`: {key_id}", settings.key_alt_name);

    // Running again finds the same key
    let again = get_or_create_data_key(
        &settings.key_vault_namespace,
        &vault,
        &settings.key_alt_name,
        &provider,
        &ctx,
    )?;
    assert_eq!(key_id, again);
    println!("✓ Second lookup returned the same key\n");

    let schema = EncryptionSchema::compile(&key_id.to_string())?;
    for (path, directive) in schema.directives() {
        println!("  {path:<24} {:<8} {}", directive.bson_type, directive.algorithm);
    }

    let options = prepare_auto_encryption(&settings, &provider, &vault, &ctx)?;
    println!("\nAuto-encryption options:");
    println!("{}", serde_json::to_string_pretty(&options.to_redacted_document())?);

    Ok(())
}
