//! `emberagent config` - inspect and edit the config file.
//!
//! Operates on the TOML settings layer only. Environment variables still
//! override whatever is written here, and secrets never pass through this
//! command.

use std::path::Path;

use clap::Subcommand;

use crate::config::config_file_path;
use crate::settings::Settings;

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Write a config file with every default value spelled out.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print one setting, e.g. `chain.rpc_url`.
    Get { key: String },
    /// Change one setting and save the file.
    Set { key: String, value: String },
    /// Restore one setting to its built-in default and save the file.
    Reset { key: String },
    /// Print every setting with its effective file value.
    List,
}

pub fn run_config_command(
    command: ConfigSubcommand,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    let path = config_file_path(config_path)?;
    match command {
        ConfigSubcommand::Init { force } => init(&path, force),
        ConfigSubcommand::Get { key } => get(&path, &key),
        ConfigSubcommand::Set { key, value } => set(&path, &key, &value),
        ConfigSubcommand::Reset { key } => reset(&path, &key),
        ConfigSubcommand::List => list(&path),
    }
}

fn load_or_default(path: &Path) -> anyhow::Result<Settings> {
    Ok(Settings::load_toml(path)?.unwrap_or_default())
}

fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }
    Settings::default().save_toml(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn get(path: &Path, key: &str) -> anyhow::Result<()> {
    let settings = load_or_default(path)?;
    match settings.get(key) {
        Some(value) => {
            println!("{}", display_value(&value));
            Ok(())
        }
        None => anyhow::bail!("unknown setting `{key}`"),
    }
}

fn set(path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let mut settings = load_or_default(path)?;
    settings.set(key, value)?;
    settings.save_toml(path)?;
    println!("{key} = {value}");
    Ok(())
}

fn reset(path: &Path, key: &str) -> anyhow::Result<()> {
    let mut settings = load_or_default(path)?;
    settings.reset(key)?;
    settings.save_toml(path)?;
    let shown = settings
        .get(key)
        .map(|value| display_value(&value))
        .unwrap_or_default();
    println!("{key} = {shown}");
    Ok(())
}

fn list(path: &Path) -> anyhow::Result<()> {
    let settings = load_or_default(path)?;
    for (key, value) in settings.list() {
        println!("{key} = {value}");
    }
    Ok(())
}

/// Strings print bare; everything else keeps its JSON form.
fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_set_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        init(&path, false).unwrap();
        set(&path, "chain.chain_id", "19").unwrap();

        let settings = Settings::load_toml(&path).unwrap().unwrap();
        assert_eq!(settings.chain.chain_id, 19);
    }

    #[test]
    fn test_init_refuses_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        init(&path, false).unwrap();
        assert!(init(&path, false).is_err());
        init(&path, true).unwrap();
    }

    #[test]
    fn test_get_unknown_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(get(&path, "chain.no_such_key").is_err());
    }

    #[test]
    fn test_reset_restores_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        set(&path, "gateway.port", "9999").unwrap();
        reset(&path, "gateway.port").unwrap();

        let settings = Settings::load_toml(&path).unwrap().unwrap();
        assert_eq!(settings.gateway.port, Settings::default().gateway.port);
    }
}
