use agora::config::{default_config_path, default_database_path, AgoraConfig};
use std::path::PathBuf;

/// Write a default configuration file
///
/// The generated file selects the SQLite backend with the database next to
/// the config unless `--database` names another file. An existing config is
/// only replaced with `--force`.
pub fn execute(
    config_path: Option<String>,
    database_path: Option<String>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    let database_path = database_path.map(PathBuf::from).unwrap_or_else(|| {
        config_path
            .parent()
            .map(|dir| dir.join("agora.db"))
            .unwrap_or_else(default_database_path)
    });

    if config_path.exists() && !force {
        return Err(format!(
            "Config file '{}' already exists. Use --force to overwrite.",
            config_path.display()
        )
        .into());
    }

    AgoraConfig::create_default(&config_path, &database_path)?;

    println!("📝 Created config: {}", config_path.display());
    println!("   Database: {}", database_path.display());
    println!();
    println!("Next: agora migrate --config {}", config_path.display());

    Ok(())
}
