//! `turnledger config` — Configuration inspection commands.

use turnledger_config::AppConfig;

/// Print the effective configuration (file + environment) with secrets redacted.
pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config.redacted())?;
    println!("# {}", AppConfig::config_path().display());
    println!("{toml_str}");
    Ok(())
}

/// Print the built-in defaults, ready to be saved as `config.toml`.
pub async fn defaults() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}
