mod types;

pub use types::*;

use anyhow::{Context, Result};
use mp4forge_media::BoxType;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./mp4forge.toml",
        "~/.config/mp4forge/config.toml",
        "/etc/mp4forge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Parse a four-character brand such as `iso5`
pub fn parse_brand(brand: &str) -> Result<BoxType> {
    let bytes: [u8; 4] = brand
        .as_bytes()
        .try_into()
        .map_err(|_| anyhow::anyhow!("Brand '{}' is not four bytes long", brand))?;
    Ok(BoxType(bytes))
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.parser.read_chunk_size == 0 {
        anyhow::bail!("parser.read_chunk_size cannot be 0");
    }

    parse_brand(&config.fragment.major_brand).context("Invalid fragment.major_brand")?;
    for brand in &config.fragment.brands {
        parse_brand(brand).context("Invalid fragment.brands entry")?;
    }
    if config.fragment.brands.is_empty() {
        tracing::warn!("fragment.brands is empty; output will list no compatible brands");
    }

    Ok(())
}
