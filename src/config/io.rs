use super::models::NarratorConfig;
use super::tables::{ConfigTables, TABLE_NAMES};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Load configuration from the given path, falling back to defaults on error.
pub fn load_config(path: &Path) -> NarratorConfig {
    let contents = match fs::read_to_string(path) {
        Ok(data) => {
            info!(path = %path.display(), "Loaded base config");
            data
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                "Falling back to default config: {err}"
            );
            return NarratorConfig::default();
        }
    };

    match parse_config(&contents) {
        Ok(cfg) => {
            debug!(backend = %cfg.backend, "Parsed configuration from disk");
            cfg
        }
        Err(err) => {
            warn!(path = %path.display(), "Invalid config TOML: {err}");
            NarratorConfig::default()
        }
    }
}

/// Parse either the sectioned or the flat layout.
pub fn parse_config(contents: &str) -> Result<NarratorConfig, toml::de::Error> {
    let value: toml::Table = toml::from_str(contents)?;
    let sectioned = TABLE_NAMES
        .iter()
        .any(|name| value.get(*name).is_some_and(toml::Value::is_table));
    let config = if sectioned {
        NarratorConfig::from(toml::from_str::<ConfigTables>(contents)?)
    } else {
        toml::from_str::<NarratorConfig>(contents)?
    };
    Ok(config.normalized())
}

/// Serialize using the sectioned layout.
#[cfg(test)]
pub(crate) fn serialize_config(config: &NarratorConfig) -> Result<String, toml::ser::Error> {
    toml::to_string(&ConfigTables::from(config))
}
