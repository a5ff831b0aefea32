//! Loading [`SocketConfig`] from TOML files.

use std::path::Path;
use tandem_types::{SocketConfig, TandemError, TandemResult};
use tracing::{info, warn};

/// Load a socket configuration, falling back to defaults.
///
/// A missing path, an unreadable file or an invalid document all yield
/// `SocketConfig::default()`; the problem is logged at warn level.
pub fn load_config(path: Option<&Path>) -> SocketConfig {
    let Some(path) = path else {
        return SocketConfig::default();
    };
    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using defaults");
        return SocketConfig::default();
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => match SocketConfig::from_toml_str(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to parse config, using defaults"
                );
                SocketConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %path.display(),
                "Failed to read config file, using defaults"
            );
            SocketConfig::default()
        }
    }
}

/// Strict variant of [`load_config`]: every problem is an error.
pub fn parse_config(path: &Path) -> TandemResult<SocketConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| TandemError::Config(format!("{}: {e}", path.display())))?;
    SocketConfig::from_toml_str(&contents)
}
