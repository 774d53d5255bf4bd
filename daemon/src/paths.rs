/// Canonical location of the TabPause config file.
///
///   - Windows: %APPDATA%\TabPause\config.toml
///   - elsewhere: $XDG_CONFIG_HOME/tabpause/config.toml, falling back to
///     ~/.config/tabpause/config.toml
use anyhow::{bail, Result};
use std::path::PathBuf;

#[cfg(windows)]
const APP_DIR_NAME: &str = "TabPause";
#[cfg(not(windows))]
const APP_DIR_NAME: &str = "tabpause";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Returns the per-user TabPause config directory.
pub fn app_config_dir() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        match std::env::var_os("APPDATA") {
            Some(appdata) => Ok(PathBuf::from(appdata).join(APP_DIR_NAME)),
            None => bail!("APPDATA environment variable not set"),
        }
    }
    #[cfg(not(windows))]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(xdg).join(APP_DIR_NAME));
        }
        match std::env::var_os("HOME") {
            Some(home) => Ok(PathBuf::from(home).join(".config").join(APP_DIR_NAME)),
            None => bail!("neither XDG_CONFIG_HOME nor HOME is set"),
        }
    }
}

/// Returns the full path to the config file.
pub fn config_file_path() -> Result<PathBuf> {
    Ok(app_config_dir()?.join(CONFIG_FILE_NAME))
}
