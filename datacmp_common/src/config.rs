use crate::DataCmpError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "datacmp.toml";

/// What the registry does when a module name is registered twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// The later registration replaces the earlier one and the override is logged
    #[default]
    Override,
    /// The later registration is refused and reported
    Reject,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directories scanned for plugin archives
    #[serde(default)]
    pub plugin_dirs: Vec<PathBuf>,

    /// Where plugin archives are extracted
    #[serde(default)]
    pub plugin_cache_dir: Option<PathBuf>,

    /// Upper bound for one source validation
    #[serde(default = "default_validate_timeout")]
    pub validate_timeout_secs: u64,

    /// Upper bound for one source fetch
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default)]
    pub collision_policy: CollisionPolicy,

    /// Enable portable mode (config alongside binary)
    #[serde(default)]
    pub portable_mode: bool,
}

fn default_validate_timeout() -> u64 {
    30
}

fn default_fetch_timeout() -> u64 {
    300
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: Vec::new(),
            plugin_cache_dir: None,
            validate_timeout_secs: default_validate_timeout(),
            fetch_timeout_secs: default_fetch_timeout(),
            collision_policy: CollisionPolicy::default(),
            portable_mode: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    pub exists: bool,
    pub portable: bool,
}

pub fn load_config(prefer_portable: bool) -> Result<LoadedConfig, DataCmpError> {
    let (path, portable) = resolve_config_path(prefer_portable)?;
    load_config_from(path, portable)
}

/// Load a specific config file, falling back to defaults when it is absent
pub fn load_config_from(path: PathBuf, portable: bool) -> Result<LoadedConfig, DataCmpError> {
    let exists = path.exists();

    let mut config = if exists {
        let data = fs::read_to_string(&path)?;
        toml::from_str(&data).map_err(|e| DataCmpError::Serialization(e.to_string()))?
    } else {
        AppConfig::default()
    };

    config.portable_mode = portable;

    Ok(LoadedConfig {
        config,
        path,
        exists,
        portable,
    })
}

pub fn ensure_config(prefer_portable: bool) -> Result<LoadedConfig, DataCmpError> {
    let loaded = load_config(prefer_portable)?;
    if !loaded.exists {
        save_config(&loaded.path, &loaded.config)?;
    }
    Ok(loaded)
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), DataCmpError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data = toml::to_string_pretty(config)
        .map_err(|e| DataCmpError::Serialization(e.to_string()))?;
    fs::write(path, data)?;
    Ok(())
}

pub fn default_plugin_cache_dir(portable: bool, config_path: &Path) -> Result<PathBuf, DataCmpError> {
    if portable {
        let base = config_path
            .parent()
            .map(|path| path.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        return Ok(base.join("datacmp_plugins"));
    }

    let dirs = ProjectDirs::from("", "aecs4u", "datacmp")
        .ok_or_else(|| DataCmpError::Config("Unable to determine cache directory".to_string()))?;
    Ok(dirs.cache_dir().join("plugins"))
}

fn resolve_config_path(prefer_portable: bool) -> Result<(PathBuf, bool), DataCmpError> {
    if let Some(portable_path) = portable_config_path() {
        if prefer_portable || portable_path.exists() {
            return Ok((portable_path, true));
        }
    }

    let dirs = ProjectDirs::from("", "aecs4u", "datacmp")
        .ok_or_else(|| DataCmpError::Config("Unable to determine config directory".to_string()))?;
    Ok((dirs.config_dir().join(CONFIG_FILE_NAME), false))
}

fn portable_config_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
}
