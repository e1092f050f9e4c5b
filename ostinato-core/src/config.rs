use std::path::{Path, PathBuf};

use serde::Deserialize;

use ostinato_types::BindingConfig;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");
const DEFAULT_BINDINGS: &str = include_str!("../bindings.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    dispatch: DispatchSection,
    #[serde(default)]
    scripts: ScriptsSection,
    #[serde(default)]
    kernel: KernelSection,
    #[serde(default)]
    midi: MidiSection,
}

#[derive(Deserialize, Default)]
struct DispatchSection {
    controller_action_threshold: Option<u8>,
}

#[derive(Deserialize, Default)]
struct ScriptsSection {
    long_press_msec: Option<u32>,
    double_click_msec: Option<u32>,
    max_active: Option<usize>,
}

#[derive(Deserialize, Default)]
struct KernelSection {
    pool_size: Option<usize>,
    pool_max: Option<usize>,
    low_water: Option<usize>,
}

#[derive(Deserialize, Default)]
struct MidiSection {
    device_name: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Toml(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "could not read {}: {}", path.display(), e),
            ConfigError::Toml(path, e) => write!(f, "malformed {}: {}", path.display(), e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Toml(_, e) => Some(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptConfig {
    pub long_press_msec: u32,
    pub double_click_msec: u32,
    /// Finished interpreters kept for reuse.
    pub max_active: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            long_press_msec: 500,
            double_click_msec: 1000,
            max_active: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub pool_size: usize,
    pub pool_max: usize,
    pub low_water: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            pool_max: 128,
            low_water: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// 0 means 127.
    pub controller_threshold: u8,
    pub scripts: ScriptConfig,
    pub kernel: KernelConfig,
    pub midi_device: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_file(embedded())
    }
}

fn embedded() -> ConfigFile {
    toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
        log::error!(target: "config", "embedded config.toml is malformed: {}", e);
        ConfigFile::default()
    })
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::Toml(path.to_path_buf(), e))
}

impl Config {
    /// Embedded defaults merged with the user's config file, if any.
    /// A malformed user file is logged and ignored.
    pub fn load() -> Self {
        let mut base = embedded();
        if let Some(path) = user_config_path().filter(|p| p.exists()) {
            match read_toml::<ConfigFile>(&path) {
                Ok(user) => merge(&mut base, user),
                Err(e) => log::warn!(target: "config", "ignoring config: {}", e),
            }
        }
        Self::from_file(base)
    }

    /// Embedded defaults merged with a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut base = embedded();
        merge(&mut base, read_toml(path)?);
        Ok(Self::from_file(base))
    }

    fn from_file(file: ConfigFile) -> Self {
        let scripts = ScriptConfig::default();
        let kernel = KernelConfig::default();
        Config {
            controller_threshold: file.dispatch.controller_action_threshold.unwrap_or(127),
            scripts: ScriptConfig {
                long_press_msec: file
                    .scripts
                    .long_press_msec
                    .unwrap_or(scripts.long_press_msec)
                    .max(1),
                double_click_msec: file
                    .scripts
                    .double_click_msec
                    .unwrap_or(scripts.double_click_msec)
                    .max(1),
                max_active: file.scripts.max_active.unwrap_or(scripts.max_active),
            },
            kernel: KernelConfig {
                pool_size: file.kernel.pool_size.unwrap_or(kernel.pool_size),
                pool_max: file.kernel.pool_max.unwrap_or(kernel.pool_max).max(1),
                low_water: file.kernel.low_water.unwrap_or(kernel.low_water),
            },
            midi_device: file.midi.device_name,
        }
    }
}

fn merge(base: &mut ConfigFile, user: ConfigFile) {
    if user.dispatch.controller_action_threshold.is_some() {
        base.dispatch.controller_action_threshold = user.dispatch.controller_action_threshold;
    }
    if user.scripts.long_press_msec.is_some() {
        base.scripts.long_press_msec = user.scripts.long_press_msec;
    }
    if user.scripts.double_click_msec.is_some() {
        base.scripts.double_click_msec = user.scripts.double_click_msec;
    }
    if user.scripts.max_active.is_some() {
        base.scripts.max_active = user.scripts.max_active;
    }
    if user.kernel.pool_size.is_some() {
        base.kernel.pool_size = user.kernel.pool_size;
    }
    if user.kernel.pool_max.is_some() {
        base.kernel.pool_max = user.kernel.pool_max;
    }
    if user.kernel.low_water.is_some() {
        base.kernel.low_water = user.kernel.low_water;
    }
    if user.midi.device_name.is_some() {
        base.midi.device_name = user.midi.device_name;
    }
}

fn user_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ostinato"))
}

fn user_config_path() -> Option<PathBuf> {
    user_dir().map(|d| d.join("config.toml"))
}

fn user_bindings_path() -> Option<PathBuf> {
    user_dir().map(|d| d.join("bindings.toml"))
}

fn embedded_bindings() -> BindingConfig {
    toml::from_str(DEFAULT_BINDINGS).unwrap_or_else(|e| {
        log::error!(target: "config", "embedded bindings.toml is malformed: {}", e);
        BindingConfig::default()
    })
}

/// Embedded binding sets merged with the user's bindings file, if any.
/// A malformed user file is logged and ignored.
pub fn load_bindings() -> BindingConfig {
    let mut bindings = embedded_bindings();
    if let Some(path) = user_bindings_path().filter(|p| p.exists()) {
        match read_toml::<BindingConfig>(&path) {
            Ok(user) => bindings.merge(user),
            Err(e) => log::warn!(target: "config", "ignoring bindings: {}", e),
        }
    }
    bindings
}

/// Embedded binding sets merged with a specific file.
pub fn load_bindings_from(path: &Path) -> Result<BindingConfig, ConfigError> {
    let mut bindings = embedded_bindings();
    bindings.merge(read_toml(path)?);
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_embedded_config() {
        let config = Config::default();
        assert_eq!(config.controller_threshold, 127);
        assert_eq!(config.scripts.long_press_msec, 500);
        assert_eq!(config.scripts.double_click_msec, 1000);
        assert_eq!(config.scripts.max_active, 16);
        assert_eq!(config.kernel, KernelConfig::default());
        assert!(config.midi_device.is_none());
    }

    #[test]
    fn test_user_file_overrides_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[dispatch]\ncontroller_action_threshold = 100\n[midi]\ndevice_name = \"nano\""
        )
        .unwrap();
        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.controller_threshold, 100);
        assert_eq!(config.midi_device.as_deref(), Some("nano"));
        assert_eq!(config.scripts.long_press_msec, 500);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch\n").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(..)));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }

    #[test]
    fn test_embedded_bindings() {
        let bindings = embedded_bindings();
        let common = bindings.find("Common").unwrap();
        assert!(!common.overlay);
        assert!(!common.bindings.is_empty());
        assert!(bindings.find("Pedals").unwrap().overlay);
    }

    #[test]
    fn test_user_bindings_replace_by_name() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[sets]]\nname = \"Common\"\n[[sets.bindings]]\ntrigger = \"key\"\nkey = \"x\"\nsymbol = \"Play\""
        )
        .unwrap();
        let bindings = load_bindings_from(file.path()).unwrap();
        let common = bindings.find("Common").unwrap();
        assert_eq!(common.bindings.len(), 1);
        assert_eq!(common.bindings[0].symbol, "Play");
        assert!(bindings.find("Pedals").is_some());
    }
}
