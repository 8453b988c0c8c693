use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "/etc/trezor-luks/config.toml";
const CONFIG_PATH_ENV: &str = "TREZOR_LUKS_CONFIG";

/// Settings for one run. Loaded once and passed into the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// cryptsetup binary, looked up in `PATH` when relative.
    pub cryptsetup: PathBuf,
    /// Well-known throwaway key used while luksFormat creates the master key.
    pub bootstrap_key_file: PathBuf,
    /// Key name the device mixes into the derivation.
    pub key_name: String,
    /// BIP32 node the device derives under.
    pub derivation_path: String,
    /// Require a button press on the device for every derivation.
    pub ask_on_decrypt: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cryptsetup: PathBuf::from("cryptsetup"),
            bootstrap_key_file: PathBuf::from("/proc/cmdline"),
            key_name: "luks".to_string(),
            derivation_path: device::trezor::DEFAULT_DERIVATION_PATH.to_string(),
            ask_on_decrypt: true,
        }
    }
}

impl Config {
    /// Load from `$TREZOR_LUKS_CONFIG`, else from the default path if it
    /// exists, else built-in defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(std::env::var_os(CONFIG_PATH_ENV), Path::new(DEFAULT_CONFIG_PATH))
    }

    fn load_from(explicit: Option<OsString>, default: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(Path::new(&path))
                .with_context(|| format!("{CONFIG_PATH_ENV} names an unusable config"));
        }
        if default.exists() {
            Self::from_file(default)
        } else {
            log::debug!("no config at {}, using defaults", default.display());
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Override the key name from the command line.
    pub fn with_key_name(mut self, key_name: Option<String>) -> Result<Self> {
        if let Some(key_name) = key_name {
            self.key_name = key_name;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn derivation_path(&self) -> Result<Vec<u32>> {
        device::trezor::parse_derivation_path(&self.derivation_path)
            .context("invalid derivation_path")
    }

    fn validate(&self) -> Result<()> {
        if self.key_name.is_empty() {
            bail!("key_name must not be empty");
        }
        if self.bootstrap_key_file.as_os_str().is_empty() {
            bail!("bootstrap_key_file must not be empty");
        }
        self.derivation_path()?;
        Ok(())
    }
}
