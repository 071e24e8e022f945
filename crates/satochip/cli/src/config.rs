//! Configuration file and environment overrides

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{OptionExt, WrapErr};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use satochip::{DEFAULT_TWO_FACTOR_TIMEOUT, KeyPath, KeystoreConfig, XpubType};
use serde::{Deserialize, Serialize};

/// Prefix of environment variables that override the file
pub(crate) const ENV_PREFIX: &str = "SATOCHIP_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    /// Reader to use instead of the first one holding a card
    pub(crate) reader: Option<String>,
    /// Account path addresses are derived below
    pub(crate) account_path: String,
    pub(crate) coin_type: u32,
    pub(crate) testnet: bool,
    /// Script type used when `xpub` gets no `--type`
    pub(crate) xpub_type: String,
    /// Seconds the second device has to approve a transaction
    pub(crate) two_factor_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        let keystore = KeystoreConfig::default();
        Self {
            reader: None,
            account_path: keystore.account_path.to_string(),
            coin_type: keystore.coin_type,
            testnet: keystore.testnet,
            xpub_type: XpubType::Standard.to_string(),
            two_factor_timeout: DEFAULT_TWO_FACTOR_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    pub(crate) fn keystore_config(&self) -> eyre::Result<KeystoreConfig> {
        let account_path: KeyPath = self
            .account_path
            .parse()
            .wrap_err_with(|| format!("invalid account path {:?}", self.account_path))?;
        Ok(KeystoreConfig::default()
            .with_account_path(account_path)
            .with_coin_type(self.coin_type)
            .with_testnet(self.testnet)
            .with_two_factor_timeout(Duration::from_secs(self.two_factor_timeout)))
    }

    pub(crate) fn xpub_type(&self) -> eyre::Result<XpubType> {
        Ok(self.xpub_type.parse()?)
    }
}

/// Base config directory, `~/.satochip`
pub(crate) fn config_dir() -> eyre::Result<PathBuf> {
    Ok(std::env::home_dir()
        .ok_or_eyre("home directory not found")?
        .join(".satochip"))
}

fn figment(file: &Path) -> Figment {
    Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX))
}

/// Load `file`, or `~/.satochip/satochip.toml`, then apply `SATOCHIP_*` variables
pub(crate) fn load_config(file: Option<&Path>) -> eyre::Result<Config> {
    let file = match file {
        Some(file) => file.to_path_buf(),
        None => config_dir()?.join("satochip.toml"),
    };
    figment(&file)
        .extract()
        .wrap_err_with(|| format!("failed to load {}", file.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_keystore() {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .extract()
            .unwrap();
        assert_eq!(config.keystore_config().unwrap(), KeystoreConfig::default());
        assert_eq!(config.xpub_type().unwrap(), XpubType::Standard);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::string(
                r#"
                reader = "ACS ACR39U"
                account_path = "m/84'/1'/0'"
                testnet = true
                xpub_type = "p2wpkh"
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.reader.as_deref(), Some("ACS ACR39U"));
        assert_eq!(config.xpub_type().unwrap(), XpubType::P2wpkh);
        let keystore = config.keystore_config().unwrap();
        assert!(keystore.testnet);
        assert_eq!(keystore.account_path.to_string(), "m/84'/1'/0'");
        assert_eq!(keystore.two_factor_timeout, DEFAULT_TWO_FACTOR_TIMEOUT);
    }

    #[test]
    fn test_bad_account_path() {
        let config = Config {
            account_path: "m/44'/x".to_string(),
            ..Default::default()
        };
        assert!(config.keystore_config().is_err());
    }
}
