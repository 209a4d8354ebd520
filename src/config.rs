use std::{env, path::{Path, PathBuf}};

use serde_derive::Deserialize;

use crate::result::{ConfigErrorKind, Error, Result};

pub const DEFAULT_TPM: &str = "/dev/tpm0";
pub const DEFAULT_BLOB: &str = "aikblob";

const LOCAL_CONFIG: &str = ".config/tpmtools.conf";
const SYSTEM_CONFIG: &str = "/etc/tpmtools.conf";

/// Defaults read from a TOML config file. Command line flags take precedence.
#[derive(Deserialize, Default, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// TPM device node or TCTI string.
    pub tpm: Option<String>,

    /// Where genaik writes the identity blob.
    pub blob: Option<PathBuf>,
}

impl Config {
    /// Loads a config from the given path.
    pub fn load(config_path: &Path) -> Result<Self> {
        log::info!("loading config from {}", config_path.display());
        let parse = || -> std::result::Result<Config, ConfigErrorKind> {
            let config_str = std::fs::read_to_string(config_path)?;
            Ok(<Config as serde::Deserialize>::deserialize(toml::Deserializer::new(&config_str))?)
        };
        parse().map_err(|source| Error::ConfigError { path: config_path.to_owned(), source })
    }

    /// Loads the config at the resolved path, or the empty config if there is none.
    pub fn resolve(config: Option<&Path>) -> Result<Self> {
        match resolve_config_path(config) {
            Some(path) => Self::load(&path),
            None => Ok(Config::default()),
        }
    }

    pub fn tpm(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.tpm.clone()).unwrap_or_else(|| DEFAULT_TPM.to_string())
    }

    pub fn blob(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| self.blob.clone()).unwrap_or_else(|| PathBuf::from(DEFAULT_BLOB))
    }
}

/// Everything genaik needs to run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenAikConfig {
    pub blob: PathBuf,
    pub tpm: String,
    pub owner_secret: String,
    pub srk_secret: String,
    pub aik_secret: String,
}

/// Everything tpm-clear needs to run.
#[derive(Debug, Clone, PartialEq)]
pub struct ClearConfig {
    pub tpm: String,
    pub owner_secret: String,
}

/// Returns the path to the config file, according to the following rules:
/// - if config is Some(p), then p is returned
/// - if the user-local config exists, then its path is returned
/// - if the system-wide config exists, then its path is returned
/// - otherwise there is no config file
pub fn resolve_config_path(config: Option<&Path>) -> Option<PathBuf> {
    if let Some(cfg) = config {
        return Some(absolute_path(cfg))
    }
    let local_config = local_path(Path::new(LOCAL_CONFIG));
    if let Some(local) = local_config.filter(|p| p.is_file()) {
        return Some(local)
    }
    Some(PathBuf::from(SYSTEM_CONFIG)).filter(|p| p.is_file())
}

/// Makes the given path relative to the user's home directory.
pub fn local_path(file: &Path) -> Option<PathBuf> {
    env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(file))
}

/// Makes the given path absolute without touching the file system.
/// Does not resolve symlinks or perform other magic.
pub fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        match env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn defaults_apply_without_flags_or_config() {
        let config = Config::default();
        assert_eq!(config.tpm(None), "/dev/tpm0");
        assert_eq!(config.blob(None), PathBuf::from("aikblob"));
    }

    #[test]
    fn flags_override_config_file() {
        let config = Config { tpm: Some("/dev/tpmrm0".to_string()), blob: Some("from-config".into()) };
        assert_eq!(config.tpm(None), "/dev/tpmrm0");
        assert_eq!(config.blob(None), PathBuf::from("from-config"));
        assert_eq!(config.tpm(Some("/dev/tpm1".to_string())), "/dev/tpm1");
        assert_eq!(config.blob(Some("from-flag".into())), PathBuf::from("from-flag"));
    }

    #[test]
    fn config_file_is_parsed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tpmtools.conf");
        std::fs::write(&path, "tpm = \"swtpm:host=localhost,port=2321\"\nblob = \"/tmp/aik\"\n").unwrap();
        assert_eq!(
            Config::load(&path).unwrap(),
            Config { tpm: Some("swtpm:host=localhost,port=2321".to_string()), blob: Some("/tmp/aik".into()) },
        );
    }

    #[test]
    fn partial_config_file_is_fine() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tpmtools.conf");
        std::fs::write(&path, "tpm = \"/dev/tpmrm0\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.tpm(None), "/dev/tpmrm0");
        assert_eq!(config.blob(None), PathBuf::from("aikblob"));
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tpmtools.conf");
        std::fs::write(&path, "tmp = \"/dev/tpm0\"\n").unwrap();
        match Config::load(&path).unwrap_err() {
            Error::ConfigError { source: ConfigErrorKind::DeserializationError(_), path: p } => assert_eq!(p, path),
            err => panic!("wrong error: {:#?}", err),
        }
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempdir().unwrap();
        match Config::resolve(Some(&dir.path().join("nope.conf"))).unwrap_err() {
            Error::ConfigError { source: ConfigErrorKind::IOError(_), .. } => {},
            err => panic!("wrong error: {:#?}", err),
        }
    }

    #[test]
    #[serial]
    fn local_config_is_found_in_home() {
        let home = tempdir().unwrap();
        std::fs::create_dir_all(home.path().join(".config")).unwrap();
        std::fs::write(home.path().join(LOCAL_CONFIG), "blob = \"local\"\n").unwrap();

        let old_home = env::var_os("HOME");
        env::set_var("HOME", home.path());
        let resolved = resolve_config_path(None);
        let config = Config::resolve(None);
        match old_home {
            Some(h) => env::set_var("HOME", h),
            None => env::remove_var("HOME"),
        }

        assert_eq!(resolved, Some(home.path().join(LOCAL_CONFIG)));
        assert_eq!(config.unwrap().blob(None), PathBuf::from("local"));
    }

    #[test]
    #[serial]
    fn explicit_config_path_wins_and_is_made_absolute() {
        let resolved = resolve_config_path(Some(Path::new("some.conf"))).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("some.conf"));
    }
}
