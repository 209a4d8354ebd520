use std::{fmt, path::PathBuf};

use crate::tpm;

#[derive(Debug)]
pub enum Error {
    DeviceOpen { path: String, source: tpm::Error },
    MakeIdentity(tpm::Error),
    OwnerClear(tpm::Error),
    BlobWrite { path: PathBuf, source: std::io::Error },
    ConfigError { path: PathBuf, source: ConfigErrorKind },
    PromptError(std::io::Error),
}

#[derive(Debug)]
pub enum ConfigErrorKind {
    IOError(std::io::Error),
    DeserializationError(toml::de::Error),
}

impl From<std::io::Error> for ConfigErrorKind {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl From<toml::de::Error> for ConfigErrorKind {
    fn from(value: toml::de::Error) -> Self {
        Self::DeserializationError(value)
    }
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorKind::IOError(e) => write!(f, "{}", e),
            ConfigErrorKind::DeserializationError(e) => write!(f, "{}", e.message()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DeviceOpen { path, source } => write!(f, "Couldn't open TPM device {}: {}", path, source),
            Error::MakeIdentity(e) => write!(f, "Couldn't make a new AIK: {}", e),
            Error::OwnerClear(e) => write!(f, "Couldn't clear the TPM using owner auth: {}", e),
            Error::BlobWrite { path, source } => write!(f, "Couldn't write to file {}: {}", path.display(), source),
            Error::ConfigError { path, source } => write!(f, "Couldn't read config file {}: {}", path.display(), source),
            Error::PromptError(e) => write!(f, "Couldn't read passphrase: {}", e),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
