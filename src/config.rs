//! Process configuration, read from environment variables.
//!
//! - `CHAT_BIND_ADDR`          (default: "0.0.0.0")
//! - `CHAT_PORT`               (default: "3000")
//! - `CHAT_STORE_URL`          (required)
//! - `CHAT_STORE_API_KEY`      (required)
//! - `CHAT_STORE_DATA_SOURCE`  (default: "Cluster0")
//! - `CHAT_STORE_DATABASE`     (default: "chat")
//! - `CHAT_STORE_COLLECTION`   (default: "messages")
//! - `CHAT_STORE_TIMEOUT_SECS` (default: "10")
//! - `CHAT_TLS_CERT`, `CHAT_TLS_KEY` (optional, both or neither)

use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("CHAT_TLS_CERT and CHAT_TLS_KEY must be set together")]
    IncompleteTls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub url: String,
    pub api_key: String,
    pub data_source: String,
    pub database: String,
    pub collection: String,
    pub timeout: Duration,
}

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no PEM certificate in {}", .0.display())]
    NoCertificate(PathBuf),
    #[error("no PEM private key in {}", .0.display())]
    NoPrivateKey(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsConfig {
    /// Checks that both files are readable PEM before the server binds,
    /// since warp's TLS bind panics on a bad certificate or key.
    pub fn check(&self) -> Result<(), TlsError> {
        let read_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| TlsError::Read { path, source }
        };

        let mut cert_reader = open_pem(&self.cert_path)?;
        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_error(&self.cert_path))?;
        if certs.is_empty() {
            return Err(TlsError::NoCertificate(self.cert_path.clone()));
        }

        let mut key_reader = open_pem(&self.key_path)?;
        match rustls_pemfile::private_key(&mut key_reader).map_err(read_error(&self.key_path))? {
            Some(_) => Ok(()),
            None => Err(TlsError::NoPrivateKey(self.key_path.clone())),
        }
    }
}

fn open_pem(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub store: StoreConfig,
    pub tls: Option<TlsConfig>,
}

impl Config {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                log::warn!("Ignoring unreadable .env file: {e}");
            }
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = StoreConfig {
            url: required(&lookup, "CHAT_STORE_URL")?,
            api_key: required(&lookup, "CHAT_STORE_API_KEY")?,
            data_source: lookup("CHAT_STORE_DATA_SOURCE").unwrap_or_else(|| "Cluster0".to_string()),
            database: lookup("CHAT_STORE_DATABASE").unwrap_or_else(|| "chat".to_string()),
            collection: lookup("CHAT_STORE_COLLECTION").unwrap_or_else(|| "messages".to_string()),
            timeout: Duration::from_secs(parse_or_default(&lookup, "CHAT_STORE_TIMEOUT_SECS", 10u64)?),
        };

        let tls = match (lookup("CHAT_TLS_CERT"), lookup("CHAT_TLS_KEY")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        Ok(Config {
            bind_addr: parse_or_default(&lookup, "CHAT_BIND_ADDR", IpAddr::from([0, 0, 0, 0]))?,
            port: parse_or_default(&lookup, "CHAT_PORT", 3000u16)?,
            store,
            tls,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => value.parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
