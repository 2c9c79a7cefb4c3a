use std::env;
use std::path::PathBuf;
use thiserror::Error;
use warp::http::uri::{Authority, Scheme};

pub const DEFAULT_MAX_MESSAGES: usize = 6;
pub const DEFAULT_AUTHOR: &str = "Usuario";
pub const DEFAULT_PORT: u16 = 8000;

const LOCAL_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://localhost:3000"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a whole number, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("CHAT_TLS_CERT and CHAT_TLS_KEY must be set together")]
    IncompleteTls,
    #[error("{key} is not a valid http(s) origin: {value:?}")]
    InvalidOrigin { key: &'static str, value: String },
}

/// The part of the configuration the session coordinator cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// History capacity, also the number of messages replayed on connect.
    pub max_messages: usize,
    /// Author used when neither the payload nor the presence entry names one.
    pub default_author: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_messages: DEFAULT_MAX_MESSAGES,
            default_author: DEFAULT_AUTHOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub tls: Option<TlsPaths>,
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`Config::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidNumber`] when `MAX_MESSAGES_DISPLAY` or
    /// `CHAT_PORT` is not a number, [`ConfigError::IncompleteTls`] when only
    /// one of the TLS paths is set, and [`ConfigError::InvalidOrigin`] when
    /// `LOCAL_URL` or `VERCEL_URL` cannot be used as a CORS origin.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let max_messages = match get("MAX_MESSAGES_DISPLAY") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidNumber {
                key: "MAX_MESSAGES_DISPLAY",
                value,
            })?,
            None => DEFAULT_MAX_MESSAGES,
        };

        let port = match get("CHAT_PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidNumber {
                key: "CHAT_PORT",
                value,
            })?,
            None => DEFAULT_PORT,
        };

        let default_author = get("CHAT_DEFAULT_AUTHOR").unwrap_or_else(|| DEFAULT_AUTHOR.to_string());

        let tls = match (get("CHAT_TLS_CERT"), get("CHAT_TLS_KEY")) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        let mut allowed_origins: Vec<String> = LOCAL_ORIGINS.iter().map(ToString::to_string).collect();
        for key in ["LOCAL_URL", "VERCEL_URL"] {
            let Some(value) = get(key) else {
                continue;
            };
            let origin = normalize_origin(&value).ok_or(ConfigError::InvalidOrigin { key, value })?;
            if !allowed_origins.contains(&origin) {
                allowed_origins.push(origin);
            }
        }

        Ok(Config {
            session: SessionConfig {
                max_messages,
                default_author,
            },
            port,
            allowed_origins,
            tls,
        })
    }
}

// Deployment hosts are often given bare ("app.vercel.app") or as full URLs.
// Anything that is not scheme plus a plain host[:port] is rejected here, since
// the CORS layer panics on it.
fn normalize_origin(raw: &str) -> Option<String> {
    let (scheme, rest) = raw.split_once("://").unwrap_or(("https", raw));
    let scheme: Scheme = scheme.parse().ok()?;
    if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
        return None;
    }
    let authority: Authority = rest.split('/').next()?.parse().ok()?;
    if authority.as_str().contains('@') {
        return None;
    }
    Some(format!("{scheme}://{authority}"))
}
