use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

use crate::{retry::RetryPolicy, utils::mask_credentials};

pub const DEFAULT_DATABASE: &str = "todo";
pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017/todo";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key} value {value:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid database uri {uri}: {reason}")]
    InvalidUri { uri: String, reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        Self::parse(env::var("NODE_ENV").ok().as_deref())
    }

    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Set when `PORT` came from the environment, which disables the fallback port.
    pub port_explicit: bool,
    pub environment: Environment,
    pub frontend_dir: PathBuf,
    pub database: DatabaseConfig,
    pub retry: RetryPolicy,
    pub gate_timeout: Duration,
    pub heartbeat: Duration,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let loader = Loader { lookup };

        let uri = loader.string("MONGODB_URI", DEFAULT_MONGODB_URI);

        let mut database = DatabaseConfig::from_uri(&uri)?;
        database.max_pool_size = loader.parse("DB_MAX_POOL_SIZE", "10")?;
        database.min_pool_size = loader.parse("DB_MIN_POOL_SIZE", "1")?;
        database.server_selection_timeout =
            loader.millis("DB_SERVER_SELECTION_TIMEOUT_MS", "30000")?;
        database.idle_timeout = loader.millis("DB_SOCKET_IDLE_TIMEOUT_MS", "45000")?;

        if database.min_pool_size > database.max_pool_size {
            warn!(
                "DB_MIN_POOL_SIZE {} exceeds DB_MAX_POOL_SIZE {}, clamping",
                database.min_pool_size, database.max_pool_size
            );
            database.min_pool_size = database.max_pool_size;
        }

        let retry = RetryPolicy {
            initial_delay: loader.millis("DB_RETRY_DELAY_MS", "10000")?,
            max_delay: loader.millis("DB_RETRY_MAX_DELAY_MS", "10000")?,
            jitter: loader.parse("DB_RETRY_JITTER", "0")?,
            max_attempts: loader.optional("DB_RETRY_MAX_ATTEMPTS")?,
        };

        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigError::InvalidValue {
                key: "DB_RETRY_JITTER".to_string(),
                value: retry.jitter.to_string(),
                reason: "must be between 0 and 1".to_string(),
            });
        }

        Ok(Self {
            port: loader.parse("PORT", "5000")?,
            port_explicit: (loader.lookup)("PORT").is_some(),
            environment: Environment::parse((loader.lookup)("NODE_ENV").as_deref()),
            frontend_dir: PathBuf::from(loader.string("FRONTEND_DIR", "frontend")),
            database,
            retry,
            gate_timeout: loader.millis("DB_WAIT_TIMEOUT_MS", "5000")?,
            heartbeat: loader.millis("DB_HEARTBEAT_MS", "10000")?,
        })
    }

    /// Port to try when `port` is taken. Only outside production and only when
    /// the port was not chosen explicitly.
    pub fn fallback_port(&self) -> Option<u16> {
        if self.port_explicit || self.environment.is_production() {
            return None;
        }

        self.port.checked_add(1)
    }
}

/// Storage location, validated once at startup and never patched afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub scheme: String,
    /// Host list, including user info when present.
    pub host: String,
    pub database: String,
    pub options: Vec<(String, String)>,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub server_selection_timeout: Duration,
    pub idle_timeout: Duration,
}

impl DatabaseConfig {
    pub fn from_uri(uri: &str) -> Result<Self, ConfigError> {
        let uri = uri.trim();
        let invalid = |reason| ConfigError::InvalidUri {
            uri: mask_credentials(uri),
            reason,
        };

        let (scheme, rest) = uri.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        if scheme != "mongodb" && scheme != "mongodb+srv" {
            return Err(invalid("scheme must be mongodb or mongodb+srv"));
        }

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, query),
            None => (rest, ""),
        };

        let (host, database) = location.split_once('/').unwrap_or((location, ""));
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let database = database.trim_matches('/');
        if database.contains('/') {
            return Err(invalid("database name must not contain '/'"));
        }

        let options = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (key.to_string(), value.to_string())
            })
            .collect();

        let mut config = Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            database: if database.is_empty() {
                DEFAULT_DATABASE.to_string()
            } else {
                database.to_string()
            },
            options,
            max_pool_size: 10,
            min_pool_size: 1,
            server_selection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(45),
        };

        if config.is_atlas() && !config.has_option("retryWrites") {
            config.set_default_option("retryWrites", "true");
            config.set_default_option("w", "majority");
        }

        Ok(config)
    }

    pub fn is_atlas(&self) -> bool {
        self.scheme == "mongodb+srv" || self.host.contains("mongodb.net")
    }

    pub fn has_option(&self, key: &str) -> bool {
        self.options.iter().any(|(existing, _)| existing == key)
    }

    fn set_default_option(&mut self, key: &str, value: &str) {
        if !self.has_option(key) {
            self.options.push((key.to_string(), value.to_string()));
        }
    }

    pub fn connection_string(&self) -> String {
        let mut uri = format!("{}://{}/{}", self.scheme, self.host, self.database);

        if !self.options.is_empty() {
            let query: Vec<String> = self
                .options
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();

            uri.push('?');
            uri.push_str(&query.join("&"));
        }

        uri
    }

    pub fn masked_uri(&self) -> String {
        mask_credentials(&self.connection_string())
    }
}

struct Loader<F> {
    lookup: F,
}

impl<F> Loader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, default: &str) -> String {
        (self.lookup)(key).unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
    }

    fn parse<T: FromStr>(&self, key: &str, default: &str) -> Result<T, ConfigError>
    where
        T::Err: Display,
    {
        let value = self.string(key, default);

        parse_value(key, &value)
    }

    fn optional<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T::Err: Display,
    {
        (self.lookup)(key)
            .map(|value| parse_value(key, &value))
            .transpose()
    }

    fn millis(&self, key: &str, default: &str) -> Result<Duration, ConfigError> {
        self.parse(key, default).map(Duration::from_millis)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");

        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        }
    })
}
