//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CliArgs, Command, DatabaseOverride, MigrateArgs, ServeArgs, ServeOverrides};

use crate::cache::CacheBackendKind;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "itemsvc";
const ENV_PREFIX: &str = "ITEMSVC";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
pub(crate) const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub(crate) const DEFAULT_CACHE_MAX_ENTRIES: usize = 1_000;
const MAX_CACHE_TTL_SECS: u64 = 24 * 3600;
const DEFAULT_OUTBOX_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_OUTBOX_BATCH_SIZE: u32 = 50;
const DEFAULT_OUTBOX_MAX_ATTEMPTS: u32 = 50;
const DEFAULT_OUTBOX_RETENTION_HOURS: u64 = 168;
const MAX_OUTBOX_RETENTION_HOURS: u64 = 10 * 365 * 24;
const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 5;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub outbox: OutboxSettings,
    pub messaging: MessagingSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Without a URL the service runs on the in-process store.
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub backend: CacheBackendKind,
    pub ttl: Duration,
    pub max_entries: NonZeroUsize,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OutboxSettings {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub batch_size: NonZeroU32,
    /// `None` when configured as 0: failed rows are retried forever.
    pub max_attempts: Option<NonZeroU32>,
    /// `None` when configured as 0: processed rows are never purged.
    pub retention: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherKind {
    Log,
    Webhook,
}

#[derive(Debug, Clone)]
pub struct MessagingSettings {
    pub publisher: PublisherKind,
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    outbox: RawOutboxSettings,
    messaging: RawMessagingSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(enabled) = overrides.outbox_enabled {
            self.outbox.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.outbox_poll_interval_seconds {
            self.outbox.poll_interval_seconds = Some(seconds);
        }
        if let Some(size) = overrides.outbox_batch_size {
            self.outbox.batch_size = Some(size);
        }
        if let Some(max) = overrides.outbox_max_attempts {
            self.outbox.max_attempts = Some(max);
        }
        if let Some(publisher) = overrides.messaging_publisher.as_ref() {
            self.messaging.publisher = Some(publisher.clone());
        }
        if let Some(url) = overrides.messaging_webhook_url.as_ref() {
            self.messaging.webhook_url = Some(url.clone());
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            outbox,
            messaging,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            outbox: build_outbox_settings(outbox)?,
            messaging: build_messaging_settings(messaging)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("") | Some("memory") => CacheBackendKind::Memory,
        Some("redis") => CacheBackendKind::Redis,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}` (expected memory or redis)"),
            ));
        }
    };

    let ttl_seconds = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_seconds == 0 || ttl_seconds > MAX_CACHE_TTL_SECS {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            format!("must be between 1 and {MAX_CACHE_TTL_SECS}"),
        ));
    }

    let max_entries = cache
        .max_entries
        .map(usize::try_from)
        .unwrap_or(Ok(DEFAULT_CACHE_MAX_ENTRIES))
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid(
                "cache.max_entries",
                "must be greater than zero and fit in usize",
            )
        })?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        backend,
        ttl: Duration::from_secs(ttl_seconds),
        max_entries,
        redis_url: non_blank(cache.redis_url),
    })
}

fn build_outbox_settings(outbox: RawOutboxSettings) -> Result<OutboxSettings, LoadError> {
    let poll_secs = outbox
        .poll_interval_seconds
        .unwrap_or(DEFAULT_OUTBOX_POLL_INTERVAL_SECS);
    if poll_secs == 0 {
        return Err(LoadError::invalid(
            "outbox.poll_interval_seconds",
            "must be greater than zero",
        ));
    }

    let batch_size = non_zero_u32(
        outbox
            .batch_size
            .unwrap_or(DEFAULT_OUTBOX_BATCH_SIZE)
            .into(),
        "outbox.batch_size",
    )?;

    let max_attempts =
        NonZeroU32::new(outbox.max_attempts.unwrap_or(DEFAULT_OUTBOX_MAX_ATTEMPTS));

    let retention_hours = outbox
        .retention_hours
        .unwrap_or(DEFAULT_OUTBOX_RETENTION_HOURS);
    let retention = match retention_hours {
        0 => None,
        hours if hours > MAX_OUTBOX_RETENTION_HOURS => {
            return Err(LoadError::invalid(
                "outbox.retention_hours",
                format!("must not exceed {MAX_OUTBOX_RETENTION_HOURS} (0 keeps rows forever)"),
            ));
        }
        hours => Some(Duration::from_secs(hours * 3600)),
    };

    Ok(OutboxSettings {
        enabled: outbox.enabled.unwrap_or(true),
        poll_interval: Duration::from_secs(poll_secs),
        batch_size,
        max_attempts,
        retention,
    })
}

fn build_messaging_settings(
    messaging: RawMessagingSettings,
) -> Result<MessagingSettings, LoadError> {
    let publisher = match messaging.publisher.as_deref().map(str::trim) {
        None | Some("") | Some("log") => PublisherKind::Log,
        Some("webhook") => PublisherKind::Webhook,
        Some(other) => {
            return Err(LoadError::invalid(
                "messaging.publisher",
                format!("unknown publisher `{other}` (expected log or webhook)"),
            ));
        }
    };

    let webhook_url = non_blank(messaging.webhook_url);
    if publisher == PublisherKind::Webhook && webhook_url.is_none() {
        return Err(LoadError::invalid(
            "messaging.webhook_url",
            "required when messaging.publisher is webhook",
        ));
    }

    let timeout_secs = messaging
        .webhook_timeout_seconds
        .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "messaging.webhook_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(MessagingSettings {
        publisher,
        webhook_url,
        webhook_timeout: Duration::from_secs(timeout_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    backend: Option<String>,
    ttl_seconds: Option<u64>,
    max_entries: Option<u64>,
    redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOutboxSettings {
    enabled: Option<bool>,
    poll_interval_seconds: Option<u64>,
    batch_size: Option<u32>,
    max_attempts: Option<u32>,
    retention_hours: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMessagingSettings {
    publisher: Option<String>,
    webhook_url: Option<String>,
    webhook_timeout_seconds: Option<u64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
