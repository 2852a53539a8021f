use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the itemsvc binary.
#[derive(Debug, Parser)]
#[command(
    name = "itemsvc",
    version,
    about = "Item service with a transactional outbox"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "ITEMSVC_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP API and the outbox processor.
    Serve(Box<ServeArgs>),
    /// Apply pending database migrations and exit.
    #[command(name = "migrate")]
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Toggle the response cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the cache backend (memory|redis).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the Redis URL used by the redis cache backend.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub cache_redis_url: Option<String>,

    /// Toggle the background outbox processor.
    #[arg(
        long = "outbox-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub outbox_enabled: Option<bool>,

    /// Override the outbox poll interval.
    #[arg(long = "outbox-poll-interval-seconds", value_name = "SECONDS")]
    pub outbox_poll_interval_seconds: Option<u64>,

    /// Override the number of rows published per cycle.
    #[arg(long = "outbox-batch-size", value_name = "COUNT")]
    pub outbox_batch_size: Option<u32>,

    /// Override the publish attempt cap; 0 retries forever.
    #[arg(long = "outbox-max-attempts", value_name = "COUNT")]
    pub outbox_max_attempts: Option<u32>,

    /// Override the message publisher (log|webhook).
    #[arg(long = "messaging-publisher", value_name = "KIND")]
    pub messaging_publisher: Option<String>,

    /// Override the webhook endpoint used by the webhook publisher.
    #[arg(long = "messaging-webhook-url", value_name = "URL")]
    pub messaging_webhook_url: Option<String>,
}
