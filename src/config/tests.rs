use super::*;

#[test]
fn defaults_match_shipped_configuration() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert!(settings.database.url.is_none());
    assert_eq!(settings.cache.backend, CacheBackendKind::Memory);
    assert_eq!(settings.cache.ttl, Duration::from_secs(300));
    assert_eq!(settings.outbox.poll_interval, Duration::from_secs(10));
    assert_eq!(settings.outbox.batch_size.get(), 50);
    assert_eq!(settings.outbox.max_attempts.map(NonZeroU32::get), Some(50));
    assert_eq!(
        settings.outbox.retention,
        Some(Duration::from_secs(168 * 3600))
    );
    assert_eq!(settings.messaging.publisher, PublisherKind::Log);
}

#[test]
fn cache_config_defaults_follow_loaded_settings() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    let loaded = crate::cache::CacheConfig::from(&settings.cache);
    let fallback = crate::cache::CacheConfig::default();

    assert_eq!(loaded.ttl(), fallback.ttl());
    assert_eq!(loaded.max_entries, fallback.max_entries);
    assert_eq!(loaded.backend, fallback.backend);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_disables_retry_cap_and_retention() {
    let mut raw = RawSettings::default();
    raw.outbox.max_attempts = Some(0);
    raw.outbox.retention_hours = Some(0);

    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(settings.outbox.max_attempts.is_none());
    assert!(settings.outbox.retention.is_none());
}

#[test]
fn rejects_zero_batch_size() {
    let mut raw = RawSettings::default();
    raw.outbox.batch_size = Some(0);

    let err = Settings::from_raw(raw).expect_err("invalid batch size");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "outbox.batch_size",
            ..
        }
    ));
}

#[test]
fn rejects_cache_ttl_beyond_one_day() {
    let mut raw = RawSettings::default();
    raw.cache.ttl_seconds = Some(u64::MAX);

    let err = Settings::from_raw(raw.clone()).expect_err("ttl too large");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.ttl_seconds",
            ..
        }
    ));

    raw.cache.ttl_seconds = Some(24 * 3600);
    let settings = Settings::from_raw(raw).expect("one day is accepted");
    assert_eq!(settings.cache.ttl, Duration::from_secs(86_400));
}

#[test]
fn rejects_retention_beyond_ten_years() {
    let mut raw = RawSettings::default();
    raw.outbox.retention_hours = Some(200_000_000);

    let err = Settings::from_raw(raw.clone()).expect_err("retention too large");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "outbox.retention_hours",
            ..
        }
    ));

    raw.outbox.retention_hours = Some(87_600);
    let settings = Settings::from_raw(raw).expect("ten years is accepted");
    assert_eq!(
        settings.outbox.retention,
        Some(Duration::from_secs(87_600 * 3600))
    );
}

#[test]
fn rejects_unknown_cache_backend() {
    let mut raw = RawSettings::default();
    raw.cache.backend = Some("memcached".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid backend");
    assert!(err.to_string().contains("memcached"));
}

#[test]
fn webhook_publisher_requires_url() {
    let mut raw = RawSettings::default();
    raw.messaging.publisher = Some("webhook".to_string());
    assert!(Settings::from_raw(raw.clone()).is_err());

    raw.messaging.webhook_url = Some("http://127.0.0.1:9000/events".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.messaging.publisher, PublisherKind::Webhook);
}

#[test]
fn blank_database_url_means_in_memory() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["itemsvc"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_migrate_arguments() {
    let args = CliArgs::parse_from([
        "itemsvc",
        "migrate",
        "--database-url",
        "postgres://example",
    ]);

    match args.command.expect("migrate command") {
        Command::Migrate(migrate) => {
            assert_eq!(
                migrate.database.database_url.as_deref(),
                Some("postgres://example")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "itemsvc",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--outbox-max-attempts",
        "0",
        "--cache-enabled",
        "false",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.outbox_max_attempts, Some(0));
            assert_eq!(serve.overrides.cache_enabled, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}
