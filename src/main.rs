use std::{future::IntoFuture, process, sync::Arc};

use itemsvc::{
    application::{
        error::AppError,
        items::ItemService,
        outbox::{OutboxProcessor, OutboxProcessorHandle, ProcessorConfig},
        repos::{HealthRepo, ItemsRepo, OutboxRepo, UnitOfWorkFactory},
    },
    cache::{CacheConfig, ResponseCache},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, ApiState},
        memory::InMemoryRepositories,
        messaging, telemetry,
    },
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

struct Stores {
    items: Arc<dyn ItemsRepo>,
    outbox: Arc<dyn OutboxRepo>,
    units: Arc<dyn UnitOfWorkFactory>,
    health: Arc<dyn HealthRepo>,
}

async fn init_stores(settings: &config::Settings) -> Result<Stores, AppError> {
    let Some(url) = settings.database.url.as_deref() else {
        warn!("database.url is not set; using the in-memory store, data is lost on exit");
        let repos = Arc::new(InMemoryRepositories::new());
        return Ok(Stores {
            items: repos.clone(),
            outbox: repos.clone(),
            units: repos.clone(),
            health: repos,
        });
    };

    let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let repos = Arc::new(PostgresRepositories::new(pool));
    repos.ping().await?;
    info!(
        max_connections = settings.database.max_connections.get(),
        "Connected to Postgres"
    );

    Ok(Stores {
        items: repos.clone(),
        outbox: repos.clone(),
        units: repos.clone(),
        health: repos,
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let stores = init_stores(&settings).await?;
    let cache = ResponseCache::from_config(&CacheConfig::from(&settings.cache)).await;
    let items = Arc::new(ItemService::new(
        stores.items.clone(),
        stores.units.clone(),
        cache,
    ));

    let shutdown = CancellationToken::new();
    let processor = start_outbox_processor(&settings, &stores, shutdown.child_token())?;

    let router = http::build_router(ApiState {
        items,
        health: stores.health.clone(),
    });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::bind(settings.server.addr, err)))?;
    info!(addr = %settings.server.addr, "listening");

    tokio::spawn(watch_shutdown_signals(shutdown.clone()));

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    let grace = settings.server.graceful_shutdown;
    let drain_deadline = async {
        shutdown.cancelled().await;
        tokio::time::sleep(grace).await;
    };

    let result = tokio::select! {
        result = server => result
            .map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        _ = drain_deadline => {
            warn!(
                grace_seconds = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    };

    shutdown.cancel();
    if let Some(handle) = processor {
        handle.shutdown().await;
    }
    info!("Server stopped");

    result
}

fn start_outbox_processor(
    settings: &config::Settings,
    stores: &Stores,
    token: CancellationToken,
) -> Result<Option<OutboxProcessorHandle>, AppError> {
    if !settings.outbox.enabled {
        warn!("outbox.enabled is false; committed events stay pending until it is turned on");
        return Ok(None);
    }

    let publisher = messaging::build_publisher(&settings.messaging)?;
    let processor = OutboxProcessor::new(
        stores.outbox.clone(),
        publisher,
        ProcessorConfig::from(&settings.outbox),
    );
    Ok(Some(processor.spawn(token)))
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let url = settings.database.url.as_deref().ok_or_else(|| {
        AppError::from(InfraError::configuration(
            "database.url is required to run migrations",
        ))
    })?;

    let pool = PostgresRepositories::connect(url, 1)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!("Migrations applied");
    Ok(())
}

/// Cancels `shutdown` on Ctrl-C or SIGTERM.
async fn watch_shutdown_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown requested");
    shutdown.cancel();
}
