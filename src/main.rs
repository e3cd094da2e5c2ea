use std::{future::IntoFuture, net::SocketAddr, process, sync::Arc, time::Duration};

use cachefront::{
    application::{
        engagement::EngagementService,
        error::AppError,
        repos::{PostsRepo, PostsWriteRepo},
    },
    cache::{CacheClient, CacheConfig, CounterStore},
    config,
    infra::{
        db::InMemoryPostsRepo,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::sync::watch;
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
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CheckCache(_) => run_check_cache(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings);
    let cache = Arc::new(CacheClient::connect(&cache_config).await);

    let counters = CounterStore::new(
        cache.clone(),
        cache_config.counter_ttl,
        cache_config.flag_ttl,
    );
    let repository = Arc::new(InMemoryPostsRepo::new());
    let posts_repo: Arc<dyn PostsRepo> = repository.clone();
    let posts_write_repo: Arc<dyn PostsWriteRepo> = repository;
    let engagement = Arc::new(EngagementService::new(
        posts_repo.clone(),
        posts_write_repo,
        counters,
    ));

    let state = HttpState {
        engagement,
        db: posts_repo,
        cache: cache.clone(),
    };
    let router = http::build_router(state, &cache_config);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::bind(settings.server.addr, err)))?;

    info!(
        target = "cachefront::serve",
        addr = %settings.server.addr,
        cache_ready = cache.is_ready(),
        "Listening"
    );

    let result = serve_until_shutdown(
        listener,
        router,
        settings.server.graceful_shutdown,
    )
    .await;

    cache.shutdown();
    info!(target = "cachefront::serve", "Shutdown complete");
    result
}

async fn serve_until_shutdown(
    listener: tokio::net::TcpListener,
    router: axum::Router,
    grace: Duration,
) -> Result<(), AppError> {
    let (signal_tx, signal_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(true);
    });

    let mut drain_rx = signal_rx.clone();
    let mut stop_rx = signal_rx;
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = stop_rx.wait_for(|stopping| *stopping).await;
    });

    let deadline = async move {
        let _ = drain_rx.wait_for(|stopping| *stopping).await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server.into_future() => {
            result.map_err(|err| AppError::from(InfraError::from(err)))
        }
        _ = deadline => {
            warn!(
                target = "cachefront::serve",
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target = "cachefront::serve", "Shutdown signal received");
}

async fn run_check_cache(settings: config::Settings) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings);
    if !cache_config.is_enabled() {
        return Err(AppError::validation(
            "cache store is not configured (set cache.url or cache.backend = \"memory\")",
        ));
    }

    let cache = CacheClient::connect(&cache_config).await;
    let reachable = cache.is_ready() && cache.ping().await;
    cache.shutdown();

    if !reachable {
        return Err(AppError::unexpected("cache store did not answer PING"));
    }

    info!(
        target = "cachefront::check_cache",
        backend = ?cache_config.backend,
        "Cache store answered PING"
    );
    Ok(())
}
