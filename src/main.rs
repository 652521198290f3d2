use blog_cms::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    repository::{PostgresRepository, RepositoryState},
    storage::{ImageStore, ImageStoreState, S3ImageStore, S3Settings},
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Entry point: loads configuration, initializes logging, the database, the image
/// store and the HTTP server, then serves until Ctrl-C or SIGTERM.
#[tokio::main]
async fn main() {
    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // 2. Logging Filter Setup
    // RUST_LOG wins; otherwise debug for this crate and request logs from tower_http.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "blog_cms=debug,tower_http=info".into());

    // 3. Initialize Logging based on Environment
    match config.env {
        Env::Local => {
            // LOCAL: Pretty print output for human readability.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            // PROD: JSON lines for log aggregation.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!(
        "Application starting in {:?} mode (post write policy: {:?})",
        config.env,
        config.post_write_policy
    );

    // 4. Database Initialization (Postgres) and schema migrations
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("FATAL: Failed to apply database migrations.");

    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    // 5. Image Store Initialization (S3/MinIO)
    let image_store = S3ImageStore::new(S3Settings {
        endpoint: &config.s3_endpoint,
        region: &config.s3_region,
        access_key: &config.s3_key,
        secret_key: &config.s3_secret,
        bucket: &config.s3_bucket,
        folder: &config.image_folder,
        public_base_url: &config.s3_public_url,
    });

    // LOCAL-ONLY: create the MinIO bucket on first run.
    if config.env == Env::Local {
        image_store.ensure_bucket_exists().await;
    }

    let images = Arc::new(image_store) as ImageStoreState;

    // 6. Unified State Assembly
    let port = config.port;
    let app_state = AppState::new(repo, images, config);

    // 7. Router and Server Startup
    let app = create_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .expect("FATAL: Failed to bind the HTTP port.");

    tracing::info!("Listening on {}", addr);
    tracing::info!(
        "API Documentation (Swagger UI) available at: http://localhost:{}/swagger-ui",
        port
    );

    // Connect info gives the rate limiter the peer address.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("FATAL: HTTP server error.");

    tracing::info!("Server stopped");
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down gracefully");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("SIGTERM received, shutting down gracefully");
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
}
