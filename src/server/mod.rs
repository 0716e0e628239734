pub mod handlers;
pub mod types;

use crate::{
    Error, Result,
    config::Config,
    deploy::{DeployedApp, Deployer, DeploymentStore},
    model::BuiltinInitializer,
};
use axum::{
    Router,
    routing::{get, post},
};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

pub use handlers::AppState;

#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    /// Deploy only these apps; empty means every configured app.
    pub apps: Vec<String>,
    /// Leave deployments marked ready when the server exits.
    pub keep: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/apps", get(handlers::list_apps))
        .route("/:app/generate", post(handlers::generate))
        .route("/:app/generate_stream", post(handlers::generate_stream))
        .route("/:app/text_to_image", post(handlers::text_to_image))
        .fallback(handlers::not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// URL clients should use to reach a server bound to `addr`.
pub fn public_base_url(addr: SocketAddr) -> String {
    if addr.ip().is_unspecified() {
        format!("http://127.0.0.1:{}", addr.port())
    } else {
        format!("http://{}", addr)
    }
}

pub async fn run(config: Config, options: ServeOptions) -> Result<()> {
    run_until(config, options, shutdown_signal()).await
}

/// Deploys the selected apps, prints their connection info, serves until
/// `shutdown` resolves and then tears the deployments down.
pub async fn run_until(
    config: Config,
    options: ServeOptions,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let selected: Vec<_> = if options.apps.is_empty() {
        config.apps.iter().collect()
    } else {
        options
            .apps
            .iter()
            .map(|name| {
                config.app(name).ok_or_else(|| Error::AppNotFound {
                    app_name: name.clone(),
                })
            })
            .collect::<Result<_>>()?
    };
    if selected.is_empty() {
        return Err(Error::config("no apps configured to deploy"));
    }

    let db_path = std::env::var("DEPLOYMENTS_DB_PATH")
        .unwrap_or_else(|_| config.server.database_path.clone());
    let store = Arc::new(DeploymentStore::new(&db_path).await?);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let deployer = Deployer::new(
        store,
        Arc::new(BuiltinInitializer),
        public_base_url(local_addr),
    );

    let mut deployed: Vec<DeployedApp> = Vec::new();
    for app in selected {
        match deployer.deploy(app).await {
            Ok(app) => {
                println!("{}", app.connection_info().render());
                deployed.push(app);
            }
            Err(e) => {
                error!("Deploying app {} failed: {}", app.name, e);
                teardown_all(&deployer, &deployed).await;
                return Err(e);
            }
        }
    }

    let served = deployed.clone();
    let app = router(AppState::new(deployed));

    info!("Starting server on {}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server stopped");
    if !options.keep {
        teardown_all(&deployer, &served).await;
    }

    Ok(())
}

async fn teardown_all(deployer: &Deployer, apps: &[DeployedApp]) {
    for app in apps {
        if let Err(e) = deployer.teardown(&app.record.id).await {
            error!("Tearing down {} failed: {}", app.record.id, e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
