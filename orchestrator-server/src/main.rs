mod auth;
mod dispatch;
mod error;
mod orchestrator;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Router};
use orchestrator_core::store::OrchestratorStore;
use orchestrator_core::store::memory::MemoryStore;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::auth::tenant_boundary;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let database_url = parse_database_url();

    let store: Arc<dyn OrchestratorStore> = match database_url {
        #[cfg(feature = "postgres")]
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL...");
            let pool = sqlx::PgPool::connect(&url).await?;
            let pg = orchestrator_core::store::postgres::PostgresStore::new(pool);
            pg.migrate().await?;
            tracing::info!("Using PostgresStore (migrations applied)");
            Arc::new(pg)
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => {
            tracing::warn!(
                "DATABASE_URL set but postgres feature not enabled, using MemoryStore"
            );
            Arc::new(MemoryStore::new())
        }
        None => {
            tracing::info!("Using MemoryStore (no database URL configured)");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(store);

    let authenticated = Router::new()
        .route(
            "/discovery/endpoint",
            get(routes::discovery::get_endpoint).post(routes::discovery::set_endpoint),
        )
        .route("/discovery/catalog", get(routes::discovery::list_catalog))
        .route("/workflows", post(routes::workflows::upload))
        .route(
            "/workflows/:process_key/versions/:version",
            get(routes::workflows::get_version),
        )
        .route(
            "/workflows/:process_key/versions/:version/instances",
            post(routes::workflows::start_instance),
        )
        .route("/instances/:id", get(routes::instances::get_instance))
        .route("/tasks", get(routes::tasks::list_tasks))
        .route("/tasks/:id/complete", post(routes::tasks::complete_task))
        .route("/service-tasks", get(routes::service_tasks::list_service_tasks))
        .route(
            "/service-tasks/:id/start",
            post(routes::service_tasks::start_service_task),
        )
        .route(
            "/service-tasks/:id/callback",
            post(routes::service_tasks::service_task_callback),
        )
        .route("/audit", get(routes::audit::list_audit_events))
        .layer(middleware::from_fn_with_state(state.clone(), tenant_boundary));

    let app = Router::new()
        .route("/health", get(routes::health::health))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let addr: SocketAddr = bind_addr.parse()?;
    tracing::info!("orchestrator-server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Parse database URL from `--database-url <url>` CLI arg or `DATABASE_URL` env var.
fn parse_database_url() -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    if let Some(url) = args
        .windows(2)
        .find(|w| w[0] == "--database-url")
        .map(|w| w[1].clone())
    {
        return Some(url);
    }
    std::env::var("DATABASE_URL").ok()
}
