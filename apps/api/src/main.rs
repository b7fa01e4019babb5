use std::sync::Arc;

use anyhow::{bail, Context};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::store::{InMemoryStore, SeedData, SupabaseStore};
use appointment_cell::AppointmentState;
use shared_config::{AppConfig, StorageBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic booking API server");

    let config = Arc::new(AppConfig::from_env());
    let state = Arc::new(build_state(config.clone())?);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!("Listening on {}", config.bind_address);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn build_state(config: Arc<AppConfig>) -> anyhow::Result<AppointmentState> {
    match config.storage_backend {
        StorageBackend::Memory => {
            let store = match &config.seed_data_path {
                Some(path) => {
                    let raw = std::fs::read_to_string(path)
                        .with_context(|| format!("failed to read seed data from {}", path))?;
                    let seed: SeedData = serde_json::from_str(&raw)
                        .with_context(|| format!("invalid seed data in {}", path))?;
                    info!(
                        "Seeding in-memory store with {} doctors, {} patients, {} windows",
                        seed.doctors.len(),
                        seed.patients.len(),
                        seed.windows.len()
                    );
                    InMemoryStore::from_seed(seed)?
                }
                None => InMemoryStore::new(),
            };
            info!("Using in-memory appointment ledger");
            Ok(AppointmentState::with_store(config, store)?)
        }
        StorageBackend::Supabase => {
            if !config.is_supabase_configured() {
                bail!("STORAGE_BACKEND=supabase requires SUPABASE_URL, SUPABASE_ANON_PUBLIC_KEY and SUPABASE_SERVICE_ROLE_KEY");
            }
            info!("Using Supabase appointment ledger at {}", config.supabase_url);
            let store = SupabaseStore::new(&config);
            Ok(AppointmentState::with_store(config, store)?)
        }
    }
}
