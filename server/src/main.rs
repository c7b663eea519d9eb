use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

use provenance_server::config::{generate_config_template, Config, StorageBackend};
use provenance_server::state::AppState;
use provenance_server::storage::{
    LocalObjectStore, MemoryObjectStore, ObjectStore, RetryPolicy, RetryingStore, SharedStore,
};
use provenance_server::{db, routes};

/// Put the retry decorator in front of a concrete store and share it.
fn with_retry<S: ObjectStore + 'static>(store: S, policy: RetryPolicy) -> SharedStore {
    Arc::new(RetryingStore::new(store, policy))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("provenance_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter())
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter())
            .init();
    }

    tracing::info!(
        "Provenance server v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let storage = config.storage();
    let retry = config.retry().policy();
    let limits = config.limits();

    // One store handle for the whole process
    let store = match storage.backend {
        StorageBackend::Local => {
            let db = db::init_db(&config.data_dir)?;
            let root = Path::new(&config.data_dir).join(&storage.container);
            let local = LocalObjectStore::open(db, root.clone())?.with_page_size(storage.list_page_size);
            tracing::info!("Object store: local, bodies under {}", root.display());
            with_retry(local, retry)
        }
        StorageBackend::Memory => {
            tracing::warn!("Object store: memory, records are lost on shutdown");
            with_retry(MemoryObjectStore::new(), retry)
        }
    };

    let app_state = AppState {
        store,
        max_upload_size_mb: Some(limits.max_upload_size_mb),
        upload_rate_limit: limits.upload_rate_limit(),
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
