use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, MethodRouter};
use axum::Router;
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::state::{AppState, UploadRateLimit};
use crate::vault::routes as vault_routes;

/// Default body limit when none is configured (matches `[limits]` default).
const DEFAULT_MAX_UPLOAD_SIZE_MB: u32 = 100;

/// Milliseconds between token refills so that `per_minute` tokens arrive
/// each minute.
fn replenish_interval_ms(per_minute: u32) -> u64 {
    (60_000 / u64::from(per_minute.max(1))).max(1)
}

/// Wrap the upload handler in a per-IP governor when a limit is configured.
/// Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>.
fn upload_route(limit: Option<UploadRateLimit>) -> MethodRouter<AppState> {
    let upload = post(vault_routes::put_record_route);
    let Some(limit) = limit else {
        return upload;
    };

    let Some(config) = GovernorConfigBuilder::default()
        .key_extractor(PeerIpKeyExtractor)
        .per_millisecond(replenish_interval_ms(limit.per_minute))
        .burst_size(limit.burst.max(1))
        .finish()
    else {
        tracing::warn!(
            "Invalid upload rate limit ({}/min, burst {}), uploads are not throttled",
            limit.per_minute,
            limit.burst
        );
        return upload;
    };
    let governor_config = Arc::new(config);

    // Spawn background task to clean up rate limiter state
    let limiter = governor_config.limiter().clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            limiter.retain_recent();
        }
    });

    tracing::info!(
        "Upload rate limit: {}/min per IP, burst {}",
        limit.per_minute,
        limit.burst
    );
    upload.layer(GovernorLayer {
        config: governor_config,
    })
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let max_upload_mb = state
        .max_upload_size_mb
        .unwrap_or(DEFAULT_MAX_UPLOAD_SIZE_MB) as usize;

    let provenance_routes = Router::new()
        .route(
            "/api/provenance/{device_key}",
            get(vault_routes::list_records_route).merge(upload_route(state.upload_rate_limit)),
        )
        .route(
            "/api/attachment/{device_key}/{attachment_id}",
            get(vault_routes::get_attachment_route),
        )
        .layer(DefaultBodyLimit::max(max_upload_mb * 1024 * 1024));

    // Health check
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(provenance_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
