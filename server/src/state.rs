use crate::storage::SharedStore;

/// Per-IP limit applied to the upload route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRateLimit {
    /// Sustained uploads allowed per minute
    pub per_minute: u32,
    /// Uploads allowed in a burst before the limiter kicks in
    pub burst: u32,
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Object store shared by every request (configured once at startup)
    pub store: SharedStore,
    /// Max request body size in megabytes (None = axum default of 2 MB)
    pub max_upload_size_mb: Option<u32>,
    /// Optional upload throttling
    pub upload_rate_limit: Option<UploadRateLimit>,
}
