//! Shared application state handed to every route handler.

use std::sync::Arc;

use crate::config::Config;
use crate::render::Renderer;
use crate::sources::SourceManager;
use crate::styles::StyleManager;

/// Everything a request handler needs, cheaply cloneable (an `Arc` of this
/// is what axum actually threads through the router).
pub struct AppState {
    pub config: Config,
    pub styles: StyleManager,
    pub sources: SourceManager,
    pub renderer: Renderer,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Public base URL for the current request, honoring a reverse proxy's
    /// `X-Forwarded-Proto`/`X-Forwarded-Host` over the raw `Host` header.
    pub fn base_url(&self, headers: &axum::http::HeaderMap) -> String {
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http");
        let host = headers
            .get("x-forwarded-host")
            .or_else(|| headers.get(axum::http::header::HOST))
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        format!("{scheme}://{host}")
    }
}
