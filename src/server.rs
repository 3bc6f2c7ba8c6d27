//! HTTP surface: the Prometheus scrape endpoint and a landing page.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tracing::error;

use crate::collector::AllSettings;

#[derive(Clone)]
pub struct AppState {
    registry: Registry,
    /// Scrapers that must hit Elasticsearch before each gather
    all_settings: Option<Arc<AllSettings>>,
    metrics_path: Arc<str>,
}

impl AppState {
    pub fn new(registry: Registry, metrics_path: &str) -> Self {
        Self {
            registry,
            all_settings: None,
            metrics_path: Arc::from(metrics_path),
        }
    }

    pub fn with_all_settings(mut self, all_settings: Arc<AllSettings>) -> Self {
        self.all_settings = Some(all_settings);
        self
    }
}

pub fn router(state: AppState) -> Router {
    let metrics_path = state.metrics_path.to_string();
    let mut app = Router::new().route(&metrics_path, get(metrics));
    if metrics_path != "/" {
        app = app.route("/", get(landing));
    }
    app.with_state(state)
}

async fn metrics(State(state): State<AppState>) -> Response {
    if let Some(all_settings) = &state.all_settings {
        all_settings.scrape().await;
    }

    let families = state.registry.gather();
    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut body) {
        error!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], body).into_response()
}

async fn landing(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        r#"<html>
<head><title>Elasticsearch Exporter</title></head>
<body>
<h1>Elasticsearch Exporter</h1>
<p><a href="{path}">Metrics</a></p>
</body>
</html>"#,
        path = state.metrics_path
    ))
}
