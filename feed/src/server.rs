//! ==============================================================================
//! server.rs - dashboard http surface
//! ==============================================================================
//!
//! routes:
//!     GET /            minimal html view (nft artwork, reading, banner)
//!     GET /api/view    reconciled view model + derived band
//!     GET /api/chart   recent points for the temperature chart
//!     GET /health      liveness + store phase
//!     GET /images/*    band artwork, served from `images_dir` when set
//!
//! the server only ever reads the latest `ViewModel` snapshot from the
//! store's watch channel; it never writes.
//!
//! ==============================================================================

use crate::domain::{now_millis, Band, ErrorKind, Sample, DEFAULT_IMAGE};
use crate::store::{Phase, ViewModel};

use axum::{
    extract::State,
    response::{Html, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

#[derive(Clone)]
pub struct AppState {
    pub view: watch::Receiver<ViewModel>,
    pub chart_points: usize,
    /// prefix for artwork links, e.g. "/images" or a CDN url
    pub image_base: String,
    /// local artwork directory mounted at /images
    pub images_dir: Option<PathBuf>,
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(dashboard_handler))
        .route("/api/view", get(view_handler))
        .route("/api/chart", get(chart_handler))
        .route("/health", get(health_handler));
    if let Some(dir) = &state.images_dir {
        app = app.nest_service("/images", ServeDir::new(dir));
    }
    app.layer(CorsLayer::permissive()).with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn run_server(
    bind: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ==============================================================================
// responses
// ==============================================================================

#[derive(Debug, Serialize)]
pub struct ViewResponse {
    pub current: Option<Sample>,
    pub band: Option<Band>,
    pub image: &'static str,
    pub last_updated: Option<String>,
    pub history: Vec<Sample>,
    pub error_state: Option<ErrorKind>,
    pub error_message: Option<&'static str>,
    pub phase: Phase,
}

impl ViewResponse {
    pub fn build(view: &ViewModel, now_ms: u64) -> Self {
        let band = view.current.as_ref().map(Sample::band);
        Self {
            current: view.current.clone(),
            band,
            image: band.map_or(DEFAULT_IMAGE, Band::image_file),
            last_updated: view
                .current
                .as_ref()
                .map(|s| format_time_ago(s.timestamp_ms, now_ms)),
            history: view.history.clone(),
            error_state: view.error_state,
            error_message: view.error_state.map(ErrorKind::banner),
            phase: view.phase,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ChartPoint {
    /// epoch ms
    pub x: u64,
    /// °F
    pub y: f64,
}

#[derive(Debug, Serialize)]
pub struct ChartResponse {
    pub label: &'static str,
    pub colour: &'static str,
    pub points: Vec<ChartPoint>,
}

impl ChartResponse {
    pub fn build(view: &ViewModel, points: usize) -> Self {
        // line colour follows the current reading, moderate when unknown
        let colour = view
            .current
            .as_ref()
            .map_or(Band::Moderate, Sample::band)
            .colour();
        Self {
            label: "Temperature (°F)",
            colour,
            points: view
                .recent(points)
                .iter()
                .map(|s| ChartPoint { x: s.timestamp_ms, y: s.temperature })
                .collect(),
        }
    }
}

/// "Just now" / "N minutes ago" / "N hours ago"
pub fn format_time_ago(timestamp_ms: u64, now_ms: u64) -> String {
    let seconds = now_ms.saturating_sub(timestamp_ms) / 1000;
    if seconds < 60 {
        "Just now".to_string()
    } else if seconds < 3600 {
        format!("{} minutes ago", seconds / 60)
    } else {
        format!("{} hours ago", seconds / 3600)
    }
}

// ==============================================================================
// handlers
// ==============================================================================

async fn view_handler(State(state): State<AppState>) -> Json<ViewResponse> {
    let view = state.view.borrow().clone();
    Json(ViewResponse::build(&view, now_millis()))
}

async fn chart_handler(State(state): State<AppState>) -> Json<ChartResponse> {
    let view = state.view.borrow().clone();
    Json(ChartResponse::build(&view, state.chart_points))
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let phase = state.view.borrow().phase;
    Json(serde_json::json!({ "status": "ok", "phase": phase }))
}

async fn dashboard_handler(State(state): State<AppState>) -> Html<String> {
    let view = state.view.borrow().clone();
    Html(render_dashboard(&ViewResponse::build(&view, now_millis()), &state.image_base))
}

fn render_dashboard(view: &ViewResponse, image_base: &str) -> String {
    let banner = view
        .error_message
        .map(|m| format!(r#"<div class="error-banner">⚠️ {}</div>"#, html_escape(m)))
        .unwrap_or_default();

    let body = match (&view.current, view.band) {
        (Some(current), Some(band)) => format!(
            r#"<div class="nft-container {class}">
    <img src="{base}/{image}" alt="Temperature NFT" class="temperature-nft">
    <div class="temperature-badge">{temp}°F</div>
    <p>📍 {location}</p>
    <p>Status: <span class="{class}">{label}</span></p>
    <p>🕒 {updated}</p>
</div>"#,
            class = band.css_class(),
            base = html_escape(image_base.trim_end_matches('/')),
            image = band.image_file(),
            temp = current.temperature,
            location = html_escape(&current.location),
            label = band.label(),
            updated = view.last_updated.as_deref().unwrap_or(""),
        ),
        _ => match view.phase {
            Phase::Live => r#"<p class="no-data">No sensor data available</p>"#.to_string(),
            _ => r#"<p class="loading">Connecting to IoT sensor...</p>"#.to_string(),
        },
    };

    format!(
        r#"<!doctype html>
<html>
<head><title>AutoChain IoT Tracker</title><meta http-equiv="refresh" content="5"></head>
<body style="font-family: system-ui; padding: 2rem;">
<h1>AutoChain IoT Tracker</h1>
{banner}
{body}
<p>{count} readings in history</p>
</body>
</html>"#,
        count = view.history.len(),
    )
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
