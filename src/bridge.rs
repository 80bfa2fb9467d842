//! Narrow HTTP/SSE bridge republishing Event Bus traffic and System Monitor
//! health to an external event consumer (the out-of-scope GUI process). This
//! module carries no GUI logic of its own: it only serializes what the Event
//! Bus, System Monitor, and Metrics Recorder already expose.

use crate::event_bus::{EventBus, EventHandler};
use crate::metrics::MetricsRecorder;
use crate::monitor::SystemMonitor;
use crate::types::event::event_type;
use crate::types::event::BackpressurePolicy;
use crate::types::{Event, Priority};
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};

pub struct AppState {
    monitor: Arc<SystemMonitor>,
    metrics: Arc<MetricsRecorder>,
    events: broadcast::Sender<Event>,
}

/// Forwards matching events from the Event Bus onto the bridge's broadcast
/// channel. Dropped subscribers (a lagging SSE client) are tolerated: the
/// broadcast channel itself handles backlog, independent of the Event Bus's
/// own per-subscriber queue.
struct Republish {
    sender: broadcast::Sender<Event>,
    min_priority: Priority,
}

#[async_trait]
impl EventHandler for Republish {
    async fn handle(&self, event: Event) {
        if event.priority >= self.min_priority {
            let _ = self.sender.send(event);
        }
    }
}

fn parse_priority(s: &str) -> Priority {
    match s.to_ascii_lowercase().as_str() {
        "low" => Priority::Low,
        "high" => Priority::High,
        "critical" => Priority::Critical,
        _ => Priority::Normal,
    }
}

/// Subscribes the republisher to every known event type so `/events`
/// reflects the whole bus, not just one type.
pub async fn install(event_bus: &Arc<EventBus>, min_priority: &str) -> broadcast::Sender<Event> {
    let (tx, _rx) = broadcast::channel(1024);
    let min_priority = parse_priority(min_priority);

    for kind in [
        event_type::SYSTEM_HEALTH_CHANGED,
        event_type::RESOURCE_ALERT_CREATED,
        event_type::METRIC_RECORDED,
        event_type::ERROR_OCCURRED,
        event_type::RESOURCE_STATE_CHANGED,
    ] {
        let handler = Arc::new(Republish {
            sender: tx.clone(),
            min_priority,
        });
        event_bus.subscribe(kind, handler, BackpressurePolicy::DropOldest).await;
    }

    tx
}

pub fn router(monitor: Arc<SystemMonitor>, metrics: Arc<MetricsRecorder>, events: broadcast::Sender<Event>) -> Router {
    let state = Arc::new(AppState { monitor, metrics, events });
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/events", get(events_stream))
        .route("/metrics/:name", get(metric_window))
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<crate::types::circuit::SystemHealth> {
    Json(state.monitor.health().await)
}

async fn events_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(SseEvent::default().event(event.event_type).data(json))),
            Err(_) => None,
        },
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Serialize)]
struct MetricWindowResponse {
    name: String,
    samples: Vec<crate::types::metrics::MetricSample>,
}

async fn metric_window(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<MetricWindowResponse>, (StatusCode, String)> {
    let samples = state.metrics.get(&name, None, Some(200)).await;
    Ok(Json(MetricWindowResponse { name, samples }))
}

pub async fn serve(router: Router, address: &str, port: u16) -> std::io::Result<()> {
    let addr = format!("{}:{}", address, port);
    tracing::info!("Starting HTTP/SSE bridge on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await
}
