//! HTTP scrape endpoint

use crate::metrics::encode_text;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::Registry;
use smartmeter_core::{MeterError, MeterResult};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Serves `GET /metrics` from a registry
pub struct MetricsExporter {
    listener: TcpListener,
    registry: Registry,
}

impl MetricsExporter {
    /// Bind the listen address
    ///
    /// Failing to bind is a startup error.
    pub async fn bind(address: &str, registry: Registry) -> MeterResult<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> MeterResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process ends
    pub async fn serve(self) -> MeterResult<()> {
        if let Ok(address) = self.listener.local_addr() {
            log::info!("Serving metrics on http://{}/metrics", address);
        }
        axum::serve(self.listener, router(self.registry))
            .await
            .map_err(MeterError::Connection)
    }
}

pub fn router(registry: Registry) -> Router {
    Router::new().route("/metrics", get(metrics)).with_state(registry)
}

async fn metrics(State(registry): State<Registry>) -> Response {
    match encode_text(&registry) {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            log::warn!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
