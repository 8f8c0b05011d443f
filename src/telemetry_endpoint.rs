//! Here we expose prometheus metrics about the jira service
use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use axum::{
	http::{header::CONTENT_TYPE, StatusCode},
	response::{IntoResponse, Response},
	routing::get,
	Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryEndpointSettings {
	pub bind_address: IpAddr,
	pub port: u16,
}

impl TelemetryEndpointSettings {
	pub fn to_socket_addr(&self) -> SocketAddr {
		SocketAddr::new(self.bind_address, self.port)
	}
}

async fn metrics_handler() -> Response {
	let mut buffer = vec![];
	let encoder = TextEncoder::new();
	let metric_families = prometheus::gather();

	if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
		tracing::error!("failed to encode metrics: {err:?}");
		return StatusCode::INTERNAL_SERVER_ERROR.into_response();
	}

	([(CONTENT_TYPE, encoder.format_type().to_owned())], buffer).into_response()
}

fn router() -> Router {
	Router::new().route("/metrics", get(metrics_handler))
}

pub async fn run_telemetry_endpoint(settings: TelemetryEndpointSettings) -> Result<()> {
	axum::Server::bind(&settings.to_socket_addr())
		.serve(router().into_make_service())
		.await
		.context("telemetry endpoint crashed")?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use axum::{body::Body, http::Request};
	use tower::ServiceExt;

	use super::*;
	use crate::metrics;

	#[tokio::test]
	async fn metrics_are_exposed_as_text() {
		metrics::RECEIVED_EVENTS.with_label_values(&["noop"]).inc();

		let response = router()
			.oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
			.await
			.unwrap();

		assert_eq!(response.status(), StatusCode::OK);
		assert!(response.headers()[CONTENT_TYPE].to_str().unwrap().starts_with("text/plain"));

		let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
		let body = String::from_utf8(body.to_vec()).unwrap();
		assert!(body.contains("keptn_jira_event_receiver_received_events_total"));
	}
}
