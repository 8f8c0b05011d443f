use std::{
	net::{IpAddr, Ipv4Addr, SocketAddr},
	sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
	body::Bytes,
	extract::Extension,
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::post,
	Router,
};
use serde::Deserialize;

use crate::{
	dispatcher::{self, Action},
	event::{self, EventData, InboundEvent},
	metrics,
	orchestrator::{TicketKind, TicketLifecycleOrchestrator, WorkflowError},
	settings::Settings,
	ticket_renderer::{RenderedTicket, TicketRenderer},
};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReceiverSettings {
	pub bind_address: IpAddr,
	pub port: u16,
	/// url path keptn posts its cloudevents to
	pub path: String,
}

impl Default for ReceiverSettings {
	fn default() -> Self {
		Self {
			bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
			port: 8080,
			path: String::from("/"),
		}
	}
}

impl ReceiverSettings {
	pub fn to_socket_addr(&self) -> SocketAddr {
		SocketAddr::new(self.bind_address, self.port)
	}

	/// path with a leading slash, as the router requires one
	fn route(&self) -> String {
		let path = self.path.trim();
		if path.starts_with('/') {
			path.to_owned()
		} else {
			format!("/{path}")
		}
	}
}

struct State {
	settings: Arc<Settings>,
	renderer: TicketRenderer,
	orchestrator: TicketLifecycleOrchestrator,
}

impl State {
	pub fn new(settings: Arc<Settings>) -> Result<Self> {
		let renderer = TicketRenderer::new(&settings).context("failed to construct ticket renderer")?;
		let orchestrator =
			TicketLifecycleOrchestrator::new(&settings).context("failed to construct jira client")?;

		Ok(Self { settings, renderer, orchestrator })
	}

	async fn create(&self, ticket: RenderedTicket, kind: TicketKind, event: &InboundEvent) {
		match self.orchestrator.create_ticket(ticket, kind, event).await {
			Ok(report) => tracing::debug!("finished creating {}: {report:?}", report.issue.key()),
			Err(err) => tracing::error!("event {}: {err}", event.id),
		}
	}

	async fn close(&self, event: &InboundEvent) {
		match self.orchestrator.close_ticket(event).await {
			Ok(report) => tracing::debug!("finished closing {}: {report:?}", report.issue.key()),
			Err(err @ WorkflowError::NoMatchingIssue { .. }) => tracing::info!("{err}"),
			Err(err) => tracing::error!("event {}: {err}", event.id),
		}
	}

	/// runs the workflow `event` classifies to
	async fn process(&self, event: InboundEvent) {
		let action = dispatcher::classify(&event, &self.settings.jira);
		metrics::RECEIVED_EVENTS.with_label_values(&[action.as_str()]).inc();

		tracing::info!(
			"received {} event {} from {:?} ({})",
			event.event_type,
			event.id,
			event.source,
			action.as_str()
		);

		match (action, &event.data) {
			(Action::CreateProblemTicket, EventData::Problem(problem)) => {
				let ticket = self.renderer.render_problem(&event, problem);
				self.create(ticket, TicketKind::Problem, &event).await;
			}
			(Action::CloseProblemTicket, _) => self.close(&event).await,
			(Action::CreateEvaluationTicket, EventData::Evaluation(evaluation)) => {
				let ticket = self.renderer.render_evaluation(&event, evaluation);
				self.create(ticket, TicketKind::Evaluation, &event).await;
			}
			(Action::CreateRemediationTicket, EventData::Remediation(remediation)) => {
				let ticket = self.renderer.render_remediation(&event, remediation);
				self.create(ticket, TicketKind::Remediation, &event).await;
			}
			_ => {}
		}
	}
}

async fn keptn_receiver(Extension(state): Extension<Arc<State>>, body: Bytes) -> Response {
	match event::parse(&body) {
		Ok(event) => {
			state.process(event).await;
			StatusCode::OK.into_response()
		}
		Err(err) => {
			tracing::debug!("rejected request: {err}");
			(StatusCode::BAD_REQUEST, err.to_string()).into_response()
		}
	}
}

fn router(state: Arc<State>) -> Router {
	Router::new()
		.route(&state.settings.receiver.route(), post(keptn_receiver))
		.layer(Extension(state))
}

pub async fn run_event_receiver(settings: Arc<Settings>) -> Result<()> {
	let addr = settings.receiver.to_socket_addr();
	let app = router(Arc::new(State::new(settings)?));

	tracing::info!("listening for keptn events on {addr}");

	axum::Server::bind(&addr)
		.serve(app.into_make_service())
		.await
		.context("keptn event receiver crashed")?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use axum::{body::Body, http::Request};
	use serde_json::json;
	use tower::ServiceExt;
	use wiremock::{
		matchers::{body_partial_json, method, path},
		Mock, MockServer, ResponseTemplate,
	};

	use super::*;

	fn app(settings: Settings) -> Router {
		router(Arc::new(State::new(Arc::new(settings)).unwrap()))
	}

	async fn post_event(app: Router, uri: &str, body: &'static str) -> (StatusCode, String) {
		let response = app
			.oneshot(Request::builder().method("POST").uri(uri).body(Body::from(body)).unwrap())
			.await
			.unwrap();

		let status = response.status();
		let body = hyper::body::to_bytes(response.into_body()).await.unwrap();

		(status, String::from_utf8(body.to_vec()).unwrap())
	}

	#[tokio::test]
	async fn empty_body_is_a_bad_request() {
		let mock_server = MockServer::start().await;
		let app = app(Settings::for_tests(&mock_server.uri()));

		let (status, body) = post_event(app, "/", "").await;

		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body, "missing data input from Keptn");
	}

	#[tokio::test]
	async fn malformed_body_is_a_bad_request() {
		let mock_server = MockServer::start().await;
		let app = app(Settings::for_tests(&mock_server.uri()));

		let (status, body) = post_event(app, "/", "{\"type\": ").await;

		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert!(body.starts_with("malformed cloudevent"), "{body}");
	}

	#[tokio::test]
	async fn ignored_event_is_acknowledged_without_calling_jira() {
		let mock_server = MockServer::start().await;
		let app = app(Settings::for_tests(&mock_server.uri()));

		let (status, _) =
			post_event(app, "/", r#"{"type":"sh.keptn.event.deployment.finished","data":{}}"#).await;

		assert_eq!(status, StatusCode::OK);
		assert!(mock_server.received_requests().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn open_problem_creates_a_ticket() {
		let mock_server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/rest/api/2/issue"))
			.and(body_partial_json(json!({
				"fields": {
					"project": { "key": "OPS" },
					"issuetype": { "name": "Bug" },
					"summary": "[PROBLEM] High CPU",
				}
			})))
			.respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "OPS-1" })))
			.expect(1)
			.mount(&mock_server)
			.await;

		Mock::given(method("POST"))
			.and(path("/rest/api/2/issue/OPS-1/remotelink"))
			.respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 1 })))
			.expect(1)
			.mount(&mock_server)
			.await;

		let app = app(Settings::for_tests(&mock_server.uri()));

		let (status, _) = post_event(
			app,
			"/",
			r#"{"type":"sh.keptn.events.problem","shkeptncontext":"ctx1","id":"evt1",
			"data":{"State":"OPEN","ProblemTitle":"High CPU","ImpactedEntity":"host-1",
			"PID":"p1","ProblemDetails":{"severity":"high"}}}"#,
		)
		.await;

		assert_eq!(status, StatusCode::OK);
	}

	#[tokio::test]
	async fn failing_jira_still_acknowledges_the_event() {
		let mock_server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/rest/api/2/issue"))
			.respond_with(ResponseTemplate::new(503))
			.expect(1)
			.mount(&mock_server)
			.await;

		let app = app(Settings::for_tests(&mock_server.uri()));

		let (status, _) = post_event(
			app,
			"/",
			r#"{"type":"sh.keptn.event.evaluation.finished","data":{"result":"fail","score":42}}"#,
		)
		.await;

		assert_eq!(status, StatusCode::OK);
	}

	#[tokio::test]
	async fn configured_path_is_served() {
		let mock_server = MockServer::start().await;
		let mut settings = Settings::for_tests(&mock_server.uri());
		settings.receiver.path = String::from("events");

		let (status, _) =
			post_event(app(settings.clone()), "/events", r#"{"type":"sh.keptn.event.x"}"#).await;
		assert_eq!(status, StatusCode::OK);

		let (status, _) = post_event(app(settings), "/", r#"{"type":"sh.keptn.event.x"}"#).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
	}
}
