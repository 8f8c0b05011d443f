//! dynatrace integration: deep links into the tenant and `CUSTOM_INFO` events
//! announcing tickets we created

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use reqwest::{header, Client};
use serde::Serialize;

use crate::{settings::DynatraceSettings, tracker::TrackerError};

/// deep link to a problem in the dynatrace web ui
pub fn problem_url(tenant_url: &str, pid: &str) -> String {
	format!("{tenant_url}/#problems/problemdetails;pid={pid}")
}

/// body of `POST /api/v1/events`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoEvent {
	pub event_type: String,
	pub source: String,
	pub title: String,
	pub description: String,
	pub attach_rules: AttachRules,
	pub custom_properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRules {
	pub tag_rule: Vec<TagRule>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRule {
	pub me_types: Vec<String>,
	pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tag {
	pub context: String,
	pub key: String,
	pub value: String,
}

impl AttachRules {
	/// attaches the event to the services tagged with the keptn project,
	/// stage and service
	pub fn keptn_service(project: &str, stage: &str, service: &str) -> Self {
		let tag = |key: &str, value: &str| Tag {
			context: String::from("CONTEXTLESS"),
			key: key.to_owned(),
			value: value.to_owned(),
		};

		Self {
			tag_rule: vec![TagRule {
				me_types: vec![String::from("SERVICE")],
				tags: vec![
					tag("keptn_project", project),
					tag("keptn_stage", stage),
					tag("keptn_service", service),
				],
			}],
		}
	}
}

/// Sends events to the dynatrace events api
#[derive(Debug, Clone)]
pub struct DynatraceClient {
	client: Client,
	events_url: String,
}

impl DynatraceClient {
	/// Returns a client if sending events is enabled and tenant and api token
	/// are configured.
	pub fn from_settings(settings: &DynatraceSettings) -> Result<Option<Self>> {
		let (Some(tenant_url), Some(api_token)) = (
			settings.tenant_url(),
			settings.api_token.as_deref().filter(|token| !token.trim().is_empty()),
		) else {
			return Ok(None);
		};

		if !settings.send_event {
			return Ok(None);
		}

		let mut authorization = header::HeaderValue::from_str(&format!("Api-Token {api_token}"))
			.context("DT_API_TOKEN is not a valid header value")?;
		authorization.set_sensitive(true);

		let mut headers = header::HeaderMap::new();
		headers.insert(header::AUTHORIZATION, authorization);
		headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

		let client = Client::builder()
			.default_headers(headers)
			.user_agent(crate::tracker::USER_AGENT)
			.build()
			.context("failed to build dynatrace http client")?;

		Ok(Some(Self { client, events_url: format!("{tenant_url}/api/v1/events") }))
	}

	pub async fn send_info_event(&self, event: &InfoEvent) -> Result<(), TrackerError> {
		let response = self
			.client
			.post(&self.events_url)
			.json(event)
			.send()
			.await
			.map_err(TrackerError::Unreachable)?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(TrackerError::HttpStatus { status: status.as_u16(), body });
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use wiremock::{
		matchers::{body_partial_json, header, method, path},
		Mock, MockServer, ResponseTemplate,
	};

	use super::*;

	fn settings(tenant: &str, send_event: bool) -> DynatraceSettings {
		DynatraceSettings {
			tenant: Some(tenant.to_owned()),
			api_token: Some(String::from("dt0c01.token")),
			send_event,
		}
	}

	#[test]
	fn client_needs_token_tenant_and_flag() {
		assert!(DynatraceClient::from_settings(&settings("abc.live.dynatrace.com", false))
			.unwrap()
			.is_none());
		assert!(DynatraceClient::from_settings(&DynatraceSettings::default()).unwrap().is_none());

		let mut without_token = settings("abc.live.dynatrace.com", true);
		without_token.api_token = None;
		assert!(DynatraceClient::from_settings(&without_token).unwrap().is_none());

		assert!(DynatraceClient::from_settings(&settings("abc.live.dynatrace.com", true))
			.unwrap()
			.is_some());
	}

	#[tokio::test]
	async fn info_event_is_posted_with_api_token() {
		let mock_server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/api/v1/events"))
			.and(header("Authorization", "Api-Token dt0c01.token"))
			.and(body_partial_json(serde_json::json!({
				"eventType": "CUSTOM_INFO",
				"title": "Ticket Created: OPS-1",
				"attachRules": {"tagRule": [{"meTypes": ["SERVICE"]}]}
			})))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&mock_server)
			.await;

		let client =
			DynatraceClient::from_settings(&settings(&mock_server.uri(), true)).unwrap().unwrap();

		let event = InfoEvent {
			event_type: String::from("CUSTOM_INFO"),
			source: String::from("jira-service"),
			title: String::from("Ticket Created: OPS-1"),
			description: String::from("Keptn Quality Gate Evaluation"),
			attach_rules: AttachRules::keptn_service("sockshop", "staging", "carts"),
			custom_properties: BTreeMap::new(),
		};

		client.send_info_event(&event).await.unwrap();
	}

	#[tokio::test]
	async fn rejected_event_reports_status() {
		let mock_server = MockServer::start().await;

		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
			.mount(&mock_server)
			.await;

		let client =
			DynatraceClient::from_settings(&settings(&mock_server.uri(), true)).unwrap().unwrap();
		let event = InfoEvent {
			event_type: String::from("CUSTOM_INFO"),
			source: String::from("jira-service"),
			title: String::new(),
			description: String::new(),
			attach_rules: AttachRules::keptn_service("", "", ""),
			custom_properties: BTreeMap::new(),
		};

		let err = client.send_info_event(&event).await.unwrap_err();
		assert!(matches!(err, TrackerError::HttpStatus { status: 401, ref body } if body == "bad token"));
	}
}
