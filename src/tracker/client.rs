//! handles the http requests against jira and records metrics for them

use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::{header, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{
	error::TrackerError,
	model::{CreateIssueRequest, SearchResponse, TransitionsResponse},
	RemoteLink, TrackerIssueRef, Transition, USER_AGENT,
};
use crate::{metrics, settings::JiraSettings, ticket_renderer::RenderedTicket};

#[derive(Debug, Clone)]
/// Stateless jira client. Credentials and base url are fixed at construction.
pub struct TrackerClient {
	/// http client carrying the basic auth header
	client: Client,
	/// jira base url without trailing slash
	base_url: String,
	assignee_id: Option<String>,
	reporter_id: Option<String>,
}

impl TrackerClient {
	/// construct jira client
	pub fn new(settings: &JiraSettings) -> Result<Self> {
		let credentials = base64::encode(format!("{}:{}", settings.username, settings.api_token));
		let mut authorization = header::HeaderValue::from_str(&format!("Basic {credentials}"))
			.context("JIRA_USERNAME or JIRA_API_TOKEN is not a valid header value")?;
		authorization.set_sensitive(true);

		let mut headers = header::HeaderMap::new();
		headers.insert(header::AUTHORIZATION, authorization);
		headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

		let mut builder = Client::builder().default_headers(headers).user_agent(USER_AGENT);
		if let Some(timeout) = settings.request_timeout {
			builder = builder.timeout(timeout);
		}

		Ok(Self {
			client: builder.build().context("failed to build reqwest client")?,
			base_url: settings.base_url.trim().trim_end_matches('/').to_owned(),
			assignee_id: settings.assignee_id.clone().filter(|id| !id.trim().is_empty()),
			reporter_id: settings.reporter_id.clone().filter(|id| !id.trim().is_empty()),
		})
	}

	/// url of the issue in the jira web ui
	pub fn browse_url(&self, issue_key: &str) -> String {
		format!("{}/browse/{issue_key}", self.base_url)
	}

	fn api_url(&self, path: &str) -> String {
		format!("{}/rest/api/2/{path}", self.base_url)
	}

	/// `POST /rest/api/2/issue`
	pub async fn create_issue(&self, ticket: &RenderedTicket) -> Result<TrackerIssueRef, TrackerError> {
		let request = CreateIssueRequest::new(
			ticket,
			self.assignee_id.as_deref(),
			self.reporter_id.as_deref(),
		);

		let body = self.send("create_issue", self.client.post(self.api_url("issue")).json(&request)).await?;

		decode(&body)
	}

	/// `POST /rest/api/2/issue/{key}/remotelink`
	pub async fn add_remote_link(&self, issue_key: &str, link: &RemoteLink) -> Result<(), TrackerError> {
		let request = json!({
			"object": {
				"url": link.url,
				"title": link.title,
				"icon": { "url16x16": link.icon_url, "title": link.title },
			}
		});

		self.send(
			"add_remote_link",
			self.client.post(self.api_url(&format!("issue/{issue_key}/remotelink"))).json(&request),
		)
		.await?;

		Ok(())
	}

	/// Links `issue_key` to `other_issue_key` with the link type named
	/// `relation` (`PUT /rest/api/2/issue/{key}`).
	pub async fn link_issues(
		&self,
		issue_key: &str,
		relation: &str,
		other_issue_key: &str,
	) -> Result<(), TrackerError> {
		let request = json!({
			"update": {
				"issuelinks": [{
					"add": {
						"type": { "name": relation },
						"outwardIssue": { "key": other_issue_key },
					}
				}]
			}
		});

		self.send(
			"link_issues",
			self.client.put(self.api_url(&format!("issue/{issue_key}"))).json(&request),
		)
		.await?;

		Ok(())
	}

	/// `POST /rest/api/2/search`
	pub async fn search_issues(
		&self,
		jql: &str,
		max_results: u32,
	) -> Result<Vec<TrackerIssueRef>, TrackerError> {
		let request = json!({ "jql": jql, "maxResults": max_results, "fields": ["key"] });

		let body = self.send("search_issues", self.client.post(self.api_url("search")).json(&request)).await?;

		Ok(decode::<SearchResponse>(&body)?.issues)
	}

	/// `GET /rest/api/2/issue/{key}/transitions`
	pub async fn list_transitions(&self, issue_key: &str) -> Result<Vec<Transition>, TrackerError> {
		let body = self
			.send(
				"list_transitions",
				self.client.get(self.api_url(&format!("issue/{issue_key}/transitions"))),
			)
			.await?;

		Ok(decode::<TransitionsResponse>(&body)?.transitions)
	}

	/// `POST /rest/api/2/issue/{key}/transitions`
	pub async fn apply_transition(&self, issue_key: &str, transition_id: &str) -> Result<(), TrackerError> {
		let request = json!({ "transition": { "id": transition_id } });

		self.send(
			"apply_transition",
			self.client.post(self.api_url(&format!("issue/{issue_key}/transitions"))).json(&request),
		)
		.await?;

		Ok(())
	}

	/// `POST /rest/api/2/issue/{key}/comment`
	pub async fn add_comment(&self, issue_key: &str, text: &str) -> Result<(), TrackerError> {
		let request = json!({ "body": text });

		self.send(
			"add_comment",
			self.client.post(self.api_url(&format!("issue/{issue_key}/comment"))).json(&request),
		)
		.await?;

		Ok(())
	}

	/// Sends `request` and returns the body of a successful response.
	/// `endpoint` labels the prometheus meters.
	async fn send(&self, endpoint: &'static str, request: RequestBuilder) -> Result<Bytes, TrackerError> {
		let _timer = metrics::TRACKER_REQUEST_DURATION.with_label_values(&[endpoint]).start_timer();
		metrics::TRACKER_REQUESTS.with_label_values(&[endpoint]).inc();

		let result = execute(request).await;

		if let Err(err) = &result {
			metrics::TRACKER_REQUESTS_FAILED.with_label_values(&[endpoint, &err.status_label()]).inc();
			tracing::debug!("jira request {endpoint} failed: {err}");
		}

		result
	}
}

async fn execute(request: RequestBuilder) -> Result<Bytes, TrackerError> {
	let response = request.send().await.map_err(TrackerError::Unreachable)?;
	let status = response.status();
	let body = response.bytes().await.map_err(TrackerError::Unreachable)?;

	if !status.is_success() {
		return Err(TrackerError::HttpStatus {
			status: status.as_u16(),
			body: String::from_utf8_lossy(&body).into_owned(),
		});
	}

	Ok(body)
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, TrackerError> {
	serde_json::from_slice(body).map_err(|err| TrackerError::MalformedResponse(err.to_string()))
}

#[cfg(test)]
mod tests {
	use wiremock::{
		matchers::{body_json, body_partial_json, header, method, path},
		Mock, MockServer, ResponseTemplate,
	};

	use super::*;
	use crate::settings::Settings;

	fn client(mock_server: &MockServer) -> TrackerClient {
		TrackerClient::new(&Settings::for_tests(&mock_server.uri()).jira).unwrap()
	}

	fn ticket() -> RenderedTicket {
		RenderedTicket {
			project_key: String::from("OPS"),
			issue_type: String::from("Bug"),
			summary: String::from("[PROBLEM] High CPU"),
			description: String::from("h2. Impacted Entity\nhost-1"),
			labels: vec![String::from("keptn_project:sockshop")],
		}
	}

	#[tokio::test]
	async fn create_issue_sends_fields_with_basic_auth() {
		let mock_server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/rest/api/2/issue"))
			.and(header("Authorization", "Basic Ym90OnRva2Vu"))
			.and(header("User-Agent", USER_AGENT))
			.and(body_json(json!({
				"fields": {
					"project": { "key": "OPS" },
					"summary": "[PROBLEM] High CPU",
					"description": "h2. Impacted Entity\nhost-1",
					"issuetype": { "name": "Bug" },
					"labels": ["keptn_project:sockshop"],
				}
			})))
			.respond_with(
				ResponseTemplate::new(201).set_body_json(json!({ "id": "10000", "key": "OPS-1" })),
			)
			.expect(1)
			.mount(&mock_server)
			.await;

		let issue = client(&mock_server).create_issue(&ticket()).await.unwrap();

		assert_eq!(issue.key(), "OPS-1");
	}

	#[tokio::test]
	async fn create_issue_sets_assignee_and_reporter() {
		let mock_server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/rest/api/2/issue"))
			.and(body_partial_json(json!({
				"fields": {
					"assignee": { "accountId": "assignee-1" },
					"reporter": { "accountId": "reporter-1" },
				}
			})))
			.respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "OPS-2" })))
			.expect(1)
			.mount(&mock_server)
			.await;

		let mut settings = Settings::for_tests(&mock_server.uri());
		settings.jira.assignee_id = Some(String::from("assignee-1"));
		settings.jira.reporter_id = Some(String::from("reporter-1"));
		let client = TrackerClient::new(&settings.jira).unwrap();

		assert_eq!(client.create_issue(&ticket()).await.unwrap().key(), "OPS-2");
	}

	#[tokio::test]
	async fn error_status_is_reported() {
		let mock_server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/rest/api/2/issue"))
			.respond_with(ResponseTemplate::new(400).set_body_string("issuetype is invalid"))
			.mount(&mock_server)
			.await;

		let err = client(&mock_server).create_issue(&ticket()).await.unwrap_err();

		assert!(
			matches!(err, TrackerError::HttpStatus { status: 400, ref body } if body == "issuetype is invalid")
		);
	}

	#[tokio::test]
	async fn malformed_response_is_reported() {
		let mock_server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/rest/api/2/issue"))
			.respond_with(ResponseTemplate::new(201).set_body_string("<html>login</html>"))
			.mount(&mock_server)
			.await;

		let err = client(&mock_server).create_issue(&ticket()).await.unwrap_err();

		assert!(matches!(err, TrackerError::MalformedResponse(_)));
	}

	#[tokio::test]
	async fn unreachable_tracker_is_reported() {
		let client = TrackerClient::new(&Settings::for_tests("http://127.0.0.1:1").jira).unwrap();

		let err = client.create_issue(&ticket()).await.unwrap_err();

		assert!(matches!(err, TrackerError::Unreachable(_)));
	}

	#[tokio::test]
	async fn search_returns_issue_keys() {
		let mock_server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/rest/api/2/search"))
			.and(body_partial_json(json!({
				"jql": "project = OPS AND text ~ 'PID: p1'",
				"maxResults": 1,
			})))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"startAt": 0,
				"total": 1,
				"issues": [{ "id": "10000", "key": "OPS-7", "fields": {} }]
			})))
			.expect(1)
			.mount(&mock_server)
			.await;

		let issues = client(&mock_server)
			.search_issues("project = OPS AND text ~ 'PID: p1'", 1)
			.await
			.unwrap();

		assert_eq!(issues.iter().map(TrackerIssueRef::key).collect::<Vec<_>>(), ["OPS-7"]);
	}

	#[tokio::test]
	async fn transitions_are_listed_and_applied() {
		let mock_server = MockServer::start().await;

		Mock::given(method("GET"))
			.and(path("/rest/api/2/issue/OPS-7/transitions"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"transitions": [
					{ "id": "11", "name": "In Progress", "to": {} },
					{ "id": "31", "name": "Done", "to": {} },
				]
			})))
			.expect(1)
			.mount(&mock_server)
			.await;

		Mock::given(method("POST"))
			.and(path("/rest/api/2/issue/OPS-7/transitions"))
			.and(body_json(json!({ "transition": { "id": "31" } })))
			.respond_with(ResponseTemplate::new(204))
			.expect(1)
			.mount(&mock_server)
			.await;

		let client = client(&mock_server);
		let transitions = client.list_transitions("OPS-7").await.unwrap();

		assert_eq!(transitions.len(), 2);
		assert_eq!(transitions[1], Transition { id: String::from("31"), name: String::from("Done") });

		client.apply_transition("OPS-7", "31").await.unwrap();
	}

	#[tokio::test]
	async fn comments_and_links_are_posted() {
		let mock_server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/rest/api/2/issue/OPS-7/comment"))
			.and(body_json(json!({ "body": "closing" })))
			.respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "1" })))
			.expect(1)
			.mount(&mock_server)
			.await;

		Mock::given(method("POST"))
			.and(path("/rest/api/2/issue/OPS-7/remotelink"))
			.and(body_partial_json(json!({
				"object": {
					"url": "https://bridge.example.com",
					"title": "Keptn's Bridge",
					"icon": { "url16x16": "https://keptn.sh/favicon.ico" },
				}
			})))
			.respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 1 })))
			.expect(1)
			.mount(&mock_server)
			.await;

		Mock::given(method("PUT"))
			.and(path("/rest/api/2/issue/OPS-7"))
			.and(body_json(json!({
				"update": { "issuelinks": [{ "add": {
					"type": { "name": "Problem/Incident" },
					"outwardIssue": { "key": "INC-3" },
				}}]}
			})))
			.respond_with(ResponseTemplate::new(204))
			.expect(1)
			.mount(&mock_server)
			.await;

		let client = client(&mock_server);
		client.add_comment("OPS-7", "closing").await.unwrap();
		client
			.add_remote_link("OPS-7", &RemoteLink {
				url: String::from("https://bridge.example.com"),
				title: String::from("Keptn's Bridge"),
				icon_url: String::from("https://keptn.sh/favicon.ico"),
			})
			.await
			.unwrap();
		client.link_issues("OPS-7", "Problem/Incident", "INC-3").await.unwrap();
	}

	#[test]
	fn browse_url_ignores_trailing_slash() {
		let client =
			TrackerClient::new(&Settings::for_tests("https://jira.example.com/").jira).unwrap();

		assert_eq!(client.browse_url("OPS-1"), "https://jira.example.com/browse/OPS-1");
	}
}
