//! request and response bodies of the jira rest api v2

use serde::{Deserialize, Serialize};

use crate::ticket_renderer::RenderedTicket;

/// reference to an existing jira issue
///
/// Only ever obtained from jira's answer to a create or search request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackerIssueRef {
	key: String,
}

impl TrackerIssueRef {
	/// issue key, e.g. `OPS-123`
	pub fn key(&self) -> &str {
		&self.key
	}
}

/// workflow transition available on an issue
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Transition {
	pub id: String,
	pub name: String,
}

/// external url attached to an issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLink {
	pub url: String,
	pub title: String,
	/// 16x16 icon shown next to the link
	pub icon_url: String,
}

#[derive(Serialize)]
pub(super) struct CreateIssueRequest<'a> {
	fields: IssueFields<'a>,
}

#[derive(Serialize)]
struct IssueFields<'a> {
	project: ProjectRef<'a>,
	summary: &'a str,
	description: &'a str,
	issuetype: IssueTypeRef<'a>,
	labels: &'a [String],
	#[serde(skip_serializing_if = "Option::is_none")]
	assignee: Option<AccountRef<'a>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	reporter: Option<AccountRef<'a>>,
}

#[derive(Serialize)]
struct ProjectRef<'a> {
	key: &'a str,
}

#[derive(Serialize)]
struct IssueTypeRef<'a> {
	name: &'a str,
}

#[derive(Serialize)]
struct AccountRef<'a> {
	#[serde(rename = "accountId")]
	account_id: &'a str,
}

impl<'a> CreateIssueRequest<'a> {
	pub(super) fn new(
		ticket: &'a RenderedTicket,
		assignee_id: Option<&'a str>,
		reporter_id: Option<&'a str>,
	) -> Self {
		Self {
			fields: IssueFields {
				project: ProjectRef { key: &ticket.project_key },
				summary: &ticket.summary,
				description: &ticket.description,
				issuetype: IssueTypeRef { name: &ticket.issue_type },
				labels: &ticket.labels,
				assignee: assignee_id.map(|account_id| AccountRef { account_id }),
				reporter: reporter_id.map(|account_id| AccountRef { account_id }),
			},
		}
	}
}

#[derive(Deserialize)]
pub(super) struct SearchResponse {
	#[serde(default)]
	pub(super) issues: Vec<TrackerIssueRef>,
}

#[derive(Deserialize)]
pub(super) struct TransitionsResponse {
	#[serde(default)]
	pub(super) transitions: Vec<Transition>,
}
