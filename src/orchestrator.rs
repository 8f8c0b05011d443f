//! Multi-step jira workflows: creating a ticket together with its links, and
//! closing the ticket of a resolved problem.
//!
//! The first call of each workflow decides whether it happens at all. All
//! later calls are best effort: their failures end up in the returned report
//! and the log, but the workflow carries on.

use std::collections::BTreeMap;

use anyhow::Result;
use thiserror::Error;

use crate::{
	dynatrace::{self, AttachRules, DynatraceClient, InfoEvent},
	event::{value_text, EventData, InboundEvent},
	settings::Settings,
	ticket_renderer::RenderedTicket,
	tracker::{RemoteLink, TrackerClient, TrackerError, TrackerIssueRef},
};

/// label an evaluation event uses to point at an existing issue
const LINKED_ISSUE_LABEL: &str = "jira_issue";
/// link type between an evaluation ticket and the issue named by [LINKED_ISSUE_LABEL]
const ISSUE_RELATION: &str = "Problem/Incident";

const BRIDGE_LINK_TITLE: &str = "Keptn's Bridge";
const BRIDGE_ICON_URL: &str = "https://keptn.sh/images/favicon.png";
const DYNATRACE_LINK_TITLE: &str = "Dynatrace Problem";
const DYNATRACE_ICON_URL: &str = "https://www.dynatrace.com/favicon.ico";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketKind {
	Problem,
	Evaluation,
	Remediation,
}

/// result of a best effort step
#[derive(Debug)]
pub enum StepOutcome {
	Completed,
	/// the step doesn't apply to this event or isn't configured
	Skipped,
	Failed(TrackerError),
}

impl StepOutcome {
	pub fn is_completed(&self) -> bool {
		matches!(self, Self::Completed)
	}
}

#[derive(Debug)]
pub struct CreateReport {
	pub issue: TrackerIssueRef,
	/// web ui url of the new issue
	pub ticket_url: String,
	pub bridge_link: StepOutcome,
	pub dynatrace_link: StepOutcome,
	pub issue_link: StepOutcome,
	pub info_event: StepOutcome,
}

#[derive(Debug)]
pub struct CloseReport {
	pub issue: TrackerIssueRef,
	pub comment: StepOutcome,
	pub transition: StepOutcome,
}

/// reasons a workflow stopped before doing anything best effort
#[derive(Error, Debug)]
pub enum WorkflowError {
	#[error("failed to create jira issue: {0}")]
	CreateFailed(#[source] TrackerError),
	#[error("problem event carries no PID")]
	MissingPid,
	#[error("failed to search the jira issue of problem {pid}: {source}")]
	SearchFailed { pid: String, source: TrackerError },
	#[error("no jira issue found for problem {pid}")]
	NoMatchingIssue { pid: String },
	#[error("failed to list transitions of {issue_key}: {source}")]
	TransitionsUnavailable { issue_key: String, source: TrackerError },
	#[error("{issue_key} has no transition named {name:?}")]
	TransitionNotFound { issue_key: String, name: String },
}

/// Runs the create and close workflows against jira and, if configured,
/// dynatrace.
pub struct TicketLifecycleOrchestrator {
	tracker: TrackerClient,
	dynatrace: Option<DynatraceClient>,
	/// base url of the keptn bridge
	bridge_base: String,
	/// base url of the dynatrace tenant
	tenant_url: Option<String>,
	project_key: String,
	close_transition: String,
}

impl TicketLifecycleOrchestrator {
	pub fn new(settings: &Settings) -> Result<Self> {
		Ok(Self {
			tracker: TrackerClient::new(&settings.jira)?,
			dynatrace: DynatraceClient::from_settings(&settings.dynatrace)?,
			bridge_base: settings.keptn.bridge_base(),
			tenant_url: settings.dynatrace.tenant_url(),
			project_key: settings.jira.project_key.clone(),
			close_transition: settings.jira.close_transition.clone(),
		})
	}

	/// bridge page of the event's sequence
	fn bridge_url(&self, event: &InboundEvent) -> String {
		let (project, service, _) = event.scope();

		format!(
			"{}/project/{}/{}/{}/{}",
			self.bridge_base,
			project.unwrap_or_default(),
			service.unwrap_or_default(),
			event.context,
			event.id
		)
	}

	/// Creates the issue for `ticket` and attaches links to it. Fails only if
	/// the issue itself couldn't be created.
	pub async fn create_ticket(
		&self,
		mut ticket: RenderedTicket,
		kind: TicketKind,
		event: &InboundEvent,
	) -> Result<CreateReport, WorkflowError> {
		let bridge_url = self.bridge_url(event);

		if !ticket.description.is_empty() && !ticket.description.ends_with('\n') {
			ticket.description.push('\n');
		}
		ticket.description.push_str(&format!("[Link to Keptn's Bridge|{bridge_url}]"));

		let issue = self.tracker.create_issue(&ticket).await.map_err(WorkflowError::CreateFailed)?;
		let issue_key = issue.key().to_owned();
		let ticket_url = self.tracker.browse_url(&issue_key);
		tracing::info!("created jira issue {issue_key}: {}", ticket.summary);

		let bridge_link = step(
			"add bridge link",
			&issue_key,
			self.tracker
				.add_remote_link(&issue_key, &RemoteLink {
					url: bridge_url.clone(),
					title: String::from(BRIDGE_LINK_TITLE),
					icon_url: String::from(BRIDGE_ICON_URL),
				})
				.await,
		);

		let dynatrace_link = match (kind, &self.tenant_url, problem_pid(event)) {
			(TicketKind::Problem, Some(tenant_url), Some(pid)) => step(
				"add dynatrace link",
				&issue_key,
				self.tracker
					.add_remote_link(&issue_key, &RemoteLink {
						url: dynatrace::problem_url(tenant_url, pid),
						title: String::from(DYNATRACE_LINK_TITLE),
						icon_url: String::from(DYNATRACE_ICON_URL),
					})
					.await,
			),
			_ => StepOutcome::Skipped,
		};

		let issue_link = match (kind, linked_issue(event)) {
			(TicketKind::Evaluation, Some(other_key)) => step(
				"link issues",
				&issue_key,
				self.tracker.link_issues(&issue_key, ISSUE_RELATION, &other_key).await,
			),
			_ => StepOutcome::Skipped,
		};

		let announcement = self.info_event(kind, event, &issue_key, &ticket_url, &bridge_url);
		let info_event = match (&self.dynatrace, announcement) {
			(Some(dynatrace), Some(info_event)) => step(
				"send dynatrace info event",
				&issue_key,
				dynatrace.send_info_event(&info_event).await,
			),
			_ => StepOutcome::Skipped,
		};

		Ok(CreateReport { issue, ticket_url, bridge_link, dynatrace_link, issue_link, info_event })
	}

	/// Finds the issue created for the resolved problem, comments on it and
	/// moves it through the close transition.
	pub async fn close_ticket(&self, event: &InboundEvent) -> Result<CloseReport, WorkflowError> {
		let pid = problem_pid(event).ok_or(WorkflowError::MissingPid)?;

		let jql = format!("project = {} AND text ~ 'PID: {}'", self.project_key, jql_escape(pid));
		let issue = self
			.tracker
			.search_issues(&jql, 1)
			.await
			.map_err(|source| WorkflowError::SearchFailed { pid: pid.to_owned(), source })?
			.into_iter()
			.next()
			.ok_or_else(|| WorkflowError::NoMatchingIssue { pid: pid.to_owned() })?;
		let issue_key = issue.key().to_owned();

		let transition = self
			.tracker
			.list_transitions(&issue_key)
			.await
			.map_err(|source| WorkflowError::TransitionsUnavailable {
				issue_key: issue_key.clone(),
				source,
			})?
			.into_iter()
			.find(|transition| transition.name == self.close_transition)
			.ok_or_else(|| WorkflowError::TransitionNotFound {
				issue_key: issue_key.clone(),
				name: self.close_transition.clone(),
			})?;

		let comment = step(
			"add comment",
			&issue_key,
			self.tracker
				.add_comment(
					&issue_key,
					&format!("Problem {pid} was resolved. Keptn is closing JIRA issue {issue_key}."),
				)
				.await,
		);

		let transition = step(
			"apply transition",
			&issue_key,
			self.tracker.apply_transition(&issue_key, &transition.id).await,
		);

		if transition.is_completed() {
			tracing::info!("closed jira issue {issue_key} of problem {pid}");
		}

		Ok(CloseReport { issue, comment, transition })
	}

	/// `CUSTOM_INFO` event announcing the ticket, only for evaluations and
	/// remediations
	fn info_event(
		&self,
		kind: TicketKind,
		event: &InboundEvent,
		issue_key: &str,
		ticket_url: &str,
		bridge_url: &str,
	) -> Option<InfoEvent> {
		let (project, service, stage) = event.scope();
		let (project, service, stage) =
			(project.unwrap_or_default(), service.unwrap_or_default(), stage.unwrap_or_default());

		let mut custom_properties = BTreeMap::new();
		let description = match (kind, &event.data) {
			(TicketKind::Evaluation, EventData::Evaluation(evaluation)) => {
				custom_properties
					.insert(String::from("Quality Gate Result"), evaluation.result().as_str().to_owned());
				custom_properties.insert(
					String::from("Quality Gate Score"),
					evaluation.score().map(|score| score.to_string()).unwrap_or_default(),
				);
				"Keptn Quality Gate Evaluation"
			}
			(TicketKind::Remediation, EventData::Remediation(remediation)) => {
				custom_properties.insert(String::from("Result"), remediation.result().as_str().to_owned());
				"Keptn Remediation Attempt"
			}
			_ => return None,
		};

		for (key, value) in [
			("Keptn Project", project),
			("Keptn Service", service),
			("Keptn Stage", stage),
			("Ticket", ticket_url),
			("BridgeURL", bridge_url),
			("SentBy", "Keptn"),
		] {
			custom_properties.insert(key.to_owned(), value.to_owned());
		}

		Some(InfoEvent {
			event_type: String::from("CUSTOM_INFO"),
			source: String::from("jira-service"),
			title: format!("Ticket Created: {issue_key}"),
			description: description.to_owned(),
			attach_rules: AttachRules::keptn_service(project, stage, service),
			custom_properties,
		})
	}
}

/// logs a failed best effort step
fn step(name: &str, issue_key: &str, result: Result<(), TrackerError>) -> StepOutcome {
	match result {
		Ok(()) => StepOutcome::Completed,
		Err(err) => {
			tracing::warn!("{name} failed for {issue_key}: {err}");
			StepOutcome::Failed(err)
		}
	}
}

/// escapes `value` for use inside a single quoted jql string
fn jql_escape(value: &str) -> String {
	let mut escaped = String::with_capacity(value.len());
	for c in value.chars() {
		if matches!(c, '\\' | '\'') {
			escaped.push('\\');
		}
		escaped.push(c);
	}
	escaped
}

/// non-empty PID of a problem event
fn problem_pid(event: &InboundEvent) -> Option<&str> {
	match &event.data {
		EventData::Problem(problem) => {
			problem.pid.as_deref().map(str::trim).filter(|pid| !pid.is_empty())
		}
		_ => None,
	}
}

/// issue key from the event's `jira_issue` label
fn linked_issue(event: &InboundEvent) -> Option<String> {
	let key = value_text(event.labels()?.get(LINKED_ISSUE_LABEL)?);
	let key = key.trim();

	(!key.is_empty()).then(|| key.to_owned())
}
