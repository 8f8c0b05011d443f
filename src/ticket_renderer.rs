//! Renders keptn events into jira tickets via tera templates.
//!
//! Events are received from [event_receiver](crate::event_receiver).
//! Rendered tickets are handed to the [orchestrator](crate::orchestrator).

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tera::Tera;

use crate::{
	dynatrace,
	event::{value_text, EvaluationData, InboundEvent, ProblemData, RemediationData},
	labels::{ticket_labels, LabelSource},
	settings::Settings,
};

const PROBLEM_TEMPLATE: &str = "problem";
const EVALUATION_TEMPLATE: &str = "evaluation";
const REMEDIATION_TEMPLATE: &str = "remediation";

/// problem detail keys that are already part of the ticket or just noise
const EXCLUDED_DETAILS: [&str; 5] = ["id", "startTime", "endTime", "status", "displayName"];

/// optional template files replacing the built-in ones
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplateSettings {
	pub problem: Option<PathBuf>,
	pub evaluation: Option<PathBuf>,
	pub remediation: Option<PathBuf>,
}

/// ticket content ready to be sent to jira
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTicket {
	pub project_key: String,
	pub issue_type: String,
	pub summary: String,
	/// jira wiki markup
	pub description: String,
	pub labels: Vec<String>,
}

#[derive(Serialize)]
struct ProblemContext<'a> {
	impacted_entity: &'a str,
	details: Vec<Detail<'a>>,
	show_tags: bool,
	tags: Vec<String>,
	time: String,
	problem_id: &'a str,
	context: &'a str,
	pid: &'a str,
	dynatrace_url: Option<String>,
}

#[derive(Serialize)]
struct Detail<'a> {
	key: &'a str,
	value: String,
}

#[derive(Serialize)]
struct EvaluationContext<'a> {
	result: String,
	score: String,
	time_start: String,
	time_end: String,
	test_strategy: &'a str,
	indicators: Vec<IndicatorContext<'a>>,
	context: &'a str,
}

#[derive(Serialize)]
struct IndicatorContext<'a> {
	metric: &'a str,
	status: &'a str,
	value: String,
	message: &'a str,
	targets: Vec<TargetContext<'a>>,
}

#[derive(Serialize)]
struct TargetContext<'a> {
	criteria: &'a str,
	violated: bool,
}

#[derive(Serialize)]
struct RemediationContext<'a> {
	result: String,
	project: &'a str,
	service: &'a str,
	stage: &'a str,
	status: &'a str,
	message: &'a str,
	context: &'a str,
}

/// Ticket renderer
pub struct TicketRenderer {
	tera: Tera,
	project_key: String,
	issue_type: String,
	/// base url of the dynatrace tenant, enables deep links in problem tickets
	dynatrace_url: Option<String>,
}

impl TicketRenderer {
	/// Loads the built-in templates and replaces them with the configured
	/// template files.
	pub fn new(settings: &Settings) -> Result<Self> {
		let mut tera = Tera::default();

		tera.add_raw_templates([
			(PROBLEM_TEMPLATE, include_str!("../templates/problem.jira")),
			(EVALUATION_TEMPLATE, include_str!("../templates/evaluation.jira")),
			(REMEDIATION_TEMPLATE, include_str!("../templates/remediation.jira")),
		])
		.context("could not load built-in templates")?;

		let templates = &settings.templates;
		for (name, path) in [
			(PROBLEM_TEMPLATE, &templates.problem),
			(EVALUATION_TEMPLATE, &templates.evaluation),
			(REMEDIATION_TEMPLATE, &templates.remediation),
		] {
			if let Some(path) = path {
				tera.add_template_file(path, Some(name))
					.context(format!("could not load {name} template {path:?}"))?;
				tracing::info!("loaded {name} template from {path:?}");
			}
		}

		Ok(Self {
			tera,
			project_key: settings.jira.project_key.clone(),
			issue_type: settings.jira.issue_type.clone(),
			dynatrace_url: settings.dynatrace.tenant_url(),
		})
	}

	/// Renders the ticket for a newly opened problem.
	pub fn render_problem(&self, event: &InboundEvent, problem: &ProblemData) -> RenderedTicket {
		let tags = problem.tag_list();
		let pid = problem.pid.as_deref().unwrap_or_default();

		let context = ProblemContext {
			impacted_entity: problem.impacted_entity.as_deref().unwrap_or_default(),
			details: problem
				.details
				.iter()
				.filter(|(key, _)| !EXCLUDED_DETAILS.contains(&key.as_str()))
				.map(|(key, value)| Detail { key, value: value_text(value) })
				.collect(),
			show_tags: tags.len() > 1,
			tags,
			time: event.display_time(),
			problem_id: problem.problem_id.as_deref().unwrap_or_default(),
			context: &event.context,
			pid,
			dynatrace_url: match self.dynatrace_url.as_deref() {
				Some(tenant) => Some(dynatrace::problem_url(tenant, pid)),
				None => problem.problem_url.clone().filter(|url| !url.trim().is_empty()),
			},
		};

		let labels = ticket_labels(LabelSource {
			project: problem.project.as_deref(),
			service: problem.service.as_deref(),
			stage: problem.stage.as_deref(),
			result: None,
			user_labels: Some(&problem.labels),
		});

		self.ticket(
			format!("[PROBLEM] {}", problem.title.as_deref().unwrap_or_default()),
			self.render(PROBLEM_TEMPLATE, &context),
			labels,
		)
	}

	/// Renders the ticket for a finished quality gate evaluation.
	pub fn render_evaluation(
		&self,
		event: &InboundEvent,
		evaluation: &EvaluationData,
	) -> RenderedTicket {
		let result = evaluation.result();
		let details = evaluation.evaluation.clone().unwrap_or_default();

		let context = EvaluationContext {
			result: result.annotated(),
			score: evaluation.score().map(|score| score.to_string()).unwrap_or_default(),
			time_start: value_text(&details.time_start),
			time_end: value_text(&details.time_end),
			test_strategy: evaluation.test_strategy.as_deref().unwrap_or_default(),
			indicators: evaluation
				.indicator_results()
				.iter()
				.map(|indicator| IndicatorContext {
					metric: indicator.value.metric.as_deref().unwrap_or_default(),
					status: indicator.status.as_deref().unwrap_or_default(),
					value: value_text(&indicator.value.value),
					message: indicator.value.message.as_deref().unwrap_or_default(),
					targets: indicator
						.targets
						.iter()
						.map(|target| TargetContext {
							criteria: target.criteria.as_deref().unwrap_or_default(),
							violated: target.violated,
						})
						.collect(),
				})
				.collect(),
			context: &event.context,
		};

		let labels = ticket_labels(LabelSource {
			project: evaluation.project.as_deref(),
			service: evaluation.service.as_deref(),
			stage: evaluation.stage.as_deref(),
			result: Some(result.as_str()),
			user_labels: Some(&evaluation.labels),
		});

		let summary = format!(
			"[EVALUATION] {} - {} - {} Result: {}",
			evaluation.project.as_deref().unwrap_or_default(),
			evaluation.service.as_deref().unwrap_or_default(),
			evaluation.stage.as_deref().unwrap_or_default(),
			result.as_str().to_uppercase(),
		);

		self.ticket(summary, self.render(EVALUATION_TEMPLATE, &context), labels)
	}

	/// Renders the ticket for a finished remediation sequence.
	pub fn render_remediation(
		&self,
		event: &InboundEvent,
		remediation: &RemediationData,
	) -> RenderedTicket {
		let result = remediation.result();
		let project = remediation.project.as_deref().unwrap_or_default();
		let service = remediation.service.as_deref().unwrap_or_default();
		let stage = remediation.stage.as_deref().unwrap_or_default();

		let context = RemediationContext {
			result: result.annotated(),
			project,
			service,
			stage,
			status: remediation.status.as_deref().unwrap_or_default(),
			message: remediation.message.as_deref().unwrap_or_default(),
			context: &event.context,
		};

		let labels = ticket_labels(LabelSource {
			project: remediation.project.as_deref(),
			service: remediation.service.as_deref(),
			stage: remediation.stage.as_deref(),
			result: Some(result.as_str()),
			user_labels: Some(&remediation.labels),
		});

		let summary = format!(
			"[REMEDIATION] {project} - {service} - {stage} Result: {}",
			result.as_str().to_uppercase()
		);

		self.ticket(summary, self.render(REMEDIATION_TEMPLATE, &context), labels)
	}

	fn ticket(&self, summary: String, description: String, labels: Vec<String>) -> RenderedTicket {
		RenderedTicket {
			project_key: self.project_key.clone(),
			issue_type: self.issue_type.clone(),
			summary,
			description,
			labels,
		}
	}

	/// Renders `template`. A render error (only possible with user supplied
	/// templates) becomes the description so the ticket still gets created.
	fn render(&self, template: &str, context: &impl Serialize) -> String {
		let rendered = tera::Context::from_serialize(context)
			.and_then(|context| self.tera.render(template, &context));

		match rendered {
			Ok(description) => description,
			Err(err) => {
				tracing::error!("failed to render {template} ticket: {err:?}");
				format!("failed to render ticket description:\n{{noformat}}\n{err:#?}\n{{noformat}}")
			}
		}
	}
}
