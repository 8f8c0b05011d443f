//! service settings, read once at start-up from an optional config file and
//! the environment variables the keptn service deployment sets

use std::{fmt, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Arg, Command};
use config::Config;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use url::Url;

use crate::{
	event_receiver::ReceiverSettings, log::LogSettings,
	telemetry_endpoint::TelemetryEndpointSettings, ticket_renderer::TemplateSettings,
};

/// config file used when `--config` isn't given. It doesn't need to exist.
const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

/// environment variables and the settings key each of them overrides
const ENVIRONMENT_OVERRIDES: &[(&str, &str)] = &[
	("JIRA_BASE_URL", "jira.base_url"),
	("JIRA_USERNAME", "jira.username"),
	("JIRA_API_TOKEN", "jira.api_token"),
	("JIRA_PROJECT_KEY", "jira.project_key"),
	("JIRA_ISSUE_TYPE", "jira.issue_type"),
	("JIRA_ASSIGNEE_ID", "jira.assignee_id"),
	("JIRA_REPORTER_ID", "jira.reporter_id"),
	("JIRA_TICKET_FOR_PROBLEMS", "jira.ticket_for_problems"),
	("JIRA_TICKET_FOR_EVALUATIONS", "jira.ticket_for_evaluations"),
	("KEPTN_DOMAIN", "keptn.domain"),
	("KEPTN_BRIDGE_URL", "keptn.bridge_url"),
	("DT_TENANT", "dynatrace.tenant"),
	("DT_API_TOKEN", "dynatrace.api_token"),
	("SEND_EVENT", "dynatrace.send_event"),
	("RCV_PORT", "receiver.port"),
	("RCV_PATH", "receiver.path"),
	("LOG_FILE", "log.file"),
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
	pub jira: JiraSettings,
	pub keptn: KeptnSettings,
	pub dynatrace: DynatraceSettings,
	pub receiver: ReceiverSettings,
	pub telemetry_endpoint: Option<TelemetryEndpointSettings>,
	pub log: LogSettings,
	pub templates: TemplateSettings,
}

impl Settings {
	/// parse command line arguments, load config file and environment and
	/// validate the result
	pub fn load() -> Result<Self> {
		let opts = Command::new(clap::crate_name!())
			.version(clap::crate_version!())
			.about(clap::crate_description!())
			.author(clap::crate_authors!())
			.args(&[
				Arg::new("config")
					.help("path of config file")
					.takes_value(true)
					.short('c')
					.long("config")
					.default_value(DEFAULT_CONFIG_PATH),
				Arg::new("level")
					.help("log level")
					.possible_values(["error", "warn", "info", "debug", "trace"])
					.ignore_case(true)
					.takes_value(true)
					.long("log"),
			])
			.get_matches();

		let config_path = opts.value_of("config").unwrap_or(DEFAULT_CONFIG_PATH);

		let mut settings = Self::from_sources(config_path, |name| std::env::var(name).ok())?;

		if let Some(level) = opts.value_of("level") {
			settings.log.level = level.to_owned();
		}

		settings.validate()?;

		Ok(settings)
	}

	/// Layers the config file at `config_path` (if there is one) and the
	/// variables returned by `env` into [Settings]. Empty variables count as
	/// unset.
	pub fn from_sources(config_path: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let mut builder =
			Config::builder().add_source(config::File::with_name(config_path).required(false));

		for (variable, key) in ENVIRONMENT_OVERRIDES {
			let value = env(variable).filter(|value| !value.trim().is_empty());
			builder = builder
				.set_override_option(*key, value)
				.context(format!("can't apply environment variable {variable}"))?;
		}

		let mut settings: Settings = builder
			.build()
			.context("can't load config")?
			.try_deserialize()
			.context("can't load config")?;

		if env("DEBUG").as_deref().map_or(false, parse_flag) {
			settings.log.level = String::from("debug");
		}

		Ok(settings)
	}

	/// Checks that every mandatory value is present. The error names all
	/// missing environment variables at once.
	pub fn validate(&self) -> Result<()> {
		let mandatory = [
			("JIRA_BASE_URL", &self.jira.base_url),
			("JIRA_USERNAME", &self.jira.username),
			("JIRA_API_TOKEN", &self.jira.api_token),
			("JIRA_PROJECT_KEY", &self.jira.project_key),
			("JIRA_ISSUE_TYPE", &self.jira.issue_type),
			("KEPTN_DOMAIN", &self.keptn.domain),
		];

		let missing: Vec<&str> = mandatory
			.iter()
			.filter(|(_, value)| value.trim().is_empty())
			.map(|(variable, _)| *variable)
			.collect();

		if !missing.is_empty() {
			bail!("missing mandatory input parameters: {}", missing.join(", "));
		}

		Url::parse(&self.jira.base_url)
			.context(format!("JIRA_BASE_URL {:?} is not a valid url", self.jira.base_url))?;

		if self.jira.close_transition.trim().is_empty() {
			bail!("jira.close_transition must not be empty");
		}

		Ok(())
	}
}

#[cfg(test)]
impl Settings {
	/// complete settings pointing jira at `base_url`
	pub fn for_tests(base_url: &str) -> Self {
		let mut settings = Self::default();
		settings.jira.base_url = base_url.to_owned();
		settings.jira.username = String::from("bot");
		settings.jira.api_token = String::from("token");
		settings.jira.project_key = String::from("OPS");
		settings.jira.issue_type = String::from("Bug");
		settings.jira.ticket_for_problems = true;
		settings.jira.ticket_for_evaluations = true;
		settings.keptn.domain = String::from("keptn.example.com");
		settings
	}
}

/// truthy values of the DEBUG flag
fn parse_flag(value: &str) -> bool {
	matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "t" | "true" | "yes" | "on")
}

#[serde_as]
#[derive(Clone, Deserialize)]
#[serde(default)]
/// jira instance, credentials and ticket toggles
pub struct JiraSettings {
	pub base_url: String,
	pub username: String,
	pub api_token: String,
	pub project_key: String,
	/// name of the issue type created tickets get, e.g. "Bug"
	pub issue_type: String,
	pub ticket_for_problems: bool,
	pub ticket_for_evaluations: bool,
	pub assignee_id: Option<String>,
	pub reporter_id: Option<String>,
	/// name of the transition applied when a problem gets resolved
	pub close_transition: String,
	/// no timeout besides the transport default if unset
	#[serde_as(as = "Option<DurationSeconds<f64>>")]
	pub request_timeout: Option<Duration>,
}

impl Default for JiraSettings {
	fn default() -> Self {
		Self {
			base_url: String::new(),
			username: String::new(),
			api_token: String::new(),
			project_key: String::new(),
			issue_type: String::new(),
			ticket_for_problems: false,
			ticket_for_evaluations: false,
			assignee_id: None,
			reporter_id: None,
			close_transition: String::from("Done"),
			request_timeout: None,
		}
	}
}

impl fmt::Debug for JiraSettings {
	fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
		formatter
			.debug_struct("JiraSettings")
			.field("base_url", &self.base_url)
			.field("username", &self.username)
			.field("api_token", &"<redacted>")
			.field("project_key", &self.project_key)
			.field("issue_type", &self.issue_type)
			.field("ticket_for_problems", &self.ticket_for_problems)
			.field("ticket_for_evaluations", &self.ticket_for_evaluations)
			.field("assignee_id", &self.assignee_id)
			.field("reporter_id", &self.reporter_id)
			.field("close_transition", &self.close_transition)
			.field("request_timeout", &self.request_timeout)
			.finish()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeptnSettings {
	pub domain: String,
	/// defaults to the domain
	pub bridge_url: Option<String>,
}

impl KeptnSettings {
	/// base url of the keptn bridge without trailing slash
	pub fn bridge_base(&self) -> String {
		let base = self.bridge_url.as_deref().unwrap_or(self.domain.as_str());
		with_scheme(base)
	}
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
/// optional dynatrace tenant used for deep links and info events
pub struct DynatraceSettings {
	/// host of the tenant, e.g. `abc12345.live.dynatrace.com`
	pub tenant: Option<String>,
	pub api_token: Option<String>,
	/// push a CUSTOM_INFO event after evaluation and remediation tickets were
	/// created
	pub send_event: bool,
}

impl DynatraceSettings {
	/// base url of the tenant without trailing slash
	pub fn tenant_url(&self) -> Option<String> {
		self.tenant.as_deref().filter(|tenant| !tenant.trim().is_empty()).map(with_scheme)
	}
}

impl fmt::Debug for DynatraceSettings {
	fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
		formatter
			.debug_struct("DynatraceSettings")
			.field("tenant", &self.tenant)
			.field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
			.field("send_event", &self.send_event)
			.finish()
	}
}

/// prefixes `https://` to bare host names and strips trailing slashes
fn with_scheme(base: &str) -> String {
	let base = base.trim().trim_end_matches('/');
	if base.contains("://") {
		base.to_owned()
	} else {
		format!("https://{base}")
	}
}
