//! data structures for deserializing incoming keptn cloudevents
//!
//! Every field keptn might leave out is optional; missing data shows up as
//! blank text in the rendered ticket instead of failing the request. The same
//! goes for `null` and for values of an unexpected type: only the json itself
//! has to be well-formed.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;
use serde_with::{serde_as, DefaultOnError, DisplayFromStr, PickFirst};
use thiserror::Error;

/// ordered map of event supplied values (labels, problem details)
pub type ValueMap = IndexMap<String, Value>;

/// Error returned by [parse]
#[derive(Error, Debug)]
pub enum ParseError {
	/// the request body was empty
	#[error("missing data input from Keptn")]
	EmptyBody,
	/// the request body isn't valid json or the data payload has the wrong shape
	#[error("malformed cloudevent: {0}")]
	MalformedJson(#[from] serde_json::Error),
}

/// what kind of keptn event we're looking at, derived from the cloudevent type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
	Problem,
	Evaluation,
	Remediation,
	Other,
}

impl EventKind {
	pub fn from_type(event_type: &str) -> Self {
		if event_type.contains("problem") {
			Self::Problem
		} else if event_type.contains("evaluation-done") || event_type.contains("evaluation.finished")
		{
			Self::Evaluation
		} else if event_type.contains("remediation.finished") {
			Self::Remediation
		} else {
			Self::Other
		}
	}
}

/// a parsed cloudevent
#[derive(Debug, Clone)]
pub struct InboundEvent {
	pub event_type: String,
	pub source: String,
	pub time: Option<String>,
	/// keptn context, correlates all events of one sequence
	pub context: String,
	pub id: String,
	pub data: EventData,
}

impl InboundEvent {
	pub fn kind(&self) -> EventKind {
		EventKind::from_type(&self.event_type)
	}

	/// event time formatted for humans, raw text if it isn't rfc3339
	pub fn display_time(&self) -> String {
		match self.time.as_deref() {
			Some(time) => match DateTime::parse_from_rfc3339(time) {
				Ok(time) => time.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S UTC").to_string(),
				Err(_) => time.to_owned(),
			},
			None => String::new(),
		}
	}

	/// labels the event carries, independent of its kind
	pub fn labels(&self) -> Option<&ValueMap> {
		match &self.data {
			EventData::Problem(data) => Some(&data.labels),
			EventData::Evaluation(data) => Some(&data.labels),
			EventData::Remediation(data) => Some(&data.labels),
			EventData::Other(_) => None,
		}
	}

	/// (project, service, stage) of the event
	pub fn scope(&self) -> (Option<&str>, Option<&str>, Option<&str>) {
		let (project, service, stage) = match &self.data {
			EventData::Problem(data) => (&data.project, &data.service, &data.stage),
			EventData::Evaluation(data) => (&data.project, &data.service, &data.stage),
			EventData::Remediation(data) => (&data.project, &data.service, &data.stage),
			EventData::Other(_) => return (None, None, None),
		};

		(project.as_deref(), service.as_deref(), stage.as_deref())
	}
}

/// kind specific payload of an [InboundEvent]
#[derive(Debug, Clone)]
pub enum EventData {
	Problem(ProblemData),
	Evaluation(EvaluationData),
	Remediation(RemediationData),
	/// payload of an event type we don't handle
	Other(Value),
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProblemData {
	#[serde(rename = "ProblemTitle", alias = "problemTitle", deserialize_with = "lenient_text")]
	pub title: Option<String>,
	#[serde(rename = "ImpactedEntity", alias = "impactedEntity", deserialize_with = "lenient_text")]
	pub impacted_entity: Option<String>,
	#[serde(rename = "ProblemDetails", alias = "problemDetails", deserialize_with = "lenient_details")]
	pub details: ValueMap,
	#[serde(rename = "ProblemID", alias = "problemId", deserialize_with = "lenient_text")]
	pub problem_id: Option<String>,
	/// problem instance id, ties the resolve event to the ticket we created
	#[serde(rename = "PID", alias = "pid", deserialize_with = "lenient_text")]
	pub pid: Option<String>,
	/// comma separated
	#[serde(rename = "Tags", alias = "tags", deserialize_with = "lenient_text")]
	pub tags: Option<String>,
	#[serde(rename = "State", alias = "state", deserialize_with = "lenient_text")]
	pub state: Option<String>,
	/// problem page in dynatrace, used when no tenant is configured
	#[serde(rename = "ProblemURL", alias = "problemURL", deserialize_with = "lenient_text")]
	pub problem_url: Option<String>,
	#[serde(deserialize_with = "lenient_text")]
	pub project: Option<String>,
	#[serde(deserialize_with = "lenient_text")]
	pub service: Option<String>,
	#[serde(deserialize_with = "lenient_text")]
	pub stage: Option<String>,
	#[serde_as(as = "DefaultOnError")]
	pub labels: ValueMap,
}

impl ProblemData {
	/// non-empty tags from the comma separated tag string
	pub fn tag_list(&self) -> Vec<String> {
		self.tags
			.as_deref()
			.unwrap_or_default()
			.split(',')
			.map(str::trim)
			.filter(|tag| !tag.is_empty())
			.map(str::to_owned)
			.collect()
	}
}

/// ProblemDetails is an object in recent keptn versions and a string holding
/// a json object in older ones. Anything else is ignored.
fn lenient_details<'de, D>(deserializer: D) -> Result<ValueMap, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum RawDetails {
		Map(ValueMap),
		Text(String),
		Other(Value),
	}

	Ok(match RawDetails::deserialize(deserializer)? {
		RawDetails::Map(map) => map,
		RawDetails::Text(text) => serde_json::from_str(&text).unwrap_or_default(),
		RawDetails::Other(_) => ValueMap::new(),
	})
}

/// Scalar text field that also takes numbers and booleans. Anything else
/// counts as absent.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(match Value::deserialize(deserializer)? {
		Value::String(text) => Some(text),
		Value::Number(number) => Some(number.to_string()),
		Value::Bool(flag) => Some(flag.to_string()),
		_ => None,
	})
}

/// verdict of a quality gate evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationResult {
	Pass,
	Warning,
	Fail,
	/// anything keptn might come up with in the future, rendered verbatim
	Unknown(String),
}

impl EvaluationResult {
	pub fn parse(result: &str) -> Self {
		match result.trim().to_ascii_lowercase().as_str() {
			"pass" => Self::Pass,
			"warning" => Self::Warning,
			"fail" => Self::Fail,
			_ => Self::Unknown(result.to_owned()),
		}
	}

	pub fn as_str(&self) -> &str {
		match self {
			Self::Pass => "pass",
			Self::Warning => "warning",
			Self::Fail => "fail",
			Self::Unknown(result) => result.as_str(),
		}
	}

	/// jira wiki markup icon for the verdict
	pub fn glyph(&self) -> Option<&'static str> {
		match self {
			Self::Pass => Some("(/)"),
			Self::Warning => Some("(!)"),
			Self::Fail => Some("(x)"),
			Self::Unknown(_) => None,
		}
	}

	/// verdict followed by its icon, e.g. `fail (x)`
	pub fn annotated(&self) -> String {
		match self.glyph() {
			Some(glyph) => format!("{} {glyph}", self.as_str()),
			None => self.as_str().to_owned(),
		}
	}
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EvaluationData {
	#[serde(deserialize_with = "lenient_text")]
	pub project: Option<String>,
	#[serde(deserialize_with = "lenient_text")]
	pub service: Option<String>,
	#[serde(deserialize_with = "lenient_text")]
	pub stage: Option<String>,
	#[serde(rename = "testStrategy", alias = "teststrategy", deserialize_with = "lenient_text")]
	pub test_strategy: Option<String>,
	#[serde(deserialize_with = "lenient_text")]
	pub result: Option<String>,
	/// numbers and numeric strings
	#[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
	pub score: Option<f64>,
	/// `evaluation` since keptn 0.8, `evaluationdetails` before
	#[serde(alias = "evaluationdetails")]
	#[serde_as(as = "DefaultOnError")]
	pub evaluation: Option<EvaluationDetails>,
	#[serde_as(as = "DefaultOnError")]
	pub labels: ValueMap,
}

impl EvaluationData {
	pub fn result(&self) -> EvaluationResult {
		let result = self
			.result
			.as_deref()
			.or_else(|| self.evaluation.as_ref().and_then(|details| details.result.as_deref()))
			.unwrap_or_default();

		EvaluationResult::parse(result)
	}

	pub fn score(&self) -> Option<f64> {
		self.score.or_else(|| self.evaluation.as_ref().and_then(|details| details.score))
	}

	pub fn indicator_results(&self) -> &[IndicatorResult] {
		self.evaluation.as_ref().map_or(&[], |details| details.indicator_results.as_slice())
	}
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvaluationDetails {
	pub time_start: Value,
	pub time_end: Value,
	#[serde(deserialize_with = "lenient_text")]
	pub result: Option<String>,
	#[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
	pub score: Option<f64>,
	/// keptn sends `null` when there are no SLIs
	#[serde_as(as = "DefaultOnError")]
	pub indicator_results: Vec<IndicatorResult>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndicatorResult {
	#[serde(deserialize_with = "lenient_text")]
	pub status: Option<String>,
	#[serde_as(as = "DefaultOnError")]
	pub value: IndicatorValue,
	#[serde_as(as = "DefaultOnError")]
	pub targets: Vec<Target>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndicatorValue {
	#[serde(alias = "metricName", deserialize_with = "lenient_text")]
	pub metric: Option<String>,
	pub value: Value,
	#[serde(deserialize_with = "lenient_text")]
	pub message: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Target {
	#[serde(deserialize_with = "lenient_text")]
	pub criteria: Option<String>,
	#[serde_as(as = "DefaultOnError")]
	pub violated: bool,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemediationData {
	#[serde(deserialize_with = "lenient_text")]
	pub project: Option<String>,
	#[serde(deserialize_with = "lenient_text")]
	pub service: Option<String>,
	#[serde(deserialize_with = "lenient_text")]
	pub stage: Option<String>,
	#[serde(deserialize_with = "lenient_text")]
	pub result: Option<String>,
	#[serde(deserialize_with = "lenient_text")]
	pub status: Option<String>,
	#[serde(deserialize_with = "lenient_text")]
	pub message: Option<String>,
	#[serde_as(as = "DefaultOnError")]
	pub labels: ValueMap,
}

impl RemediationData {
	pub fn result(&self) -> EvaluationResult {
		EvaluationResult::parse(self.result.as_deref().unwrap_or_default())
	}
}

/// envelope fields we care about
#[derive(Deserialize)]
struct Envelope {
	#[serde(rename = "type", default, deserialize_with = "lenient_text")]
	event_type: Option<String>,
	#[serde(default, deserialize_with = "lenient_text")]
	source: Option<String>,
	#[serde(default, deserialize_with = "lenient_text")]
	time: Option<String>,
	#[serde(rename = "shkeptncontext", default, deserialize_with = "lenient_text")]
	context: Option<String>,
	#[serde(default, deserialize_with = "lenient_text")]
	id: Option<String>,
	#[serde(default)]
	data: Value,
}

/// Decodes a raw request body into an [InboundEvent]. Only well-formedness
/// is checked, missing fields are fine.
pub fn parse(raw: &[u8]) -> Result<InboundEvent, ParseError> {
	if raw.iter().all(u8::is_ascii_whitespace) {
		return Err(ParseError::EmptyBody);
	}

	let envelope: Envelope = serde_json::from_slice(raw)?;

	let event_type = envelope.event_type.unwrap_or_default();

	let data = match EventKind::from_type(&event_type) {
		EventKind::Problem => EventData::Problem(payload(envelope.data)?),
		EventKind::Evaluation => EventData::Evaluation(payload(envelope.data)?),
		EventKind::Remediation => EventData::Remediation(payload(envelope.data)?),
		EventKind::Other => EventData::Other(envelope.data),
	};

	Ok(InboundEvent {
		event_type,
		source: envelope.source.unwrap_or_default(),
		time: envelope.time,
		context: envelope.context.unwrap_or_default(),
		id: envelope.id.unwrap_or_default(),
		data,
	})
}

/// absent or `null` data counts as an empty object
fn payload<T: DeserializeOwned + Default>(data: Value) -> Result<T, serde_json::Error> {
	match data {
		Value::Null => Ok(T::default()),
		data => serde_json::from_value(data),
	}
}

/// text form of a scalar event value, booleans as `true`/`false`
pub fn value_text(value: &Value) -> String {
	match value {
		Value::Null => String::new(),
		Value::String(text) => text.clone(),
		Value::Bool(flag) => flag.to_string(),
		Value::Number(number) => number.to_string(),
		other => other.to_string(),
	}
}
