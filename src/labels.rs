//! jira labels derived from keptn events
//!
//! Jira labels can't contain whitespace and are limited to 255 characters.

use crate::event::{value_text, ValueMap};

/// jira rejects issues carrying longer labels
pub const MAX_LABEL_LEN: usize = 255;

/// replaces every whitespace character with `-`
pub fn normalize(label: &str) -> String {
	label.chars().map(|c| if c.is_whitespace() { '-' } else { c }).collect()
}

/// event fields the system labels are made from
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelSource<'a> {
	pub project: Option<&'a str>,
	pub service: Option<&'a str>,
	pub stage: Option<&'a str>,
	pub result: Option<&'a str>,
	pub user_labels: Option<&'a ValueMap>,
}

/// Builds the label list of a ticket: `keptn_*` labels first, then the event
/// supplied labels as `key:value` in event order. Duplicates are kept.
pub fn ticket_labels(source: LabelSource<'_>) -> Vec<String> {
	let system = [
		("keptn_project", source.project),
		("keptn_service", source.service),
		("keptn_stage", source.stage),
		("keptn_result", source.result.map(str::to_lowercase).as_deref()),
	]
	.into_iter()
	.filter_map(|(name, value)| value.map(|value| format!("{name}:{}", normalize(value))))
	.collect::<Vec<_>>();

	let user = source.user_labels.into_iter().flatten().map(|(key, value)| {
		format!("{}:{}", normalize(key), normalize(&value_text(value)))
	});

	system
		.into_iter()
		.chain(user)
		.filter(|label| {
			if label.chars().count() > MAX_LABEL_LEN {
				tracing::warn!(
					"skipping label {label:?}: jira accepts at most {MAX_LABEL_LEN} characters"
				);
				return false;
			}
			true
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn normalize_replaces_whitespace() {
		assert_eq!(normalize("my label\twith\nspaces"), "my-label-with-spaces");
	}

	#[test]
	fn normalize_is_idempotent() {
		for input in ["", "plain", " leading", "a  b", "tab\tand space ", "ünï cöde"] {
			let once = normalize(input);
			assert_eq!(normalize(&once), once);
			assert!(!once.chars().any(char::is_whitespace));
		}
	}

	#[test]
	fn system_labels_come_first() {
		let mut user = ValueMap::new();
		user.insert(String::from("build number"), json!("1.2 rc"));
		user.insert(String::from("canary"), json!(true));

		let labels = ticket_labels(LabelSource {
			project: Some("sock shop"),
			service: Some("carts"),
			stage: None,
			result: Some("FAIL"),
			user_labels: Some(&user),
		});

		assert_eq!(
			labels,
			[
				"keptn_project:sock-shop",
				"keptn_service:carts",
				"keptn_result:fail",
				"build-number:1.2-rc",
				"canary:true",
			]
		);
	}

	#[test]
	fn duplicates_are_preserved() {
		let mut user = ValueMap::new();
		user.insert(String::from("keptn_project"), json!("sockshop"));

		let labels = ticket_labels(LabelSource {
			project: Some("sockshop"),
			user_labels: Some(&user),
			..LabelSource::default()
		});

		assert_eq!(labels, ["keptn_project:sockshop", "keptn_project:sockshop"]);
	}

	#[test]
	fn oversized_labels_are_dropped() {
		let mut user = ValueMap::new();
		user.insert(String::from("long"), json!("x".repeat(MAX_LABEL_LEN)));
		user.insert(String::from("short"), json!("y"));

		let labels =
			ticket_labels(LabelSource { user_labels: Some(&user), ..LabelSource::default() });

		assert_eq!(labels, ["short:y"]);
	}
}
