//! keptn service that turns problem, evaluation and remediation events into
//! jira tickets
//!
//! Features:
//! - creates jira issues for open problems and links them to the keptn bridge
//!   and dynatrace
//! - comments on and closes the issue once the problem is resolved
//! - quality gate and remediation tickets, optionally announced to dynatrace
//! - user supplied tera templates for the ticket descriptions

use std::sync::Arc;

use anyhow::{Context, Result};
use settings::Settings;

mod dispatcher;
mod dynatrace;
mod event;
mod event_receiver;
mod labels;
mod log;
mod metrics;
mod orchestrator;
mod settings;
mod telemetry_endpoint;
mod ticket_renderer;
mod tracker;

/// exit the complete program if one thread panics
fn setup_panic_handler() {
	let default_panic = std::panic::take_hook();
	std::panic::set_hook(Box::new(move |info| {
		default_panic(info);
		std::process::exit(1);
	}));
}

/// the entry point of the program
#[tokio::main]
pub async fn main() -> Result<()> {
	setup_panic_handler();

	let settings = Arc::new(Settings::load()?);

	log::setup_logging(&settings.log).context("could not setup logging")?;

	tracing::debug!("effective settings: {settings:#?}");

	if let Some(telemetry_settings) = settings.telemetry_endpoint.clone() {
		tokio::spawn(async move {
			#[allow(clippy::expect_used)]
			telemetry_endpoint::run_telemetry_endpoint(telemetry_settings)
				.await
				.expect("telemetry endpoint failed to start or crashed");
		});
	}

	event_receiver::run_event_receiver(settings).await
}
