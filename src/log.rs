use std::{fs::OpenOptions, path::PathBuf, str::FromStr, sync::Mutex};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing_subscriber::{
	filter::LevelFilter, fmt, prelude::__tracing_subscriber_SubscriberExt,
	util::SubscriberInitExt, EnvFilter,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
	pub level: String,
	/// append log lines to this file in addition to stdout
	pub file: Option<PathBuf>,
}

impl Default for LogSettings {
	fn default() -> Self {
		Self { level: String::from("info"), file: None }
	}
}

pub fn setup_logging(settings: &LogSettings) -> Result<()> {
	let level = tracing::Level::from_str(settings.level.as_str())
		.context(format!("invalid log level {:?}", settings.level))?;

	let fmt_layer = fmt::layer();

	let file_layer = match &settings.file {
		Some(path) => {
			if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
				std::fs::create_dir_all(parent)
					.context(format!("could not create log directory {parent:?}"))?;
			}

			let file = OpenOptions::new()
				.create(true)
				.append(true)
				.open(path)
				.context(format!("could not open log file {path:?}"))?;

			Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
		}
		None => None,
	};

	let filter_layer = EnvFilter::default()
		.add_directive(LevelFilter::from_level(level).into())
		.add_directive("hyper=warn".parse()?)
		.add_directive("reqwest=warn".parse()?);

	tracing_subscriber::registry()
		.with(filter_layer)
		.with(fmt_layer)
		.with(file_layer)
		.init();

	Ok(())
}
