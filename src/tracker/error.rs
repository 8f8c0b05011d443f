use thiserror::Error;

/// Failure of a single outbound rest call
#[derive(Error, Debug)]
pub enum TrackerError {
	/// connection failed or the response body couldn't be read
	#[error("remote api unreachable: {0}")]
	Unreachable(#[source] reqwest::Error),
	/// the remote api answered with a non-success status
	#[error("remote api responded with status {status}: {body}")]
	HttpStatus { status: u16, body: String },
	/// the response body doesn't have the expected shape
	#[error("malformed response: {0}")]
	MalformedResponse(String),
}

impl TrackerError {
	/// label value for the failed requests meter
	pub fn status_label(&self) -> String {
		match self {
			Self::HttpStatus { status, .. } => status.to_string(),
			Self::Unreachable(_) | Self::MalformedResponse(_) => String::new(),
		}
	}
}
