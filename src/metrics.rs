//! prometheus meters, registered on first use and exposed by the
//! [telemetry endpoint](crate::telemetry_endpoint)

use once_cell::sync::Lazy;
use prometheus::{
	exponential_buckets, histogram_opts, opts, register_histogram_vec, register_int_counter_vec,
	HistogramVec, IntCounterVec,
};

/// received cloudevents by the action they were dispatched to
#[allow(clippy::expect_used)]
pub static RECEIVED_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
	register_int_counter_vec!(
		opts!("received_events_total", "total number of received cloudevents")
			.namespace("keptn_jira")
			.subsystem("event_receiver"),
		&["action"]
	)
	.expect("failed to register received_events_total meter")
});

/// total number of jira requests
#[allow(clippy::expect_used)]
pub static TRACKER_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
	register_int_counter_vec!(
		opts!("requests_total", "total number of jira requests")
			.namespace("keptn_jira")
			.subsystem("tracker_client"),
		&["endpoint"]
	)
	.expect("failed to register requests_total meter")
});

/// failed jira requests, `status_code` is empty if jira wasn't reachable
#[allow(clippy::expect_used)]
pub static TRACKER_REQUESTS_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
	register_int_counter_vec!(
		opts!("requests_failed", "number of failed jira requests")
			.namespace("keptn_jira")
			.subsystem("tracker_client"),
		&["endpoint", "status_code"]
	)
	.expect("failed to register requests_failed meter")
});

/// time spent by jira requests
#[allow(clippy::expect_used)]
pub static TRACKER_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
	register_histogram_vec!(
		histogram_opts!(
			"request_duration_seconds",
			"total time of a jira request in seconds",
			exponential_buckets(0.01, 2., 12).expect("invalid histogram buckets")
		)
		.namespace("keptn_jira")
		.subsystem("tracker_client"),
		&["endpoint"]
	)
	.expect("failed to register request_duration_seconds meter")
});
