//! decides what to do with a parsed event

use crate::{
	event::{EventData, EventKind, InboundEvent},
	settings::JiraSettings,
};

/// what the receiver does with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
	CreateProblemTicket,
	CloseProblemTicket,
	CreateEvaluationTicket,
	CreateRemediationTicket,
	NoOp,
}

impl Action {
	/// label value for the received events meter
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::CreateProblemTicket => "create_problem_ticket",
			Self::CloseProblemTicket => "close_problem_ticket",
			Self::CreateEvaluationTicket => "create_evaluation_ticket",
			Self::CreateRemediationTicket => "create_remediation_ticket",
			Self::NoOp => "noop",
		}
	}
}

/// Maps an event to an [Action]. The ticket toggles are checked before the
/// event details so a disabled kind never reaches jira.
pub fn classify(event: &InboundEvent, settings: &JiraSettings) -> Action {
	let action = match (&event.data, event.kind()) {
		(EventData::Problem(_), _) if !settings.ticket_for_problems => Action::NoOp,
		(EventData::Problem(problem), _) => match problem.state.as_deref() {
			Some("OPEN") => Action::CreateProblemTicket,
			Some("CLOSED" | "RESOLVED") => Action::CloseProblemTicket,
			_ => Action::NoOp,
		},
		(EventData::Evaluation(_), _) if !settings.ticket_for_evaluations => Action::NoOp,
		(_, EventKind::Evaluation) => Action::CreateEvaluationTicket,
		(_, EventKind::Remediation) if settings.ticket_for_problems => {
			Action::CreateRemediationTicket
		}
		_ => Action::NoOp,
	};

	if action == Action::NoOp {
		tracing::debug!("ignoring event {} of type {:?}", event.id, event.event_type);
	}

	action
}
