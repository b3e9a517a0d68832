/// Structured command carried by an inbound message.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Command {
    Start,
    Help,
    SetChannel(String),
    ResetRoster,
    NextDuty,
    ListClass,
    MarkPresent,
    MarkAbsent,
    ReportDuty,
    AddDuty,
    DeleteParticipant,
    TriggerRotation,
    Stop,
    Resume,
}

/// Moderator-only inline actions attached to earlier prompts.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum ModeratorAction {
    Approve(i64),
    Decline(i64),
    ConfirmDeleteAll,
    CancelDeleteAll,
}

/// A transport-independent inbound event, tagged with the sender identity.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum InboundEvent {
    Command(i64, Command),
    Text(i64, String),
    Action(i64, ModeratorAction),
}

impl InboundEvent {
    pub fn user(&self) -> i64 {
        match self {
            InboundEvent::Command(user, _)
            | InboundEvent::Text(user, _)
            | InboundEvent::Action(user, _) => *user,
        }
    }
}
