use crate::{
    core::event::{Command, InboundEvent, ModeratorAction},
    error::Error,
};

/// Parses one console line into an inbound event.
///
/// The line starts with the sender's numeric identity, followed by either a
/// `/command`, a `!action`, or free text routed by the sender's dialog state:
///
/// ```text
/// 17 /start
/// 17 Anna Petrova
/// 1000 !approve 17
/// ```
pub fn parse_event(line: &str) -> Result<InboundEvent, Error> {
    let line = line.trim();
    let (user, rest) = line
        .split_once(' ')
        .ok_or_else(|| Error::Validation(format!("Expected '<user_id> <input>', got: {}", line)))?;

    let user: i64 = user
        .parse()
        .map_err(|_| Error::Validation(format!("Invalid user id: {}", user)))?;

    let rest = rest.trim();
    if let Some(cmd) = rest.strip_prefix('/') {
        parse_command(user, cmd)
    } else if let Some(action) = rest.strip_prefix('!') {
        parse_action(user, action)
    } else {
        Ok(InboundEvent::Text(user, rest.to_string()))
    }
}

fn parse_command(user: i64, cmd: &str) -> Result<InboundEvent, Error> {
    let mut elements = cmd.split_whitespace();
    let name = elements.next().unwrap_or_default().to_lowercase();
    let args: Vec<&str> = elements.collect();

    let command = match (name.as_str(), args.len()) {
        ("start", 0) => Command::Start,
        ("help", 0) => Command::Help,
        ("set_channel", 1) => Command::SetChannel(args[0].to_string()),
        ("reset_roster", 0) => Command::ResetRoster,
        ("next_duty", 0) => Command::NextDuty,
        ("list", 0) => Command::ListClass,
        ("present", 0) => Command::MarkPresent,
        ("absent", 0) => Command::MarkAbsent,
        ("report_duty", 0) => Command::ReportDuty,
        ("add_duty", 0) => Command::AddDuty,
        ("delete", 0) => Command::DeleteParticipant,
        ("trigger", 0) => Command::TriggerRotation,
        ("stop", 0) => Command::Stop,
        ("resume", 0) => Command::Resume,
        _ => return Err(Error::Validation(format!("Unknown command: /{}", cmd))),
    };

    Ok(InboundEvent::Command(user, command))
}

fn parse_action(user: i64, action: &str) -> Result<InboundEvent, Error> {
    let mut elements = action.split_whitespace();
    let name = elements.next().unwrap_or_default().to_lowercase();
    let args: Vec<&str> = elements.collect();

    let parse_id = |value: &str| {
        value
            .parse::<i64>()
            .map_err(|_| Error::Validation(format!("Invalid participant id: {}", value)))
    };

    let action = match (name.as_str(), args.len()) {
        ("approve", 1) => ModeratorAction::Approve(parse_id(args[0])?),
        ("decline", 1) => ModeratorAction::Decline(parse_id(args[0])?),
        ("confirm", 0) => ModeratorAction::ConfirmDeleteAll,
        ("cancel", 0) => ModeratorAction::CancelDeleteAll,
        _ => return Err(Error::Validation(format!("Unknown action: !{}", action))),
    };

    Ok(InboundEvent::Action(user, action))
}
