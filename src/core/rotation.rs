use crate::{
    core::{db::DutyDb, participant::Participant, runtime::RuntimeState, settings::Settings},
    integrations::messenger::{notify_best_effort, MessengerActor, MessengerRequest},
    send_message,
};

const ANNOUNCEMENT_HEADER: &str = "Duty for today:";

/// Channel text once the duty-holder has reported back.
pub const NO_DUTY_TEXT: &str = "Duty for today:\nNo one is currently on duty.";

/// What a rotation cycle decided.
#[derive(PartialEq, Eq, Debug)]
pub enum CycleOutcome {
    EmptyRoster,
    NobodyPresent,
    Assigned { name: String, via_override: bool },
}

/// Runs one rotation cycle: pick today's duty-holder from the queue,
/// skipping absentees, advance the queue and announce the result.
///
/// Delivery failures are reported to the moderator and never retried; the
/// only hard failure left is the storage layer itself, which aborts the
/// cycle before any announcement.
pub async fn run_rotation_cycle(
    db: &DutyDb,
    settings: &Settings,
    runtime: &RuntimeState,
    messenger: &MessengerActor,
) -> anyhow::Result<CycleOutcome> {
    let moderator = settings.moderator_id;

    db.set_rotation_started(true).await?;

    let roster = db.roster().await?;
    if roster.is_empty() {
        notify_best_effort(messenger, moderator, "The duty roster is empty.").await;
        return Ok(CycleOutcome::EmptyRoster);
    }

    let present = db.present_names().await?;
    if present.is_empty() {
        let channel = runtime.channel();
        let text = format!("{}\nNobody is coming.", ANNOUNCEMENT_HEADER);
        if let Err(err) = send_message!(messenger, MessengerRequest, Announce, channel, text) {
            notify_best_effort(
                messenger,
                moderator,
                format!("Could not post to the channel: {}", err),
            )
            .await;
        }
        notify_best_effort(
            messenger,
            moderator,
            "Nobody is coming today, duty was not assigned.",
        )
        .await;
        return Ok(CycleOutcome::NobodyPresent);
    }

    let (selected, via_override) = match roster.iter().find(|&name| present.contains(name)) {
        Some(name) => (name.clone(), false),
        None => (present[0].clone(), true),
    };

    // Resolve the identity before touching the queue, so a registry gap
    // leaves the roster exactly as it was.
    let duty_holder = db.resolve_name(&selected).await?;

    if via_override {
        notify_best_effort(
            messenger,
            moderator,
            format!(
                "Everyone in the queue is absent, assigned out of turn: {}",
                selected
            ),
        )
        .await;
    }

    // The head is consumed every assigning cycle so the queue keeps moving,
    // even when the pick fell on somebody further down or outside it.
    if settings.always_advance_head() || roster.first() == Some(&selected) {
        db.pop_roster_head().await?;
    }

    let channel = runtime.channel();
    let text = format!("{}\nOn duty: {}", ANNOUNCEMENT_HEADER, selected);
    match send_message!(messenger, MessengerRequest, Announce, channel.clone(), text) {
        Ok(handle) => db.save_duty_message(&channel, &handle).await?,
        Err(err) => {
            notify_best_effort(
                messenger,
                moderator,
                format!("Could not post to the channel: {}", err),
            )
            .await;
        }
    }

    let dm = "You are on duty today! Remember to report when you are done.".to_string();
    if let Err(err) = send_message!(
        messenger,
        MessengerRequest,
        Notify,
        duty_holder.id,
        dm,
        None
    ) {
        notify_best_effort(
            messenger,
            moderator,
            format!("Could not reach {}: {}", selected, err),
        )
        .await;
    }

    notify_best_effort(messenger, moderator, format!("Duty assigned: {}", selected)).await;

    Ok(CycleOutcome::Assigned {
        name: selected,
        via_override,
    })
}

/// The duty-holder reported back: close out the standing announcement and
/// move them to the back of the queue.
///
/// The stored handle is dropped even when the edit fails, so a stale
/// announcement can never be rewritten twice.
pub async fn confirm_completion(
    db: &DutyDb,
    messenger: &MessengerActor,
    participant: &Participant,
) -> anyhow::Result<()> {
    if let Some((channel, handle)) = db.duty_message().await? {
        if let Err(err) = send_message!(
            messenger,
            MessengerRequest,
            EditAnnouncement,
            channel,
            handle,
            NO_DUTY_TEXT.to_string()
        ) {
            log::warn!("Could not edit the duty announcement: {}", err);
        }
        db.clear_duty_message().await?;
    }

    db.append_to_roster(&participant.name).await?;
    Ok(())
}
