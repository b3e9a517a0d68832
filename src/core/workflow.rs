use std::{collections::HashMap, sync::Arc};

use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    core::{
        db::DutyDb,
        event::{Command, InboundEvent, ModeratorAction},
        participant::{self, AttendanceState, Role},
        rotation,
        runtime::{OperationalMode, RuntimeState},
        settings::Settings,
    },
    error::Error,
    integrations::messenger::{notify_best_effort, Markup, MessengerActor, MessengerRequest},
    send_message, ActorRef, Rto,
};

/// What started a rotation cycle.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum RotationTrigger {
    Scheduled,
    Manual,
}

/// Requests serialized through the duty manager. Every state mutation in the
/// system goes through this queue, one request at a time.
pub enum DutyRequest {
    Inbound(InboundEvent, Rto<()>),
    RunRotation(RotationTrigger, Rto<()>),
    ResetAttendance(Rto<()>),
}

pub type DutyActor = ActorRef<DutyRequest>;

/// Dialog position of one user in the conversational workflow.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub enum DialogState {
    #[default]
    Idle,
    AwaitingName,
    AwaitingAbsenceReason,
    AwaitingDutyName,
    AwaitingDeleteTarget,
    AwaitingDeleteAllConfirm,
}

const DELETE_ALL_SENTINEL: &str = "@all";

const INACTIVE_NOTICE: &str = "The service is stopped. Please wait for the moderator to resume it.";

const HELP_TEXT: &str = "Moderator guide:

/list - class attendance report
/add_duty - nominate somebody for duty now
/delete - remove a participant (name or @all)
/trigger - run a rotation cycle now
/next_duty - who is next in the queue
/reset_roster - reset the queue to alphabetical order
/set_channel @handle - change the announcement channel
/stop, /resume - pause or resume the service

The duty-holder is assigned automatically on duty days. Students answer
/present or /absent in the morning and /report_duty when they are done,
which moves them to the back of the queue.";

pub async fn run_duty_manager(
    db: Arc<DutyDb>,
    settings: Arc<Settings>,
    runtime: Arc<RuntimeState>,
    messenger: MessengerActor,
    mut rx: UnboundedReceiver<DutyRequest>,
) -> Result<(), anyhow::Error> {
    log::debug!("Started duty manager");
    let mut manager = DutyManager::new(db, settings, runtime, messenger);

    while let Some(msg) = rx.recv().await {
        match msg {
            DutyRequest::Inbound(event, rto) => rto.reply(manager.handle_event(event).await),
            DutyRequest::RunRotation(trigger, rto) => rto.reply(manager.run_rotation(trigger).await),
            DutyRequest::ResetAttendance(rto) => rto.reply(manager.db.reset_attendance().await),
        }
    }

    Ok(())
}

/// Owner of the registration workflow, the per-user dialog states and the
/// rotation entry points.
pub struct DutyManager {
    db: Arc<DutyDb>,
    settings: Arc<Settings>,
    runtime: Arc<RuntimeState>,
    messenger: MessengerActor,
    dialogs: HashMap<i64, DialogState>,
}

impl DutyManager {
    pub fn new(
        db: Arc<DutyDb>,
        settings: Arc<Settings>,
        runtime: Arc<RuntimeState>,
        messenger: MessengerActor,
    ) -> Self {
        DutyManager {
            db,
            settings,
            runtime,
            messenger,
            dialogs: HashMap::new(),
        }
    }

    fn moderator(&self) -> i64 {
        self.settings.moderator_id
    }

    async fn notify(&self, recipient: i64, text: impl Into<String>) {
        notify_best_effort(&self.messenger, recipient, text).await;
    }

    pub async fn handle_event(&mut self, event: InboundEvent) -> anyhow::Result<()> {
        if self.runtime.mode() == OperationalMode::Inactive && !self.exempt_while_inactive(&event) {
            let user = event.user();
            self.dialogs.remove(&user);
            self.notify(user, INACTIVE_NOTICE).await;
            return Ok(());
        }

        match event {
            InboundEvent::Command(user, command) => self.handle_command(user, command).await,
            InboundEvent::Text(user, text) => self.handle_text(user, text).await,
            InboundEvent::Action(user, action) => self.handle_action(user, action).await,
        }
    }

    /// Only the moderator's stop/resume get through while inactive; anything
    /// else would leave the service impossible to restart.
    fn exempt_while_inactive(&self, event: &InboundEvent) -> bool {
        matches!(
            event,
            InboundEvent::Command(user, Command::Stop | Command::Resume)
                if *user == self.moderator()
        )
    }

    async fn handle_command(&mut self, user: i64, command: Command) -> anyhow::Result<()> {
        let is_moderator = user == self.moderator();
        match command {
            Command::Start => self.handle_start(user).await,
            Command::NextDuty => self.next_duty(user).await,
            Command::MarkPresent => self.mark_present(user).await,
            Command::MarkAbsent => self.prompt_absence(user).await,
            Command::ReportDuty => self.report_duty(user).await,
            _ if !is_moderator => {
                log::debug!("Ignoring moderator command from {}", user);
                Ok(())
            }
            Command::Help => {
                self.notify(user, HELP_TEXT).await;
                Ok(())
            }
            Command::SetChannel(channel) => self.set_channel(&channel).await,
            Command::ResetRoster => self.reset_roster().await,
            Command::ListClass => self.list_class().await,
            Command::AddDuty => {
                self.dialogs.insert(user, DialogState::AwaitingDutyName);
                self.notify(user, "Whom to nominate? Enter the name:").await;
                Ok(())
            }
            Command::DeleteParticipant => {
                self.dialogs.insert(user, DialogState::AwaitingDeleteTarget);
                self.notify(user, "Enter a name to delete, or @all:").await;
                Ok(())
            }
            Command::TriggerRotation => {
                self.run_rotation(RotationTrigger::Manual).await?;
                self.notify(user, "Rotation cycle was triggered.").await;
                Ok(())
            }
            Command::Stop => {
                self.runtime.set_mode(OperationalMode::Inactive);
                self.notify(user, "The service is stopped. Students can no longer mark attendance.")
                    .await;
                Ok(())
            }
            Command::Resume => {
                self.runtime.set_mode(OperationalMode::Active);
                self.notify(user, "The service is running. Students can mark attendance again.")
                    .await;
                Ok(())
            }
        }
    }

    async fn handle_text(&mut self, user: i64, text: String) -> anyhow::Result<()> {
        match self.dialogs.get(&user).copied().unwrap_or_default() {
            // Free text outside a dialog, or while a confirm prompt is
            // pending, is ignored.
            DialogState::Idle | DialogState::AwaitingDeleteAllConfirm => Ok(()),
            DialogState::AwaitingName => self.register_name(user, &text).await,
            DialogState::AwaitingAbsenceReason => self.record_absence(user, &text).await,
            DialogState::AwaitingDutyName => self.nominate_duty(&text).await,
            DialogState::AwaitingDeleteTarget => self.delete_target(&text).await,
        }
    }

    async fn handle_action(&mut self, user: i64, action: ModeratorAction) -> anyhow::Result<()> {
        if user != self.moderator() {
            log::debug!("Ignoring moderator action from {}", user);
            return Ok(());
        }
        match action {
            ModeratorAction::Approve(id) => self.approve_participant(id).await,
            ModeratorAction::Decline(id) => self.decline_participant(id).await,
            ModeratorAction::ConfirmDeleteAll => self.confirm_delete_all().await,
            ModeratorAction::CancelDeleteAll => self.cancel_delete_all().await,
        }
    }

    async fn handle_start(&mut self, user: i64) -> anyhow::Result<()> {
        if user == self.moderator() {
            self.db.provision_moderator(user).await?;
            self.notify(user, "Welcome! Use /help for the moderator guide.")
                .await;
            return Ok(());
        }

        match self.db.find_by_id(user).await? {
            Some(p) if p.is_approved() => self.notify(user, "Welcome back!").await,
            Some(_) => {
                self.notify(user, "Your application is still being reviewed.")
                    .await
            }
            None => {
                self.dialogs.insert(user, DialogState::AwaitingName);
                self.notify(user, "Welcome! Enter your full name (for example: Anna Petrova):")
                    .await;
            }
        }
        Ok(())
    }

    async fn register_name(&mut self, user: i64, text: &str) -> anyhow::Result<()> {
        let name = text.trim();
        if !participant::is_valid_full_name(name) {
            self.notify(user, "The name must be two words, letters only. Example: Anna Petrova")
                .await;
            return Ok(());
        }

        match self.db.insert_pending(user, name).await {
            Ok(()) => {}
            Err(err) => {
                return if matches!(err.downcast_ref::<Error>(), Some(Error::Validation(_))) {
                    self.notify(user, err.to_string()).await;
                    Ok(())
                } else {
                    Err(err)
                };
            }
        }

        let application = format!("New application:\nName: {}\nId: {}", name, user);
        if let Err(err) = send_message!(
            self.messenger,
            MessengerRequest,
            Notify,
            self.moderator(),
            application,
            Some(Markup::ApprovalPrompt { participant: user })
        ) {
            log::warn!("Could not deliver application to the moderator: {}", err);
        }

        self.notify(user, "Your application has been sent.").await;
        self.dialogs.remove(&user);
        Ok(())
    }

    async fn approve_participant(&mut self, id: i64) -> anyhow::Result<()> {
        let Some(pending) = self.db.find_by_id(id).await? else {
            self.notify(self.moderator(), format!("No application found for id {}.", id))
                .await;
            return Ok(());
        };
        if pending.role != Role::Student {
            self.notify(self.moderator(), "Only student applications can be approved.")
                .await;
            return Ok(());
        }
        if pending.is_approved() {
            self.notify(self.moderator(), format!("{} is already approved.", pending.name))
                .await;
            return Ok(());
        }

        self.db.approve(id).await?;
        self.db.append_to_roster(&pending.name).await?;

        // Until the first cycle runs the queue is kept alphabetical, so
        // late approvals slot in fairly. Once rotation is underway new
        // names go to the back instead.
        if !self.db.rotation_started().await? {
            let mut roster = self.db.roster().await?;
            if roster.len() > 1 {
                roster.sort();
                self.db.replace_roster(&roster).await?;
                self.notify(self.moderator(), "The duty roster was sorted alphabetically.")
                    .await;
            }
        }

        self.notify(id, "You have been approved! You are now in the duty queue.")
            .await;
        Ok(())
    }

    async fn decline_participant(&mut self, id: i64) -> anyhow::Result<()> {
        let Some(pending) = self.db.find_by_id(id).await? else {
            self.notify(self.moderator(), format!("No application found for id {}.", id))
                .await;
            return Ok(());
        };
        if pending.role != Role::Student {
            self.notify(self.moderator(), "Only student applications can be declined.")
                .await;
            return Ok(());
        }

        self.db.delete_participant(id).await?;
        self.notify(id, "Your application was declined.").await;
        Ok(())
    }

    async fn mark_present(&mut self, user: i64) -> anyhow::Result<()> {
        match self.db.find_by_id(user).await? {
            Some(p) if p.is_approved() && p.role == Role::Student => {
                self.db
                    .set_attendance(user, AttendanceState::Present, None)
                    .await?;
                self.notify(user, "You are marked as coming.").await;
            }
            _ => {
                self.notify(user, "Attendance can be marked only after your application is approved.")
                    .await;
            }
        }
        Ok(())
    }

    async fn prompt_absence(&mut self, user: i64) -> anyhow::Result<()> {
        match self.db.find_by_id(user).await? {
            Some(p) if p.is_approved() && p.role == Role::Student => {
                self.dialogs.insert(user, DialogState::AwaitingAbsenceReason);
                self.notify(user, "What is the reason for your absence?").await;
            }
            _ => {
                self.notify(user, "Attendance can be marked only after your application is approved.")
                    .await;
            }
        }
        Ok(())
    }

    async fn record_absence(&mut self, user: i64, text: &str) -> anyhow::Result<()> {
        let reason = text.trim();
        match self.db.find_by_id(user).await? {
            Some(p) if p.is_approved() && p.role == Role::Student => {
                self.db
                    .set_attendance(user, AttendanceState::Absent, Some(reason))
                    .await?;
                self.notify(user, format!("You are marked as not coming. Reason: {}", reason))
                    .await;
            }
            _ => {
                self.notify(user, "Attendance can be marked only after your application is approved.")
                    .await;
            }
        }
        self.dialogs.remove(&user);
        Ok(())
    }

    async fn report_duty(&mut self, user: i64) -> anyhow::Result<()> {
        match self.db.find_by_id(user).await? {
            Some(p) if p.is_approved() && p.role == Role::Student => {
                self.notify(user, "Thank you, duty reported. Well done!").await;
                rotation::confirm_completion(&self.db, &self.messenger, &p).await
            }
            Some(_) => {
                self.notify(user, "Only approved students report duty.").await;
                Ok(())
            }
            None => {
                self.notify(user, "You are not registered.").await;
                Ok(())
            }
        }
    }

    async fn nominate_duty(&mut self, text: &str) -> anyhow::Result<()> {
        let name = text.trim();
        match self.db.find_by_name(name).await? {
            Some(p) if p.is_approved() && p.role == Role::Student => {
                self.notify(p.id, "You have been nominated for duty today!").await;
                self.notify(self.moderator(), format!("{} has been nominated for duty.", p.name))
                    .await;
            }
            _ => {
                self.notify(self.moderator(), "No such participant.").await;
            }
        }
        self.dialogs.remove(&self.moderator());
        Ok(())
    }

    async fn delete_target(&mut self, text: &str) -> anyhow::Result<()> {
        let target = text.trim();
        if target == DELETE_ALL_SENTINEL {
            self.dialogs
                .insert(self.moderator(), DialogState::AwaitingDeleteAllConfirm);
            let warning =
                "This will delete every participant and clear the queue. Are you sure?".to_string();
            if let Err(err) = send_message!(
                self.messenger,
                MessengerRequest,
                Notify,
                self.moderator(),
                warning,
                Some(Markup::BulkDeleteConfirm)
            ) {
                log::warn!("Could not deliver the confirm prompt: {}", err);
            }
            return Ok(());
        }

        match self.db.find_by_name(target).await? {
            Some(p) if p.role == Role::Student => {
                self.notify(p.id, "You have been removed from the class.").await;
                self.db.delete_by_name(&p.name).await?;
                self.db.remove_from_roster(&p.name).await?;
                self.notify(self.moderator(), format!("Removed: {}", p.name)).await;
            }
            _ => {
                self.notify(self.moderator(), "No such participant.").await;
            }
        }
        self.dialogs.remove(&self.moderator());
        Ok(())
    }

    async fn confirm_delete_all(&mut self) -> anyhow::Result<()> {
        if self.dialogs.get(&self.moderator()) != Some(&DialogState::AwaitingDeleteAllConfirm) {
            return Ok(());
        }

        let removed = self.db.delete_all_students().await?;
        self.db.clear_roster().await?;
        for student in &removed {
            self.notify(student.id, "All class data was reset.").await;
        }
        self.notify(
            self.moderator(),
            "All participants and the duty roster were deleted.",
        )
        .await;
        self.dialogs.remove(&self.moderator());
        Ok(())
    }

    async fn cancel_delete_all(&mut self) -> anyhow::Result<()> {
        if self.dialogs.get(&self.moderator()) != Some(&DialogState::AwaitingDeleteAllConfirm) {
            return Ok(());
        }
        self.notify(self.moderator(), "Cancelled.").await;
        self.dialogs.remove(&self.moderator());
        Ok(())
    }

    async fn set_channel(&mut self, channel: &str) -> anyhow::Result<()> {
        let channel = channel.trim();
        if !channel.starts_with('@') || channel.len() < 2 {
            self.notify(
                self.moderator(),
                "That does not look like a channel handle. Example: @class_channel",
            )
            .await;
            return Ok(());
        }

        self.db.set_channel(channel).await?;
        self.runtime.set_channel(channel.to_string());
        self.notify(self.moderator(), format!("Announcement channel changed to {}.", channel))
            .await;
        Ok(())
    }

    async fn reset_roster(&mut self) -> anyhow::Result<()> {
        let mut names = self.db.roster().await?;
        if names.is_empty() {
            self.notify(self.moderator(), "The duty roster is empty.").await;
            return Ok(());
        }

        names.sort();
        self.db.replace_roster(&names).await?;
        self.db.set_rotation_started(false).await?;

        let listing = names
            .iter()
            .enumerate()
            .map(|(i, name)| format!("{}. {}", i + 1, name))
            .collect::<Vec<_>>()
            .join("\n");
        self.notify(
            self.moderator(),
            format!("The roster was reset to alphabetical order:\n{}", listing),
        )
        .await;
        Ok(())
    }

    async fn next_duty(&mut self, user: i64) -> anyhow::Result<()> {
        let roster = self.db.roster().await?;
        let Some(head) = roster.first() else {
            self.notify(user, "The duty roster is empty.").await;
            return Ok(());
        };

        let label = match self.db.find_by_name(head).await? {
            Some(p) if p.is_approved() => p.attendance_label(),
            _ => "no record",
        };
        self.notify(user, format!("Next in the queue: {} ({})", head, label))
            .await;
        Ok(())
    }

    async fn list_class(&mut self) -> anyhow::Result<()> {
        let students = self.db.approved_students().await?;
        if students.is_empty() {
            self.notify(self.moderator(), "The class list is empty.").await;
            return Ok(());
        }

        let report = students
            .iter()
            .map(|student| student.attendance_line())
            .collect::<Vec<_>>()
            .join("\n");
        self.notify(self.moderator(), format!("Class attendance:\n\n{}", report))
            .await;
        Ok(())
    }

    pub async fn run_rotation(&mut self, trigger: RotationTrigger) -> anyhow::Result<()> {
        if self.runtime.mode() == OperationalMode::Inactive {
            log::info!("Skipping rotation cycle ({:?}): {}", trigger, Error::Inactive);
            return Ok(());
        }

        match rotation::run_rotation_cycle(&self.db, &self.settings, &self.runtime, &self.messenger)
            .await
        {
            Ok(outcome) => {
                log::info!("Rotation cycle ({:?}) finished: {:?}", trigger, outcome);
                Ok(())
            }
            Err(err) if matches!(err.downcast_ref::<Error>(), Some(Error::Consistency(_))) => {
                log::error!("Rotation cycle abandoned: {}", err);
                self.notify(self.moderator(), format!("Rotation cycle failed: {}", err))
                    .await;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::participant::ApprovalState;
    use crate::integrations::messenger::testing::{
        announcements, recording_messenger, texts_to, Delivery, DeliveryLog,
    };

    const MODERATOR: i64 = 1000;

    fn test_settings() -> Settings {
        Settings {
            moderator_id: MODERATOR,
            default_channel: "@class".to_string(),
            utc_offset_hours: 0,
            trigger_hour: 8,
            trigger_minute: 25,
            duty_weekdays: None,
            always_advance_head: None,
            reset_attendance_daily: None,
        }
    }

    async fn setup() -> (DutyManager, Arc<DutyDb>, DeliveryLog) {
        let db = Arc::new(DutyDb::init_in_memory().await.unwrap());
        db.provision_moderator(MODERATOR).await.unwrap();
        let runtime = Arc::new(RuntimeState::new(
            OperationalMode::Active,
            "@class".to_string(),
        ));
        let (messenger, log) = recording_messenger();
        let manager = DutyManager::new(db.clone(), Arc::new(test_settings()), runtime, messenger);
        (manager, db, log)
    }

    async fn register_and_approve(manager: &mut DutyManager, db: &DutyDb, id: i64, name: &str) {
        db.insert_pending(id, name).await.unwrap();
        manager
            .handle_event(InboundEvent::Action(MODERATOR, ModeratorAction::Approve(id)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_registration_flow() {
        let (mut manager, db, log) = setup().await;

        manager
            .handle_event(InboundEvent::Command(17, Command::Start))
            .await
            .unwrap();
        assert!(texts_to(&log, 17)
            .iter()
            .any(|text| text.contains("Enter your full name")));

        // A malformed name re-prompts and stays in the dialog.
        manager
            .handle_event(InboundEvent::Text(17, "Anna".to_string()))
            .await
            .unwrap();
        assert!(texts_to(&log, 17).iter().any(|text| text.contains("two words")));
        assert!(db.find_by_id(17).await.unwrap().is_none());

        manager
            .handle_event(InboundEvent::Text(17, "Anna Petrova".to_string()))
            .await
            .unwrap();

        let pending = db.find_by_id(17).await.unwrap().unwrap();
        assert_eq!(pending.approval, ApprovalState::Pending);
        assert_eq!(pending.name, "Anna Petrova");

        // The moderator got the application with approval controls.
        assert!(log.lock().unwrap().iter().any(|delivery| matches!(
            delivery,
            Delivery::Notify {
                recipient: MODERATOR,
                markup: Some(Markup::ApprovalPrompt { participant: 17 }),
                ..
            }
        )));

        // Dialog is closed: further text is ignored.
        manager
            .handle_event(InboundEvent::Text(17, "Boris Ivanov".to_string()))
            .await
            .unwrap();
        assert_eq!(db.find_by_id(17).await.unwrap().unwrap().name, "Anna Petrova");
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_inline() {
        let (mut manager, db, log) = setup().await;

        db.insert_pending(1, "Anna Petrova").await.unwrap();

        manager
            .handle_event(InboundEvent::Command(2, Command::Start))
            .await
            .unwrap();
        manager
            .handle_event(InboundEvent::Text(2, "Anna Petrova".to_string()))
            .await
            .unwrap();

        assert!(db.find_by_id(2).await.unwrap().is_none());
        assert!(texts_to(&log, 2)
            .iter()
            .any(|text| text.contains("already registered")));
    }

    #[tokio::test]
    async fn test_approval_sorts_until_rotation_starts() {
        let (mut manager, db, _log) = setup().await;

        register_and_approve(&mut manager, &db, 2, "Boris Ivanov").await;
        register_and_approve(&mut manager, &db, 1, "Anna Petrova").await;

        assert_eq!(
            db.roster().await.unwrap(),
            vec!["Anna Petrova", "Boris Ivanov"]
        );
        assert!(db.find_by_id(1).await.unwrap().unwrap().is_approved());
    }

    #[tokio::test]
    async fn test_approval_appends_after_rotation_started() {
        let (mut manager, db, _log) = setup().await;

        db.set_rotation_started(true).await.unwrap();
        register_and_approve(&mut manager, &db, 2, "Boris Ivanov").await;
        register_and_approve(&mut manager, &db, 1, "Anna Petrova").await;

        assert_eq!(
            db.roster().await.unwrap(),
            vec!["Boris Ivanov", "Anna Petrova"]
        );
    }

    #[tokio::test]
    async fn test_double_approve_does_not_duplicate() {
        let (mut manager, db, log) = setup().await;

        register_and_approve(&mut manager, &db, 1, "Anna Petrova").await;
        manager
            .handle_event(InboundEvent::Action(MODERATOR, ModeratorAction::Approve(1)))
            .await
            .unwrap();

        assert_eq!(db.roster().await.unwrap(), vec!["Anna Petrova"]);
        assert!(texts_to(&log, MODERATOR)
            .iter()
            .any(|text| text.contains("already approved")));

        // Approving the moderator record never queues it.
        manager
            .handle_event(InboundEvent::Action(
                MODERATOR,
                ModeratorAction::Approve(MODERATOR),
            ))
            .await
            .unwrap();
        assert_eq!(db.roster().await.unwrap(), vec!["Anna Petrova"]);
    }

    #[tokio::test]
    async fn test_decline_deletes_application() {
        let (mut manager, db, log) = setup().await;

        db.insert_pending(17, "Anna Petrova").await.unwrap();
        manager
            .handle_event(InboundEvent::Action(MODERATOR, ModeratorAction::Decline(17)))
            .await
            .unwrap();

        assert!(db.find_by_id(17).await.unwrap().is_none());
        assert!(db.roster().await.unwrap().is_empty());
        assert!(texts_to(&log, 17).iter().any(|text| text.contains("declined")));
    }

    #[tokio::test]
    async fn test_inactive_mode_clears_dialog() {
        let (mut manager, db, log) = setup().await;

        manager
            .handle_event(InboundEvent::Command(17, Command::Start))
            .await
            .unwrap();

        manager
            .handle_event(InboundEvent::Command(MODERATOR, Command::Stop))
            .await
            .unwrap();

        // Mid-dialog input bounces off the inactive notice and the dialog
        // state is gone.
        manager
            .handle_event(InboundEvent::Text(17, "Anna Petrova".to_string()))
            .await
            .unwrap();
        assert!(texts_to(&log, 17).iter().any(|text| text.contains("stopped")));
        assert!(db.find_by_id(17).await.unwrap().is_none());

        manager
            .handle_event(InboundEvent::Command(MODERATOR, Command::Resume))
            .await
            .unwrap();

        // Back in idle state, the same text no longer registers anybody.
        manager
            .handle_event(InboundEvent::Text(17, "Anna Petrova".to_string()))
            .await
            .unwrap();
        assert!(db.find_by_id(17).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attendance_requires_approval() {
        let (mut manager, db, log) = setup().await;

        db.insert_pending(17, "Anna Petrova").await.unwrap();
        manager
            .handle_event(InboundEvent::Command(17, Command::MarkPresent))
            .await
            .unwrap();

        assert_eq!(
            db.find_by_id(17).await.unwrap().unwrap().attendance,
            AttendanceState::Unknown
        );
        assert!(texts_to(&log, 17).iter().any(|text| text.contains("approved")));
    }

    #[tokio::test]
    async fn test_absence_reason_flow() {
        let (mut manager, db, log) = setup().await;

        register_and_approve(&mut manager, &db, 17, "Anna Petrova").await;

        manager
            .handle_event(InboundEvent::Command(17, Command::MarkAbsent))
            .await
            .unwrap();
        manager
            .handle_event(InboundEvent::Text(17, "visiting the doctor".to_string()))
            .await
            .unwrap();

        let anna = db.find_by_id(17).await.unwrap().unwrap();
        assert_eq!(anna.attendance, AttendanceState::Absent);
        assert_eq!(anna.absence_reason.as_deref(), Some("visiting the doctor"));
        assert!(texts_to(&log, 17)
            .iter()
            .any(|text| text.contains("visiting the doctor")));

        manager
            .handle_event(InboundEvent::Command(17, Command::MarkPresent))
            .await
            .unwrap();
        let anna = db.find_by_id(17).await.unwrap().unwrap();
        assert_eq!(anna.attendance, AttendanceState::Present);
        assert_eq!(anna.absence_reason, None);
    }

    #[tokio::test]
    async fn test_delete_all_flow() {
        let (mut manager, db, log) = setup().await;

        register_and_approve(&mut manager, &db, 1, "Anna Petrova").await;
        register_and_approve(&mut manager, &db, 2, "Boris Ivanov").await;

        manager
            .handle_event(InboundEvent::Command(MODERATOR, Command::DeleteParticipant))
            .await
            .unwrap();
        manager
            .handle_event(InboundEvent::Text(MODERATOR, "@all".to_string()))
            .await
            .unwrap();

        // Still there until the explicit confirm.
        assert_eq!(db.roster().await.unwrap().len(), 2);
        assert!(log.lock().unwrap().iter().any(|delivery| matches!(
            delivery,
            Delivery::Notify {
                markup: Some(Markup::BulkDeleteConfirm),
                ..
            }
        )));

        manager
            .handle_event(InboundEvent::Action(
                MODERATOR,
                ModeratorAction::ConfirmDeleteAll,
            ))
            .await
            .unwrap();

        assert!(db.roster().await.unwrap().is_empty());
        assert!(db.find_by_id(1).await.unwrap().is_none());
        assert!(db.find_by_id(2).await.unwrap().is_none());
        assert!(db.find_by_id(MODERATOR).await.unwrap().is_some());
        assert!(texts_to(&log, 1).iter().any(|text| text.contains("reset")));
        assert!(texts_to(&log, 2).iter().any(|text| text.contains("reset")));
    }

    #[tokio::test]
    async fn test_delete_all_cancel() {
        let (mut manager, db, _log) = setup().await;

        register_and_approve(&mut manager, &db, 1, "Anna Petrova").await;

        manager
            .handle_event(InboundEvent::Command(MODERATOR, Command::DeleteParticipant))
            .await
            .unwrap();
        manager
            .handle_event(InboundEvent::Text(MODERATOR, "@all".to_string()))
            .await
            .unwrap();
        manager
            .handle_event(InboundEvent::Action(
                MODERATOR,
                ModeratorAction::CancelDeleteAll,
            ))
            .await
            .unwrap();

        assert!(db.find_by_id(1).await.unwrap().is_some());
        assert_eq!(db.roster().await.unwrap().len(), 1);

        // A confirm with no pending prompt does nothing.
        manager
            .handle_event(InboundEvent::Action(
                MODERATOR,
                ModeratorAction::ConfirmDeleteAll,
            ))
            .await
            .unwrap();
        assert!(db.find_by_id(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_by_name() {
        let (mut manager, db, log) = setup().await;

        register_and_approve(&mut manager, &db, 1, "Anna Petrova").await;
        register_and_approve(&mut manager, &db, 2, "Boris Ivanov").await;

        manager
            .handle_event(InboundEvent::Command(MODERATOR, Command::DeleteParticipant))
            .await
            .unwrap();
        manager
            .handle_event(InboundEvent::Text(MODERATOR, "Anna Petrova".to_string()))
            .await
            .unwrap();

        assert!(db.find_by_id(1).await.unwrap().is_none());
        assert_eq!(db.roster().await.unwrap(), vec!["Boris Ivanov"]);
        assert!(texts_to(&log, 1).iter().any(|text| text.contains("removed")));
    }

    #[tokio::test]
    async fn test_set_channel_validation() {
        let (mut manager, db, log) = setup().await;

        manager
            .handle_event(InboundEvent::Command(
                MODERATOR,
                Command::SetChannel("classroom".to_string()),
            ))
            .await
            .unwrap();
        assert_eq!(db.channel("@class").await.unwrap(), "@class");
        assert!(texts_to(&log, MODERATOR)
            .iter()
            .any(|text| text.contains("does not look like")));

        manager
            .handle_event(InboundEvent::Command(
                MODERATOR,
                Command::SetChannel("@new_class".to_string()),
            ))
            .await
            .unwrap();
        assert_eq!(db.channel("@class").await.unwrap(), "@new_class");
        assert_eq!(manager.runtime.channel(), "@new_class");
    }

    #[tokio::test]
    async fn test_reset_roster_restores_alphabetical_order() {
        let (mut manager, db, log) = setup().await;

        db.set_rotation_started(true).await.unwrap();
        db.replace_roster(&["Vera Sidorova".to_string(), "Anna Petrova".to_string()])
            .await
            .unwrap();

        manager
            .handle_event(InboundEvent::Command(MODERATOR, Command::ResetRoster))
            .await
            .unwrap();

        assert_eq!(
            db.roster().await.unwrap(),
            vec!["Anna Petrova", "Vera Sidorova"]
        );
        assert!(!db.rotation_started().await.unwrap());
        assert!(texts_to(&log, MODERATOR)
            .iter()
            .any(|text| text.contains("1. Anna Petrova")));
    }

    #[tokio::test]
    async fn test_moderator_commands_ignored_from_students() {
        let (mut manager, db, _log) = setup().await;

        register_and_approve(&mut manager, &db, 1, "Anna Petrova").await;

        manager
            .handle_event(InboundEvent::Command(1, Command::ResetRoster))
            .await
            .unwrap();
        manager
            .handle_event(InboundEvent::Action(1, ModeratorAction::Decline(1)))
            .await
            .unwrap();

        // Nothing happened.
        assert!(db.find_by_id(1).await.unwrap().is_some());
        assert!(!db.rotation_started().await.unwrap());
    }

    #[tokio::test]
    async fn test_report_duty_requires_registration() {
        let (mut manager, db, log) = setup().await;

        manager
            .handle_event(InboundEvent::Command(17, Command::ReportDuty))
            .await
            .unwrap();
        assert!(texts_to(&log, 17)
            .iter()
            .any(|text| text.contains("not registered")));

        // The moderator never enters the queue, reporting included.
        manager
            .handle_event(InboundEvent::Command(MODERATOR, Command::ReportDuty))
            .await
            .unwrap();
        assert!(db.roster().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_trigger_runs_cycle() {
        let (mut manager, db, log) = setup().await;

        register_and_approve(&mut manager, &db, 1, "Anna Petrova").await;
        manager
            .handle_event(InboundEvent::Command(1, Command::MarkPresent))
            .await
            .unwrap();

        manager
            .handle_event(InboundEvent::Command(MODERATOR, Command::TriggerRotation))
            .await
            .unwrap();

        assert_eq!(
            announcements(&log),
            vec!["Duty for today:\nOn duty: Anna Petrova"]
        );
        assert!(db.roster().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nominate_duty_flow() {
        let (mut manager, db, log) = setup().await;

        register_and_approve(&mut manager, &db, 1, "Anna Petrova").await;

        manager
            .handle_event(InboundEvent::Command(MODERATOR, Command::AddDuty))
            .await
            .unwrap();
        manager
            .handle_event(InboundEvent::Text(MODERATOR, "Anna Petrova".to_string()))
            .await
            .unwrap();
        assert!(texts_to(&log, 1).iter().any(|text| text.contains("nominated")));

        manager
            .handle_event(InboundEvent::Command(MODERATOR, Command::AddDuty))
            .await
            .unwrap();
        manager
            .handle_event(InboundEvent::Text(MODERATOR, "Nobody Known".to_string()))
            .await
            .unwrap();
        assert!(texts_to(&log, MODERATOR)
            .iter()
            .any(|text| text.contains("No such participant")));
    }

    #[tokio::test]
    async fn test_next_duty_annotates_attendance() {
        let (mut manager, db, log) = setup().await;

        register_and_approve(&mut manager, &db, 1, "Anna Petrova").await;
        manager
            .handle_event(InboundEvent::Command(1, Command::MarkPresent))
            .await
            .unwrap();

        manager
            .handle_event(InboundEvent::Command(MODERATOR, Command::NextDuty))
            .await
            .unwrap();
        assert!(texts_to(&log, MODERATOR)
            .iter()
            .any(|text| text.contains("Next in the queue: Anna Petrova (coming)")));
    }
}
