use std::{sync::Arc, time::Duration};

use time::{Date, OffsetDateTime, UtcOffset, Weekday};
use tokio::time::sleep;

use crate::{
    core::{
        runtime::RuntimeState,
        settings::Settings,
        workflow::{DutyActor, DutyRequest, RotationTrigger},
    },
    send_message,
};

const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// After a trigger fires, sleep through the rest of the minute so the same
/// trigger cannot fire twice.
const POST_TRIGGER_SLEEP: Duration = Duration::from_secs(60);

/// True when `weekday` is one of the configured duty days.
pub fn is_duty_day(weekday: Weekday, duty_days: &[u8]) -> bool {
    duty_days.contains(&weekday.number_from_monday())
}

/// True when local time has reached the trigger minute.
pub fn is_due(now: OffsetDateTime, hour: u8, minute: u8) -> bool {
    now.hour() == hour && now.minute() == minute
}

/// Background loop that fires the rotation once per eligible day at the
/// configured local time. Days outside the mask are skipped outright, with
/// no catch-up, and an inactive service skips the trigger silently.
pub async fn run_scheduler(
    settings: Arc<Settings>,
    runtime: Arc<RuntimeState>,
    duty: DutyActor,
) -> anyhow::Result<()> {
    let offset = UtcOffset::from_hms(settings.utc_offset_hours, 0, 0)?;
    let duty_days = settings.duty_weekdays();
    let mut last_reset: Option<Date> = None;

    log::debug!(
        "Started duty scheduler, trigger at {:02}:{:02} local (UTC{:+})",
        settings.trigger_hour,
        settings.trigger_minute,
        settings.utc_offset_hours
    );

    loop {
        if runtime.is_active() {
            let now = OffsetDateTime::now_utc().to_offset(offset);
            if is_duty_day(now.weekday(), &duty_days) {
                if settings.reset_attendance_daily() && last_reset != Some(now.date()) {
                    last_reset = Some(now.date());
                    log::info!("New duty day {}, resetting attendance", now.date());
                    if let Err(err) = send_message!(duty, DutyRequest, ResetAttendance) {
                        log::error!("Attendance reset failed: {}", err);
                    }
                }

                if is_due(now, settings.trigger_hour, settings.trigger_minute) {
                    log::info!(
                        "Daily duty trigger at {:02}:{:02}",
                        now.hour(),
                        now.minute()
                    );
                    if let Err(err) =
                        send_message!(duty, DutyRequest, RunRotation, RotationTrigger::Scheduled)
                    {
                        log::error!("Scheduled rotation failed: {}", err);
                    }
                    sleep(POST_TRIGGER_SLEEP).await;
                    continue;
                }
            }
        }

        sleep(POLL_INTERVAL).await;
    }
}
