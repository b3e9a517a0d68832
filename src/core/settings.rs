use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Json struct for deployment-wide settings.
///
/// Everything here is supplied at startup and never changes at runtime,
/// except the announcement channel which has a runtime override persisted
/// through the settings store.
#[derive(Serialize, Deserialize, Clone)]
pub struct Settings {
    /// Messaging identity of the moderator account.
    pub moderator_id: i64,

    /// Channel duty announcements are posted to until changed at runtime.
    pub default_channel: String,

    /// Fixed offset from UTC, in hours, of the deployment's local time.
    pub utc_offset_hours: i8,

    /// Local hour of the daily rotation trigger.
    pub trigger_hour: u8,

    /// Local minute of the daily rotation trigger.
    pub trigger_minute: u8,

    /// Days on which duty is assigned, 1 = Monday through 7 = Sunday.
    /// Defaults to Monday through Friday.
    pub duty_weekdays: Option<Vec<u8>>,

    /// Whether an assigning rotation cycle always consumes the queue head,
    /// even when the pick fell on somebody else.
    pub always_advance_head: Option<bool>,

    /// Whether student attendance is wiped back to unknown at the start of
    /// each duty day. Off by default: yesterday's answers carry over.
    pub reset_attendance_daily: Option<bool>,
}

impl Settings {
    /// A starting point for the `create` subcommand, to be edited by hand.
    pub fn template() -> Self {
        Settings {
            moderator_id: 0,
            default_channel: "@class_channel".to_string(),
            utc_offset_hours: 3,
            trigger_hour: 8,
            trigger_minute: 25,
            duty_weekdays: Some(vec![1, 2, 3, 4, 5]),
            always_advance_head: Some(true),
            reset_attendance_daily: Some(false),
        }
    }

    pub fn duty_weekdays(&self) -> Vec<u8> {
        self.duty_weekdays
            .clone()
            .unwrap_or_else(|| vec![1, 2, 3, 4, 5])
    }

    pub fn always_advance_head(&self) -> bool {
        self.always_advance_head.unwrap_or(true)
    }

    pub fn reset_attendance_daily(&self) -> bool {
        self.reset_attendance_daily.unwrap_or(false)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.trigger_hour > 23 {
            bail!("trigger_hour must be between 0 and 23");
        }
        if self.trigger_minute > 59 {
            bail!("trigger_minute must be between 0 and 59");
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            bail!("utc_offset_hours must be between -12 and 14");
        }
        if let Some(days) = &self.duty_weekdays {
            if days.is_empty() {
                bail!("duty_weekdays must name at least one day");
            }
            if days.iter().any(|d| !(1..=7).contains(d)) {
                bail!("duty_weekdays entries must be 1 (Monday) through 7 (Sunday)");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Settings;

    #[test]
    fn test_template_is_valid() {
        assert!(Settings::template().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut settings = Settings::template();
        settings.trigger_hour = 24;
        assert!(settings.validate().is_err());

        let mut settings = Settings::template();
        settings.duty_weekdays = Some(vec![0]);
        assert!(settings.validate().is_err());

        let mut settings = Settings::template();
        settings.duty_weekdays = Some(vec![]);
        assert!(settings.validate().is_err());

        let mut settings = Settings::template();
        settings.utc_offset_hours = 20;
        assert!(settings.validate().is_err());
    }
}
