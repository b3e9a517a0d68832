use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// Account role within the deployment. Exactly one moderator exists, it is
/// provisioned at startup and never enters the duty roster.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Moderator,
    Student,
}

/// Where a registration stands. Declined applications are deleted outright,
/// so `Rejected` never survives a restart.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

/// Today's attendance answer.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AttendanceState {
    Unknown,
    Present,
    Absent,
}

/// A registered person, moderator or student.
#[derive(PartialEq, Eq, Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Participant {
    /// Stable identity assigned by the messaging layer.
    pub id: i64,

    /// Display name, unique across pending and approved participants.
    pub name: String,

    pub role: Role,

    pub approval: ApprovalState,

    pub attendance: AttendanceState,

    /// Free-text reason, present only while marked absent.
    pub absence_reason: Option<String>,
}

impl Participant {
    pub fn is_approved(&self) -> bool {
        self.approval == ApprovalState::Approved
    }

    /// One line of the class attendance report.
    pub fn attendance_line(&self) -> String {
        match (self.attendance, self.absence_reason.as_deref()) {
            (AttendanceState::Present, _) => format!("{} - coming", self.name),
            (AttendanceState::Absent, Some(reason)) => {
                format!("{} - not coming ({})", self.name, reason)
            }
            (AttendanceState::Absent, None) => format!("{} - not coming", self.name),
            (AttendanceState::Unknown, _) => format!("{} - no answer", self.name),
        }
    }

    /// Short attendance annotation for the queue preview.
    pub fn attendance_label(&self) -> &'static str {
        match self.attendance {
            AttendanceState::Present => "coming",
            AttendanceState::Absent => "not coming",
            AttendanceState::Unknown => "no answer",
        }
    }
}

/// Checks that a submitted name is exactly two letters-only words.
/// The capitalization check is case-insensitive, matching how people type.
pub fn is_valid_full_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"(?i)^\p{Lu}\p{L}+ \p{Lu}\p{L}+$").expect("valid pattern"));
    pattern.is_match(name)
}
