use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type CohortId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub student_id: Uuid,
    pub full_name: String,
    pub registration_number: String,
    pub cohort: CohortId,
    pub program: String,
    /// `None` until the first attendance sample is recorded.
    pub attendance_percent: Option<i32>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub unread_message_count: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClassification {
    Active,
    LowAttendance,
    Unknown,
}

impl StatusClassification {
    pub fn label(self) -> &'static str {
        match self {
            StatusClassification::Active => "Active",
            StatusClassification::LowAttendance => "Low Attendance",
            StatusClassification::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceTier {
    High,
    Medium,
    Low,
}

impl AttendanceTier {
    pub fn label(self) -> &'static str {
        match self {
            AttendanceTier::High => "high",
            AttendanceTier::Medium => "medium",
            AttendanceTier::Low => "low",
        }
    }
}

/// A classified roster row handed to presentation code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    pub record: StudentRecord,
    pub status: StatusClassification,
    pub tier: Option<AttendanceTier>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RosterSummary {
    pub assigned_students: usize,
    pub unread_messages: i64,
    pub low_attendance_alerts: usize,
    pub unknown_status: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Message,
    AttendanceUpdate,
    Announcement,
    ResourceUpload,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Message => "message",
            ActivityKind::AttendanceUpdate => "attendance_update",
            ActivityKind::Announcement => "announcement",
            ActivityKind::ResourceUpload => "resource_upload",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "message" => Some(ActivityKind::Message),
            "attendance_update" | "attendance" => Some(ActivityKind::AttendanceUpdate),
            "announcement" => Some(ActivityKind::Announcement),
            "resource_upload" | "resource" => Some(ActivityKind::ResourceUpload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub event_id: i64,
    pub kind: ActivityKind,
    pub subject_student_id: Option<Uuid>,
    /// Cohort-wide events (e.g. an attendance refresh for a section) name it here.
    pub cohort: Option<CohortId>,
    pub summary_text: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedItem {
    pub event: ActivityEvent,
    /// The subject student no longer exists in the store.
    pub orphaned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub kind: ActivityKind,
    pub count: usize,
    pub latest_at: DateTime<Utc>,
}
