use crate::models::{AttendanceTier, RosterEntry, StatusClassification, StudentRecord};

pub const HIGH_ATTENDANCE_MIN: i32 = 85;
pub const MEDIUM_ATTENDANCE_MIN: i32 = 75;

pub fn classify_status(record: &StudentRecord) -> StatusClassification {
    match record.attendance_percent {
        None => StatusClassification::Unknown,
        Some(percent) if percent < MEDIUM_ATTENDANCE_MIN => StatusClassification::LowAttendance,
        Some(_) => StatusClassification::Active,
    }
}

/// Tier boundaries are inclusive at the lower end: 85 is high, 75 is medium.
pub fn classify_attendance_tier(percent: i32) -> AttendanceTier {
    match percent {
        p if p >= HIGH_ATTENDANCE_MIN => AttendanceTier::High,
        p if p >= MEDIUM_ATTENDANCE_MIN => AttendanceTier::Medium,
        _ => AttendanceTier::Low,
    }
}

/// Recomputed on every read; never cached alongside the record.
pub fn classify(record: StudentRecord) -> RosterEntry {
    let status = classify_status(&record);
    let tier = record.attendance_percent.map(classify_attendance_tier);
    RosterEntry {
        record,
        status,
        tier,
    }
}

pub fn needs_attendance_alert(entry: &RosterEntry) -> bool {
    entry.status == StatusClassification::LowAttendance
}
