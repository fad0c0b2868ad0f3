use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::feed;
use crate::models::{FeedItem, RosterEntry, RosterSummary};

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

pub fn last_active_label(now: DateTime<Utc>, last_active_at: Option<DateTime<Utc>>) -> String {
    let Some(last_active_at) = last_active_at else {
        return "never".to_string();
    };

    let elapsed = now - last_active_at;
    if elapsed.num_minutes() < 1 {
        "just now".to_string()
    } else if elapsed.num_hours() < 1 {
        plural(elapsed.num_minutes(), "minute")
    } else if elapsed.num_days() < 1 {
        plural(elapsed.num_hours(), "hour")
    } else {
        plural(elapsed.num_days(), "day")
    }
}

fn attendance_cell(entry: &RosterEntry) -> String {
    match (entry.record.attendance_percent, entry.tier) {
        (Some(percent), Some(tier)) => format!("{percent}% ({})", tier.label()),
        _ => "no sample".to_string(),
    }
}

pub fn build_report(
    scope_label: &str,
    now: DateTime<Utc>,
    summary: &RosterSummary,
    entries: &[RosterEntry],
    activity: &[FeedItem],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Proctor Roster Report");
    let _ = writeln!(
        output,
        "Generated for {} at {}",
        scope_label,
        now.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Assigned students: {}", summary.assigned_students);
    let _ = writeln!(output, "- Unread messages: {}", summary.unread_messages);
    let _ = writeln!(
        output,
        "- Low attendance alerts: {}",
        summary.low_attendance_alerts
    );
    if summary.unknown_status > 0 {
        let _ = writeln!(
            output,
            "- Awaiting first attendance sample: {}",
            summary.unknown_status
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students");

    if entries.is_empty() {
        let _ = writeln!(output, "No students on this roster.");
    } else {
        let _ = writeln!(
            output,
            "| Name | USN | Cohort | Attendance | Status | Unread | Last active |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|---|");
        for entry in entries {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} | {} |",
                entry.record.full_name,
                entry.record.registration_number,
                entry.record.cohort,
                attendance_cell(entry),
                entry.status.label(),
                entry.record.unread_message_count,
                last_active_label(now, entry.record.last_active_at)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Activity");

    if activity.is_empty() {
        let _ = writeln!(output, "No activity recorded.");
    } else {
        for summary in feed::summarize_by_kind(activity) {
            let _ = writeln!(
                output,
                "- {}: {} (latest {})",
                summary.kind.as_str(),
                summary.count,
                last_active_label(now, Some(summary.latest_at))
            );
        }
        let _ = writeln!(output);
        for item in activity {
            let marker = if item.orphaned { " (student removed)" } else { "" };
            let _ = writeln!(
                output,
                "- [{}] {}, {}{}",
                item.event.kind.as_str(),
                item.event.summary_text,
                last_active_label(now, Some(item.event.occurred_at)),
                marker
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityEvent, ActivityKind, StudentRecord};
    use crate::risk;
    use chrono::Duration;
    use uuid::Uuid;

    #[test]
    fn labels_follow_elapsed_time() {
        let now = Utc::now();
        assert_eq!(last_active_label(now, None), "never");
        assert_eq!(last_active_label(now, Some(now - Duration::seconds(20))), "just now");
        assert_eq!(last_active_label(now, Some(now - Duration::minutes(1))), "1 minute ago");
        assert_eq!(last_active_label(now, Some(now - Duration::hours(2))), "2 hours ago");
        assert_eq!(last_active_label(now, Some(now - Duration::hours(26))), "1 day ago");
        assert_eq!(last_active_label(now, Some(now - Duration::days(3))), "3 days ago");
        assert_eq!(last_active_label(now, Some(now + Duration::hours(1))), "just now");
    }

    #[test]
    fn report_lists_students_and_activity() {
        let now = Utc::now();
        let entry = risk::classify(StudentRecord {
            student_id: Uuid::new_v4(),
            full_name: "Arjun Patel".to_string(),
            registration_number: "MS22CSE003".to_string(),
            cohort: "SEM-06-C".to_string(),
            program: "B.E-CS".to_string(),
            attendance_percent: Some(67),
            last_active_at: Some(now - Duration::days(3)),
            unread_message_count: 1,
        });
        let summary = RosterSummary {
            assigned_students: 1,
            unread_messages: 1,
            low_attendance_alerts: 1,
            unknown_status: 0,
        };
        let activity = vec![FeedItem {
            event: ActivityEvent {
                event_id: 1,
                kind: ActivityKind::Message,
                subject_student_id: Some(entry.record.student_id),
                cohort: None,
                summary_text: "New query from Arjun Patel".to_string(),
                occurred_at: now - Duration::hours(2),
            },
            orphaned: false,
        }];

        let report = build_report("SEM-06-C", now, &summary, &[entry], &activity);
        assert!(report.contains("- Low attendance alerts: 1"));
        assert!(report.contains(
            "| Arjun Patel | MS22CSE003 | SEM-06-C | 67% (low) | Low Attendance | 1 | 3 days ago |"
        ));
        assert!(report.contains("- [message] New query from Arjun Patel, 2 hours ago"));
        assert!(!report.contains("Awaiting first attendance sample"));
    }

    #[test]
    fn empty_report_says_so() {
        let report = build_report("SEM-06-D", Utc::now(), &RosterSummary::default(), &[], &[]);
        assert!(report.contains("No students on this roster."));
        assert!(report.contains("No activity recorded."));
    }
}
