use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{PoisonError, RwLock};

use uuid::Uuid;

use crate::error::{RosterError, RosterResult};
use crate::models::{ActivityEvent, ActivityKind, CohortId, FeedItem, KindSummary};
use crate::session::{Role, SessionIdentity};
use crate::store::StoreSnapshot;

#[derive(Debug, Default)]
struct LogInner {
    events: Vec<ActivityEvent>,
    ids: HashSet<i64>,
}

/// Append-only event log backing the dashboard feed.
#[derive(Debug, Default)]
pub struct ActivityLog {
    inner: RwLock<LogInner>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, event: ActivityEvent) -> RosterResult<()> {
        if event.summary_text.trim().is_empty() {
            return Err(RosterError::validation("summary_text", "must not be empty"));
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !inner.ids.insert(event.event_id) {
            return Err(RosterError::validation(
                "event_id",
                format!("event {} already recorded", event.event_id),
            ));
        }
        tracing::debug!(event_id = event.event_id, kind = event.kind.as_str(), "activity appended");
        inner.events.push(event);
        Ok(())
    }

    /// Appends after stamping the subject's cohort onto the event, so the
    /// event stays visible to that cohort once the student is removed.
    pub fn record(&self, event: ActivityEvent, students: &StoreSnapshot) -> RosterResult<()> {
        self.append(attribute_cohort(event, students))
    }

    pub fn events(&self) -> Vec<ActivityEvent> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fills a missing `cohort` from the subject student, when that student exists.
pub fn attribute_cohort(mut event: ActivityEvent, students: &StoreSnapshot) -> ActivityEvent {
    if event.cohort.is_none() {
        event.cohort = event
            .subject_student_id
            .and_then(|id| students.get(id))
            .map(|record| record.cohort.clone());
    }
    event
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedScope {
    All,
    Student(Uuid),
    Cohort(CohortId),
    /// Events tied to any of these cohorts, plus broadcasts tied to none.
    Assigned(BTreeSet<CohortId>),
}

impl FeedScope {
    pub fn for_session(session: &SessionIdentity) -> Self {
        match session.role {
            Role::Admin => FeedScope::All,
            Role::Proctor => FeedScope::Assigned(session.assigned_cohorts.clone()),
            Role::Student => match Uuid::parse_str(&session.actor_id) {
                Ok(student_id) => FeedScope::Student(student_id),
                Err(_) => FeedScope::Assigned(BTreeSet::new()),
            },
        }
    }

    fn matches(&self, event: &ActivityEvent, students: &StoreSnapshot) -> bool {
        let cohort = event.cohort.as_deref().or_else(|| {
            event
                .subject_student_id
                .and_then(|id| students.get(id))
                .map(|record| record.cohort.as_str())
        });

        match self {
            FeedScope::All => true,
            FeedScope::Student(student_id) => event.subject_student_id == Some(*student_id),
            FeedScope::Cohort(wanted) => cohort == Some(wanted.as_str()),
            FeedScope::Assigned(cohorts) => match cohort {
                Some(cohort) => cohorts.contains(cohort),
                None => event.subject_student_id.is_none(),
            },
        }
    }
}

/// Newest first; same-instant events fall back to ascending event id.
fn feed_order(event: &ActivityEvent) -> (Reverse<chrono::DateTime<chrono::Utc>>, i64) {
    (Reverse(event.occurred_at), event.event_id)
}

/// At most `limit` events in feed order. Every call re-reads the log.
pub fn recent_activity<'a>(
    log: &ActivityLog,
    students: &'a StoreSnapshot,
    scope: &FeedScope,
    limit: usize,
) -> impl Iterator<Item = FeedItem> + 'a {
    let mut events: Vec<ActivityEvent> = log
        .events()
        .into_iter()
        .filter(|event| scope.matches(event, students))
        .collect();
    events.sort_by_key(feed_order);

    events.into_iter().take(limit).map(move |event| {
        let orphaned = event
            .subject_student_id
            .is_some_and(|id| !students.contains(id));
        FeedItem { event, orphaned }
    })
}

pub fn summarize_by_kind(items: &[FeedItem]) -> Vec<KindSummary> {
    let mut map: BTreeMap<ActivityKind, KindSummary> = BTreeMap::new();

    for item in items {
        let event = &item.event;
        map.entry(event.kind)
            .and_modify(|summary| {
                summary.count += 1;
                summary.latest_at = summary.latest_at.max(event.occurred_at);
            })
            .or_insert(KindSummary {
                kind: event.kind,
                count: 1,
                latest_at: event.occurred_at,
            });
    }

    let mut summaries: Vec<KindSummary> = map.into_values().collect();
    summaries.sort_by(|a, b| b.count.cmp(&a.count).then(a.kind.cmp(&b.kind)));
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StudentRecord;
    use crate::store::StudentStore;
    use chrono::{Duration, TimeZone, Utc};

    fn sample_event(
        event_id: i64,
        kind: ActivityKind,
        occurred_at: chrono::DateTime<Utc>,
        subject: Option<Uuid>,
    ) -> ActivityEvent {
        ActivityEvent {
            event_id,
            kind,
            subject_student_id: subject,
            cohort: None,
            summary_text: format!("{} #{event_id}", kind.as_str()),
            occurred_at,
        }
    }

    fn sample_record(cohort: &str, usn: &str) -> StudentRecord {
        StudentRecord {
            student_id: Uuid::new_v4(),
            full_name: "Rajesh Kumar".to_string(),
            registration_number: usn.to_string(),
            cohort: cohort.to_string(),
            program: "B.E-CS".to_string(),
            attendance_percent: Some(85),
            last_active_at: None,
            unread_message_count: 2,
        }
    }

    fn ids(items: &[FeedItem]) -> Vec<i64> {
        items.iter().map(|item| item.event.event_id).collect()
    }

    #[test]
    fn same_timestamp_orders_by_event_id() {
        let t = Utc.with_ymd_and_hms(2026, 2, 2, 10, 0, 0).unwrap();
        let log = ActivityLog::new();
        log.append(sample_event(2, ActivityKind::Message, t, None)).unwrap();
        log.append(sample_event(1, ActivityKind::Announcement, t, None)).unwrap();
        log.append(sample_event(3, ActivityKind::ResourceUpload, t - Duration::seconds(1), None))
            .unwrap();

        let snapshot = StoreSnapshot::default();
        let items: Vec<FeedItem> = recent_activity(&log, &snapshot, &FeedScope::All, 10).collect();
        assert_eq!(ids(&items), vec![1, 2, 3]);

        let again: Vec<FeedItem> = recent_activity(&log, &snapshot, &FeedScope::All, 10).collect();
        assert_eq!(items, again);
    }

    #[test]
    fn limit_caps_output() {
        let t = Utc.with_ymd_and_hms(2026, 2, 2, 10, 0, 0).unwrap();
        let log = ActivityLog::new();
        for id in 1..=6 {
            log.append(sample_event(id, ActivityKind::Message, t + Duration::minutes(id), None))
                .unwrap();
        }

        let snapshot = StoreSnapshot::default();
        let items: Vec<FeedItem> = recent_activity(&log, &snapshot, &FeedScope::All, 3).collect();
        assert_eq!(ids(&items), vec![6, 5, 4]);
        assert_eq!(recent_activity(&log, &snapshot, &FeedScope::All, 0).count(), 0);
    }

    #[test]
    fn removed_subjects_are_flagged_orphaned() {
        let store = StudentStore::new();
        let kept = sample_record("SEM-06-C", "MS22CSE001");
        let gone = sample_record("SEM-06-C", "MS22CSE002");
        store.upsert(kept.clone()).unwrap();
        store.upsert(gone.clone()).unwrap();
        store.remove(gone.student_id).unwrap();

        let t = Utc::now();
        let log = ActivityLog::new();
        log.append(sample_event(1, ActivityKind::Message, t, Some(kept.student_id)))
            .unwrap();
        log.append(sample_event(2, ActivityKind::Message, t, Some(gone.student_id)))
            .unwrap();

        let snapshot = store.snapshot();
        let items: Vec<FeedItem> = recent_activity(&log, &snapshot, &FeedScope::All, 10).collect();
        assert_eq!(items.len(), 2);
        assert!(!items[0].orphaned);
        assert!(items[1].orphaned);
    }

    #[test]
    fn scopes_select_student_and_cohort_events() {
        let store = StudentStore::new();
        let ours = sample_record("SEM-06-C", "MS22CSE001");
        let theirs = sample_record("SEM-06-D", "MS22CSE101");
        store.upsert(ours.clone()).unwrap();
        store.upsert(theirs.clone()).unwrap();

        let t = Utc::now();
        let log = ActivityLog::new();
        log.append(sample_event(1, ActivityKind::Message, t, Some(ours.student_id)))
            .unwrap();
        log.append(sample_event(2, ActivityKind::Message, t, Some(theirs.student_id)))
            .unwrap();
        let mut section = sample_event(3, ActivityKind::AttendanceUpdate, t, None);
        section.cohort = Some("SEM-06-C".to_string());
        log.append(section).unwrap();
        log.append(sample_event(4, ActivityKind::Announcement, t, None)).unwrap();

        let snapshot = store.snapshot();
        let collect = |scope: FeedScope| -> Vec<i64> {
            recent_activity(&log, &snapshot, &scope, 10)
                .map(|item| item.event.event_id)
                .collect()
        };

        assert_eq!(collect(FeedScope::Student(ours.student_id)), vec![1]);
        assert_eq!(collect(FeedScope::Cohort("SEM-06-C".to_string())), vec![1, 3]);

        let proctor = SessionIdentity::new("proctor", Role::Proctor, ["SEM-06-C"]);
        assert_eq!(collect(FeedScope::for_session(&proctor)), vec![1, 3, 4]);
    }

    #[test]
    fn proctor_still_sees_orphaned_events_for_their_cohort() {
        let store = StudentStore::new();
        let student = sample_record("SEM-06-C", "MS22CSE001");
        store.upsert(student.clone()).unwrap();

        let log = ActivityLog::new();
        log.record(
            sample_event(1, ActivityKind::Message, Utc::now(), Some(student.student_id)),
            &store.snapshot(),
        )
        .unwrap();
        assert_eq!(log.events()[0].cohort.as_deref(), Some("SEM-06-C"));

        store.remove(student.student_id).unwrap();
        let snapshot = store.snapshot();
        let proctor = SessionIdentity::new("proctor", Role::Proctor, ["SEM-06-C"]);

        for scope in [
            FeedScope::for_session(&proctor),
            FeedScope::Cohort("SEM-06-C".to_string()),
        ] {
            let items: Vec<FeedItem> = recent_activity(&log, &snapshot, &scope, 10).collect();
            assert_eq!(ids(&items), vec![1], "scope {scope:?}");
            assert!(items[0].orphaned);
        }
    }

    #[test]
    fn attribution_keeps_explicit_cohort() {
        let store = StudentStore::new();
        let student = sample_record("SEM-06-C", "MS22CSE001");
        store.upsert(student.clone()).unwrap();

        let mut event = sample_event(1, ActivityKind::AttendanceUpdate, Utc::now(), Some(student.student_id));
        event.cohort = Some("SEM-06-D".to_string());
        let event = attribute_cohort(event, &store.snapshot());
        assert_eq!(event.cohort.as_deref(), Some("SEM-06-D"));

        let unknown = sample_event(2, ActivityKind::Message, Utc::now(), Some(Uuid::new_v4()));
        assert_eq!(attribute_cohort(unknown, &store.snapshot()).cohort, None);
    }

    #[test]
    fn duplicate_event_ids_are_rejected() {
        let log = ActivityLog::new();
        let event = sample_event(7, ActivityKind::ResourceUpload, Utc::now(), None);
        log.append(event.clone()).unwrap();

        let err = log.append(event).unwrap_err();
        assert!(matches!(err, RosterError::Validation { field: "event_id", .. }));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn kind_summary_counts_and_tracks_latest() {
        let t = Utc.with_ymd_and_hms(2026, 2, 2, 10, 0, 0).unwrap();
        let items: Vec<FeedItem> = [
            sample_event(1, ActivityKind::Message, t, None),
            sample_event(2, ActivityKind::Message, t + Duration::hours(1), None),
            sample_event(3, ActivityKind::Announcement, t, None),
        ]
        .into_iter()
        .map(|event| FeedItem {
            event,
            orphaned: false,
        })
        .collect();

        let summaries = summarize_by_kind(&items);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].kind, ActivityKind::Message);
        assert_eq!(summaries[0].count, 2);
        assert_eq!(summaries[0].latest_at, t + Duration::hours(1));
        assert_eq!(summaries[1].kind, ActivityKind::Announcement);
    }
}
