use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RosterError, RosterResult};
use crate::models::{
    AttendanceTier, CohortId, RosterEntry, RosterSummary, StatusClassification, StudentRecord,
};
use crate::risk;
use crate::session::{require, Action, Scope, SessionIdentity};
use crate::store::StoreSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterFilter {
    Cohort(CohortId),
    Status(StatusClassification),
    Tier(AttendanceTier),
    HasUnreadMessages,
}

impl RosterFilter {
    fn matches(&self, entry: &RosterEntry) -> bool {
        match self {
            RosterFilter::Cohort(cohort) => entry.record.cohort == *cohort,
            RosterFilter::Status(status) => entry.status == *status,
            RosterFilter::Tier(tier) => entry.tier == Some(*tier),
            RosterFilter::HasUnreadMessages => entry.record.unread_message_count > 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    FullName,
    RegistrationNumber,
    Attendance,
    LastActive,
    UnreadMessages,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: SortField::FullName,
            direction: SortDirection::Ascending,
        }
    }
}

/// Built once per call; the builder methods consume and return a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterQuery {
    search_text: String,
    filters: Vec<RosterFilter>,
    sort: Option<SortSpec>,
}

impl RosterQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search_text = text.into();
        self
    }

    pub fn filter(mut self, filter: RosterFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort_by(mut self, field: SortField, direction: SortDirection) -> Self {
        self.sort = Some(SortSpec { field, direction });
        self
    }

    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    pub fn filters(&self) -> &[RosterFilter] {
        &self.filters
    }

    pub fn sort(&self) -> SortSpec {
        self.sort.unwrap_or_default()
    }

    fn scopes(&self) -> Vec<Scope> {
        let cohorts: Vec<Scope> = self
            .filters
            .iter()
            .filter_map(|filter| match filter {
                RosterFilter::Cohort(cohort) => Some(Scope::Cohort(cohort.clone())),
                _ => None,
            })
            .collect();
        if cohorts.is_empty() {
            vec![Scope::Assigned]
        } else {
            cohorts
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

fn matches_search(record: &StudentRecord, needle: &str) -> bool {
    needle.is_empty()
        || contains_ignore_case(&record.full_name, needle)
        || contains_ignore_case(&record.registration_number, needle)
}

fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Name ascending (case-insensitive), then registration number.
fn default_order(a: &StudentRecord, b: &StudentRecord) -> Ordering {
    cmp_ignore_case(&a.full_name, &b.full_name)
        .then_with(|| a.registration_number.cmp(&b.registration_number))
}

/// Missing metrics go last whichever way the column is sorted.
fn cmp_missing_last<T: Ord>(a: Option<T>, b: Option<T>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => direction.apply(a.cmp(&b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_records(a: &StudentRecord, b: &StudentRecord, sort: SortSpec) -> Ordering {
    let primary = match sort.field {
        SortField::FullName => sort.direction.apply(default_order(a, b)),
        SortField::RegistrationNumber => sort
            .direction
            .apply(a.registration_number.cmp(&b.registration_number)),
        SortField::Attendance => {
            cmp_missing_last(a.attendance_percent, b.attendance_percent, sort.direction)
        }
        SortField::LastActive => cmp_missing_last(a.last_active_at, b.last_active_at, sort.direction),
        SortField::UnreadMessages => sort
            .direction
            .apply(a.unread_message_count.cmp(&b.unread_message_count)),
    };
    primary.then_with(|| default_order(a, b))
}

/// Produces the session's classified, filtered and ordered roster.
pub fn query(
    snapshot: &StoreSnapshot,
    roster_query: &RosterQuery,
    session: &SessionIdentity,
) -> RosterResult<Vec<RosterEntry>> {
    for scope in roster_query.scopes() {
        require(session, Action::ViewRoster, &scope)?;
    }

    let text = roster_query.search_text.as_str();
    let needle = if text.trim().is_empty() {
        String::new()
    } else {
        text.to_lowercase()
    };
    let mut entries: Vec<RosterEntry> = snapshot
        .records()
        .iter()
        .filter(|record| session.covers_cohort(&record.cohort))
        .filter(|record| matches_search(record, &needle))
        .map(|record| risk::classify(record.clone()))
        .filter(|entry| roster_query.filters.iter().all(|f| f.matches(entry)))
        .collect();

    let sort = roster_query.sort();
    entries.sort_by(|a, b| compare_records(&a.record, &b.record, sort));

    tracing::debug!(
        actor_id = %session.actor_id,
        matched = entries.len(),
        search = %needle,
        "roster query"
    );
    Ok(entries)
}

/// Resolves a student and checks `action` against the student's own scope.
pub fn authorize_student<'a>(
    snapshot: &'a StoreSnapshot,
    session: &SessionIdentity,
    action: Action,
    student_id: Uuid,
) -> RosterResult<&'a StudentRecord> {
    let record = snapshot
        .get(student_id)
        .ok_or(RosterError::NotFound { student_id })?;
    let scope = Scope::Student {
        student_id,
        cohort: record.cohort.clone(),
    };
    require(session, action, &scope)?;
    Ok(record)
}

pub fn student_detail(
    snapshot: &StoreSnapshot,
    session: &SessionIdentity,
    student_id: Uuid,
) -> RosterResult<RosterEntry> {
    let record = authorize_student(snapshot, session, Action::ViewStudentDetail, student_id)?;
    Ok(risk::classify(record.clone()))
}

/// Dashboard badge counts over everything the session may see.
pub fn summarize(snapshot: &StoreSnapshot, session: &SessionIdentity) -> RosterResult<RosterSummary> {
    let entries = query(snapshot, &RosterQuery::new(), session)?;
    Ok(summarize_entries(&entries))
}

pub fn summarize_entries(entries: &[RosterEntry]) -> RosterSummary {
    let mut summary = RosterSummary {
        assigned_students: entries.len(),
        ..RosterSummary::default()
    };

    for entry in entries {
        summary.unread_messages += i64::from(entry.record.unread_message_count);
        if risk::needs_attendance_alert(entry) {
            summary.low_attendance_alerts += 1;
        }
        if entry.status == StatusClassification::Unknown {
            summary.unknown_status += 1;
        }
    }

    summary
}
