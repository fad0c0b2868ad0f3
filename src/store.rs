use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use uuid::Uuid;

use crate::error::{RosterError, RosterResult};
use crate::models::StudentRecord;

#[derive(Debug)]
struct Slot {
    record: StudentRecord,
    revision: u64,
}

#[derive(Debug, Default)]
struct Inner {
    order: Vec<Uuid>,
    slots: HashMap<Uuid, Arc<Mutex<Slot>>>,
    registrations: HashMap<String, Uuid>,
}

impl Inner {
    fn slot(&self, student_id: Uuid) -> RosterResult<&Arc<Mutex<Slot>>> {
        self.slots
            .get(&student_id)
            .ok_or(RosterError::NotFound { student_id })
    }
}

/// Canonical student records.
///
/// Membership changes (insert, remove, registration re-keying) take the outer
/// write lock. Per-student mutations only hold the outer read lock plus that
/// student's own mutex, so writers on different students do not contend.
#[derive(Debug, Default)]
pub struct StudentStore {
    inner: RwLock<Inner>,
}

/// Point-in-time copy of the store, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    records: Vec<StudentRecord>,
    index: HashMap<Uuid, usize>,
}

impl StoreSnapshot {
    pub fn records(&self) -> &[StudentRecord] {
        &self.records
    }

    pub fn get(&self, student_id: Uuid) -> Option<&StudentRecord> {
        self.index.get(&student_id).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, student_id: Uuid) -> bool {
        self.index.contains_key(&student_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn registration_key(registration_number: &str) -> String {
    registration_number.trim().to_ascii_uppercase()
}

pub fn validate_record(record: &StudentRecord) -> RosterResult<()> {
    if record.full_name.trim().is_empty() {
        return Err(RosterError::validation("full_name", "must not be empty"));
    }
    if record.registration_number.trim().is_empty() {
        return Err(RosterError::validation(
            "registration_number",
            "must not be empty",
        ));
    }
    if record.cohort.trim().is_empty() {
        return Err(RosterError::validation("cohort", "must not be empty"));
    }
    if let Some(percent) = record.attendance_percent {
        if !(0..=100).contains(&percent) {
            return Err(RosterError::validation(
                "attendance_percent",
                format!("{percent} is outside 0..=100"),
            ));
        }
    }
    if record.unread_message_count < 0 {
        return Err(RosterError::validation(
            "unread_message_count",
            format!("{} is negative", record.unread_message_count),
        ));
    }
    Ok(())
}

impl StudentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces by `student_id`, returning the stored revision.
    pub fn upsert(&self, record: StudentRecord) -> RosterResult<u64> {
        if let Err(err) = validate_record(&record) {
            tracing::warn!(student_id = %record.student_id, error = %err, "rejected upsert");
            return Err(err);
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let student_id = record.student_id;
        let key = registration_key(&record.registration_number);

        if let Some(owner) = inner.registrations.get(&key) {
            if *owner != student_id {
                return Err(RosterError::validation(
                    "registration_number",
                    format!(
                        "{} already belongs to student {owner}",
                        record.registration_number
                    ),
                ));
            }
        }

        let revision = match inner.slots.get(&student_id).cloned() {
            Some(slot) => {
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                let previous_key = registration_key(&slot.record.registration_number);
                if previous_key != key {
                    inner.registrations.remove(&previous_key);
                    inner.registrations.insert(key, student_id);
                }
                slot.record = record;
                slot.revision += 1;
                slot.revision
            }
            None => {
                inner.order.push(student_id);
                inner.registrations.insert(key, student_id);
                inner
                    .slots
                    .insert(student_id, Arc::new(Mutex::new(Slot { record, revision: 1 })));
                1
            }
        };

        tracing::debug!(%student_id, revision, "student upserted");
        Ok(revision)
    }

    pub fn get(&self, student_id: Uuid) -> RosterResult<StudentRecord> {
        self.get_with_revision(student_id).map(|(record, _)| record)
    }

    pub fn get_with_revision(&self, student_id: Uuid) -> RosterResult<(StudentRecord, u64)> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let slot = inner
            .slot(student_id)?
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok((slot.record.clone(), slot.revision))
    }

    /// Records of one cohort in insertion order.
    pub fn list_by_cohort(&self, cohort: &str) -> Vec<StudentRecord> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .order
            .iter()
            .filter_map(|id| inner.slots.get(id))
            .filter_map(|slot| {
                let slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.record.cohort == cohort {
                    Some(slot.record.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Applies `delta` to the unread counter, clamping at zero. Returns the new count.
    pub fn adjust_unread_count(&self, student_id: Uuid, delta: i32) -> RosterResult<i32> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut slot = inner
            .slot(student_id)?
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let next = (i64::from(slot.record.unread_message_count) + i64::from(delta))
            .clamp(0, i64::from(i32::MAX));
        slot.record.unread_message_count = i32::try_from(next).unwrap_or(i32::MAX);
        slot.revision += 1;

        tracing::debug!(%student_id, delta, unread = slot.record.unread_message_count, "unread count adjusted");
        Ok(slot.record.unread_message_count)
    }

    /// Moves a student to another cohort if nobody has written since `expected_revision`.
    pub fn reassign_cohort(
        &self,
        student_id: Uuid,
        expected_revision: u64,
        cohort: &str,
    ) -> RosterResult<u64> {
        if cohort.trim().is_empty() {
            return Err(RosterError::validation("cohort", "must not be empty"));
        }

        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut slot = inner
            .slot(student_id)?
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if slot.revision != expected_revision {
            tracing::warn!(%student_id, expected_revision, actual = slot.revision, "stale cohort reassignment");
            return Err(RosterError::Conflict {
                student_id,
                message: format!(
                    "expected revision {expected_revision}, found {}",
                    slot.revision
                ),
            });
        }

        slot.record.cohort = cohort.to_string();
        slot.revision += 1;
        Ok(slot.revision)
    }

    pub fn remove(&self, student_id: Uuid) -> RosterResult<StudentRecord> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let slot = inner
            .slots
            .remove(&student_id)
            .ok_or(RosterError::NotFound { student_id })?;
        inner.order.retain(|id| *id != student_id);

        let record = slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record
            .clone();
        inner
            .registrations
            .remove(&registration_key(&record.registration_number));

        tracing::debug!(%student_id, "student removed");
        Ok(record)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut records = Vec::with_capacity(inner.order.len());
        let mut index = HashMap::with_capacity(inner.order.len());

        for id in &inner.order {
            if let Some(slot) = inner.slots.get(id) {
                let slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                index.insert(*id, records.len());
                records.push(slot.record.clone());
            }
        }

        StoreSnapshot { records, index }
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
