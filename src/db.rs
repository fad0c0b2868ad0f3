use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use proctor_roster::feed::{self, ActivityLog};
use proctor_roster::RosterError;
use proctor_roster::models::{ActivityEvent, ActivityKind, StudentRecord};
use proctor_roster::session::{Role, SessionIdentity};
use proctor_roster::store::StudentStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let now = Utc::now();
    let students = vec![
        (
            Uuid::parse_str("5b0c6f1e-8a4e-4d55-9a55-0f3c1d2b7a01")?,
            "Rajesh Kumar",
            "MS22CSE001",
            85,
            now - Duration::hours(2),
            2,
        ),
        (
            Uuid::parse_str("8e2d4a37-1c6b-4f0e-b3a2-6d9f0c4e5b02")?,
            "Priya Sharma",
            "MS22CSE002",
            92,
            now - Duration::days(1),
            0,
        ),
        (
            Uuid::parse_str("c41f9b2a-7e3d-4a68-8c15-2b7e9d0f6a03")?,
            "Arjun Patel",
            "MS22CSE003",
            67,
            now - Duration::days(3),
            1,
        ),
        (
            Uuid::parse_str("f7a3e5c9-2d1b-4e86-a4f0-9c8b3d2e1f04")?,
            "Sneha Reddy",
            "MS22CSE004",
            88,
            now - Duration::hours(5),
            0,
        ),
    ];

    let store = StudentStore::new();
    for (id, name, usn, attendance, last_active_at, unread) in students {
        let record = StudentRecord {
            student_id: id,
            full_name: name.to_string(),
            registration_number: usn.to_string(),
            cohort: "SEM-06-C".to_string(),
            program: "B.E-CS".to_string(),
            attendance_percent: Some(attendance),
            last_active_at: Some(last_active_at),
            unread_message_count: unread,
        };
        store.upsert(record.clone())?;
        save_student(pool, &record).await?;
    }

    let rajesh = Uuid::parse_str("5b0c6f1e-8a4e-4d55-9a55-0f3c1d2b7a01")?;
    let events = vec![
        (
            1,
            ActivityKind::Message,
            Some(rajesh),
            None,
            "New query from Rajesh Kumar",
            now - Duration::hours(2),
        ),
        (
            2,
            ActivityKind::AttendanceUpdate,
            None,
            Some("SEM-06-C"),
            "Attendance updated for SEM-06-C",
            now - Duration::hours(4),
        ),
        (
            3,
            ActivityKind::Announcement,
            None,
            Some("SEM-06-C"),
            "Posted assignment deadline reminder",
            now - Duration::days(1),
        ),
        (
            4,
            ActivityKind::ResourceUpload,
            None,
            None,
            "Uploaded new study material",
            now - Duration::days(2),
        ),
    ];

    let students = store.snapshot();
    for (event_id, kind, subject, cohort, summary_text, occurred_at) in events {
        let event = ActivityEvent {
            event_id,
            kind,
            subject_student_id: subject,
            cohort: cohort.map(str::to_string),
            summary_text: summary_text.to_string(),
            occurred_at,
        };
        append_event(pool, &feed::attribute_cohort(event, &students)).await?;
    }

    for (actor_id, role, cohorts) in [
        ("proctor", Role::Proctor, vec!["SEM-06-C"]),
        ("admin", Role::Admin, Vec::new()),
    ] {
        save_actor(pool, actor_id, role, &cohorts).await?;
    }

    Ok(())
}

pub async fn save_student(pool: &PgPool, record: &StudentRecord) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proctor_roster.students
        (id, full_name, registration_number, cohort, program,
         attendance_percent, last_active_at, unread_message_count)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE
        SET full_name = EXCLUDED.full_name,
            registration_number = EXCLUDED.registration_number,
            cohort = EXCLUDED.cohort,
            program = EXCLUDED.program,
            attendance_percent = EXCLUDED.attendance_percent,
            last_active_at = EXCLUDED.last_active_at,
            unread_message_count = EXCLUDED.unread_message_count
        "#,
    )
    .bind(record.student_id)
    .bind(&record.full_name)
    .bind(&record.registration_number)
    .bind(&record.cohort)
    .bind(&record.program)
    .bind(record.attendance_percent)
    .bind(record.last_active_at)
    .bind(record.unread_message_count)
    .execute(pool)
    .await
    .with_context(|| format!("failed to save student {}", record.student_id))?;
    Ok(())
}

pub async fn delete_student(pool: &PgPool, student_id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM proctor_roster.students WHERE id = $1")
        .bind(student_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Single-statement clamp so concurrent CLI invocations cannot drive the count negative.
pub async fn adjust_unread_count(
    pool: &PgPool,
    student_id: Uuid,
    delta: i32,
) -> anyhow::Result<Result<i32, RosterError>> {
    let row = sqlx::query(
        r#"
        UPDATE proctor_roster.students
        SET unread_message_count = GREATEST(unread_message_count + $2, 0)
        WHERE id = $1
        RETURNING unread_message_count
        "#,
    )
    .bind(student_id)
    .bind(delta)
    .fetch_optional(pool)
    .await?;

    Ok(row
        .map(|row| row.get("unread_message_count"))
        .ok_or(RosterError::NotFound { student_id }))
}

pub async fn load_store(pool: &PgPool) -> anyhow::Result<StudentStore> {
    let rows = sqlx::query(
        "SELECT id, full_name, registration_number, cohort, program, \
         attendance_percent, last_active_at, unread_message_count \
         FROM proctor_roster.students \
         ORDER BY inserted_at, id",
    )
    .fetch_all(pool)
    .await?;

    let store = StudentStore::new();
    for row in rows {
        let record = StudentRecord {
            student_id: row.get("id"),
            full_name: row.get("full_name"),
            registration_number: row.get("registration_number"),
            cohort: row.get("cohort"),
            program: row.get("program"),
            attendance_percent: row.get("attendance_percent"),
            last_active_at: row.get("last_active_at"),
            unread_message_count: row.get("unread_message_count"),
        };
        let student_id = record.student_id;
        store
            .upsert(record)
            .with_context(|| format!("stored student {student_id} is invalid"))?;
    }

    tracing::info!(students = store.len(), "student store hydrated");
    Ok(store)
}

pub async fn append_event(pool: &PgPool, event: &ActivityEvent) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO proctor_roster.activity_events
        (event_id, kind, subject_student_id, cohort, summary_text, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(event.event_id)
    .bind(event.kind.as_str())
    .bind(event.subject_student_id)
    .bind(&event.cohort)
    .bind(&event.summary_text)
    .bind(event.occurred_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn load_activity(pool: &PgPool) -> anyhow::Result<ActivityLog> {
    let rows = sqlx::query(
        "SELECT event_id, kind, subject_student_id, cohort, summary_text, occurred_at \
         FROM proctor_roster.activity_events",
    )
    .fetch_all(pool)
    .await?;

    let log = ActivityLog::new();
    for row in rows {
        let kind: String = row.get("kind");
        let event = ActivityEvent {
            event_id: row.get("event_id"),
            kind: ActivityKind::parse(&kind).with_context(|| format!("unknown event kind {kind}"))?,
            subject_student_id: row.get("subject_student_id"),
            cohort: row.get("cohort"),
            summary_text: row.get("summary_text"),
            occurred_at: row.get("occurred_at"),
        };
        log.append(event)?;
    }
    Ok(log)
}

pub async fn save_actor(
    pool: &PgPool,
    actor_id: &str,
    role: Role,
    cohorts: &[&str],
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO proctor_roster.actors (actor_id, role)
        VALUES ($1, $2)
        ON CONFLICT (actor_id) DO UPDATE SET role = EXCLUDED.role
        "#,
    )
    .bind(actor_id)
    .bind(role.as_str())
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM proctor_roster.cohort_assignments WHERE actor_id = $1")
        .bind(actor_id)
        .execute(&mut *tx)
        .await?;

    for cohort in cohorts {
        sqlx::query(
            "INSERT INTO proctor_roster.cohort_assignments (actor_id, cohort) VALUES ($1, $2)",
        )
        .bind(actor_id)
        .bind(*cohort)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Stands in for the authentication collaborator: the actor has already been
/// verified, this only resolves role and cohort assignments.
pub async fn load_session(pool: &PgPool, actor_id: &str) -> anyhow::Result<SessionIdentity> {
    let role: String = sqlx::query("SELECT role FROM proctor_roster.actors WHERE actor_id = $1")
        .bind(actor_id)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("unknown actor {actor_id}"))?
        .get("role");
    let role = Role::parse(&role).with_context(|| format!("actor {actor_id} has unknown role {role}"))?;

    let cohorts: Vec<String> = sqlx::query(
        "SELECT cohort FROM proctor_roster.cohort_assignments WHERE actor_id = $1 ORDER BY cohort",
    )
    .bind(actor_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| row.get("cohort"))
    .collect();

    Ok(SessionIdentity::new(actor_id, role, cohorts))
}

pub async fn import_students_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: Option<Uuid>,
        full_name: String,
        registration_number: String,
        cohort: String,
        program: String,
        attendance_percent: Option<i32>,
        last_active_at: Option<DateTime<Utc>>,
        unread_message_count: Option<i32>,
    }

    let store = load_store(pool).await?;
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut saved = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let existing = store
            .snapshot()
            .records()
            .iter()
            .find(|r| r.registration_number.eq_ignore_ascii_case(row.registration_number.trim()))
            .map(|r| r.student_id);
        let student_id = row.student_id.or(existing).unwrap_or_else(Uuid::new_v4);
        let unread_message_count = match row.unread_message_count {
            Some(count) => count,
            None => store.get(student_id).map_or(0, |r| r.unread_message_count),
        };

        let record = StudentRecord {
            student_id,
            full_name: row.full_name.trim().to_string(),
            registration_number: row.registration_number.trim().to_string(),
            cohort: row.cohort.trim().to_string(),
            program: row.program.trim().to_string(),
            attendance_percent: row.attendance_percent,
            last_active_at: row.last_active_at,
            unread_message_count,
        };

        if let Err(err) = store.upsert(record.clone()) {
            tracing::warn!(row = line + 1, error = %err, "skipping invalid student row");
            continue;
        }
        save_student(pool, &record).await?;
        saved += 1;
    }

    Ok(saved)
}

#[derive(serde::Deserialize)]
struct EventCsvRow {
    event_id: i64,
    kind: String,
    subject_student_id: Option<Uuid>,
    cohort: Option<String>,
    summary_text: String,
    occurred_at: DateTime<Utc>,
}

fn event_from_row(row: EventCsvRow) -> Result<ActivityEvent, RosterError> {
    let kind = ActivityKind::parse(&row.kind).ok_or_else(|| RosterError::Validation {
        field: "kind",
        message: format!("event {} has unknown kind {:?}", row.event_id, row.kind),
    })?;
    if row.summary_text.trim().is_empty() {
        return Err(RosterError::Validation {
            field: "summary_text",
            message: format!("event {} has an empty summary", row.event_id),
        });
    }

    Ok(ActivityEvent {
        event_id: row.event_id,
        kind,
        subject_student_id: row.subject_student_id,
        cohort: row.cohort.filter(|c| !c.trim().is_empty()),
        summary_text: row.summary_text,
        occurred_at: row.occurred_at,
    })
}

/// Invalid rows are skipped with a warning, matching the student import.
pub async fn import_events_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let students = load_store(pool).await?.snapshot();
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<EventCsvRow>().enumerate() {
        let event = match event_from_row(result?) {
            Ok(event) => feed::attribute_cohort(event, &students),
            Err(err) => {
                tracing::warn!(row = line + 1, error = %err, "skipping invalid event row");
                continue;
            }
        };
        if append_event(pool, &event).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}
