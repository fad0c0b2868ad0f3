use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use proctor_roster::feed::{self, FeedScope};
use proctor_roster::models::{AttendanceTier, FeedItem, RosterEntry, StatusClassification};
use proctor_roster::query::{self, RosterFilter, RosterQuery, SortDirection, SortField};
use proctor_roster::session::{require, Action, Scope, SessionIdentity, SessionRegistry};
use proctor_roster::{report, RosterError};

mod config;
mod db;

#[derive(Parser)]
#[command(name = "proctor-roster")]
#[command(about = "Roster, attendance and activity tracker for academic proctors", long_about = None)]
struct Cli {
    /// Tracing filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Active,
    LowAttendance,
    Unknown,
}

impl From<StatusArg> for StatusClassification {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Active => StatusClassification::Active,
            StatusArg::LowAttendance => StatusClassification::LowAttendance,
            StatusArg::Unknown => StatusClassification::Unknown,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TierArg {
    High,
    Medium,
    Low,
}

impl From<TierArg> for AttendanceTier {
    fn from(value: TierArg) -> Self {
        match value {
            TierArg::High => AttendanceTier::High,
            TierArg::Medium => AttendanceTier::Medium,
            TierArg::Low => AttendanceTier::Low,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Name,
    Usn,
    Attendance,
    LastActive,
    Unread,
}

impl From<SortArg> for SortField {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Name => SortField::FullName,
            SortArg::Usn => SortField::RegistrationNumber,
            SortArg::Attendance => SortField::Attendance,
            SortArg::LastActive => SortField::LastActive,
            SortArg::Unread => SortField::UnreadMessages,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load the reference roster, activity and actors
    Seed,
    /// Upsert students from a CSV file
    ImportStudents {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Append activity events from a CSV file
    ImportEvents {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List the classified roster visible to an actor
    Roster {
        #[arg(long)]
        actor: String,
        /// Case-insensitive match on name or USN
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long)]
        cohort: Option<String>,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        #[arg(long, value_enum)]
        tier: Option<TierArg>,
        #[arg(long)]
        unread_only: bool,
        #[arg(long, value_enum, default_value_t = SortArg::Name)]
        sort: SortArg,
        #[arg(long)]
        desc: bool,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Show one student's classified record
    Student {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        id: Uuid,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Dashboard badge counts
    Summary {
        #[arg(long)]
        actor: String,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Recent activity, newest first
    #[command(group(
        ArgGroup::new("scope")
            .args(["cohort", "student"])
            .multiple(false)
    ))]
    Feed {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        cohort: Option<String>,
        #[arg(long)]
        student: Option<Uuid>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Generate a markdown dashboard report
    Report {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        cohort: Option<String>,
        #[arg(long, default_value_t = 10)]
        activity_limit: usize,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Apply a message-read (negative) or message-received (positive) delta
    AdjustUnread {
        #[arg(long)]
        student: Uuid,
        #[arg(long, allow_negative_numbers = true)]
        delta: i32,
    },
    /// Remove a student; their activity stays in the feed as orphaned
    Remove {
        #[arg(long)]
        student: Uuid,
    },
}

/// Wraps core outcomes in the wording the CLI shows to a person.
fn user_facing(err: RosterError) -> anyhow::Error {
    let prefix = match &err {
        RosterError::Forbidden { .. } => "access denied",
        RosterError::Validation { .. } => "invalid input",
        RosterError::Conflict { .. } => "record changed, re-read and retry",
        RosterError::NotFound { .. } => "not found",
    };
    anyhow::Error::new(err).context(prefix)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_entry(entry: &RosterEntry) {
    let now = Utc::now();
    let attendance = match (entry.record.attendance_percent, entry.tier) {
        (Some(percent), Some(tier)) => format!("{percent}% [{}]", tier.label()),
        _ => "no attendance sample".to_string(),
    };
    println!(
        "- {} ({}, {}) {} {}, {} unread, last active {}",
        entry.record.full_name,
        entry.record.registration_number,
        entry.record.cohort,
        attendance,
        entry.status.label(),
        entry.record.unread_message_count,
        report::last_active_label(now, entry.record.last_active_at)
    );
}

fn print_feed(items: &[FeedItem]) {
    let now = Utc::now();
    for item in items {
        println!(
            "- [{}] {} ({}){}",
            item.event.kind.as_str(),
            item.event.summary_text,
            report::last_active_label(now, Some(item.event.occurred_at)),
            if item.orphaned { " [student removed]" } else { "" }
        );
    }
}

/// The actor has already been authenticated upstream; this resolves their
/// role and cohorts and opens a session for the rest of the command.
async fn open_session(
    pool: &sqlx::PgPool,
    registry: &SessionRegistry,
    actor: &str,
) -> anyhow::Result<SessionIdentity> {
    let identity = db::load_session(pool, actor).await?;
    let now = Utc::now();
    let token = registry.login(identity, now);
    registry
        .resolve(token, now)
        .with_context(|| format!("access denied: session for {actor} is unknown or expired"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = config::AppConfig::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let registry = SessionRegistry::new(config.session_ttl);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportStudents { csv } => {
            let saved = db::import_students_csv(&pool, &csv).await?;
            println!("Saved {saved} students from {}.", csv.display());
        }
        Commands::ImportEvents { csv } => {
            let inserted = db::import_events_csv(&pool, &csv).await?;
            println!("Inserted {inserted} events from {}.", csv.display());
        }
        Commands::Roster {
            actor,
            search,
            cohort,
            status,
            tier,
            unread_only,
            sort,
            desc,
            format,
        } => {
            let session = open_session(&pool, &registry, &actor).await?;
            let snapshot = db::load_store(&pool).await?.snapshot();

            let direction = if desc {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            };
            let mut roster_query = RosterQuery::new()
                .search(search)
                .sort_by(sort.into(), direction);
            if let Some(cohort) = cohort {
                roster_query = roster_query.filter(RosterFilter::Cohort(cohort));
            }
            if let Some(status) = status {
                roster_query = roster_query.filter(RosterFilter::Status(status.into()));
            }
            if let Some(tier) = tier {
                roster_query = roster_query.filter(RosterFilter::Tier(tier.into()));
            }
            if unread_only {
                roster_query = roster_query.filter(RosterFilter::HasUnreadMessages);
            }

            let entries = query::query(&snapshot, &roster_query, &session).map_err(user_facing)?;
            match format {
                Format::Json => print_json(&entries)?,
                Format::Text if entries.is_empty() => println!("No students match this query."),
                Format::Text => entries.iter().for_each(print_entry),
            }
        }
        Commands::Student { actor, id, format } => {
            let session = open_session(&pool, &registry, &actor).await?;
            let snapshot = db::load_store(&pool).await?.snapshot();
            let entry = query::student_detail(&snapshot, &session, id).map_err(user_facing)?;
            match format {
                Format::Json => print_json(&entry)?,
                Format::Text => print_entry(&entry),
            }
        }
        Commands::Summary { actor, format } => {
            let session = open_session(&pool, &registry, &actor).await?;
            let snapshot = db::load_store(&pool).await?.snapshot();
            let summary = query::summarize(&snapshot, &session).map_err(user_facing)?;
            match format {
                Format::Json => print_json(&summary)?,
                Format::Text => {
                    println!("Assigned students: {}", summary.assigned_students);
                    println!("Unread messages: {}", summary.unread_messages);
                    println!("Low attendance alerts: {}", summary.low_attendance_alerts);
                    println!("Awaiting attendance sample: {}", summary.unknown_status);
                }
            }
        }
        Commands::Feed {
            actor,
            cohort,
            student,
            limit,
            format,
        } => {
            let session = open_session(&pool, &registry, &actor).await?;
            let snapshot = db::load_store(&pool).await?.snapshot();
            let log = db::load_activity(&pool).await?;

            let scope = match (cohort, student) {
                (Some(cohort), _) => {
                    require(&session, Action::ViewRoster, &Scope::Cohort(cohort.clone()))
                        .map_err(user_facing)?;
                    FeedScope::Cohort(cohort)
                }
                (None, Some(student_id)) => {
                    query::authorize_student(&snapshot, &session, Action::ViewStudentDetail, student_id)
                        .map_err(user_facing)?;
                    FeedScope::Student(student_id)
                }
                (None, None) => FeedScope::for_session(&session),
            };

            let items: Vec<FeedItem> = feed::recent_activity(&log, &snapshot, &scope, limit).collect();
            match format {
                Format::Json => print_json(&items)?,
                Format::Text if items.is_empty() => println!("No recent activity."),
                Format::Text => print_feed(&items),
            }
        }
        Commands::Report {
            actor,
            cohort,
            activity_limit,
            out,
        } => {
            let session = open_session(&pool, &registry, &actor).await?;
            let snapshot = db::load_store(&pool).await?.snapshot();
            let log = db::load_activity(&pool).await?;

            let (roster_query, scope, label) = match cohort {
                Some(cohort) => (
                    RosterQuery::new().filter(RosterFilter::Cohort(cohort.clone())),
                    FeedScope::Cohort(cohort.clone()),
                    cohort,
                ),
                None => (
                    RosterQuery::new(),
                    FeedScope::for_session(&session),
                    format!("{} (all assigned cohorts)", session.actor_id),
                ),
            };

            let entries = query::query(&snapshot, &roster_query, &session).map_err(user_facing)?;
            let summary = query::summarize_entries(&entries);
            let items: Vec<FeedItem> =
                feed::recent_activity(&log, &snapshot, &scope, activity_limit).collect();

            let report = report::build_report(&label, Utc::now(), &summary, &entries, &items);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::AdjustUnread { student, delta } => {
            let unread = db::adjust_unread_count(&pool, student, delta)
                .await?
                .map_err(user_facing)?;
            tracing::info!(%student, delta, unread, "unread count adjusted");
            println!("Student {student} now has {unread} unread messages.");
        }
        Commands::Remove { student } => {
            if db::delete_student(&pool, student).await? {
                println!("Removed student {student}.");
            } else {
                return Err(user_facing(RosterError::NotFound {
                    student_id: student,
                }));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_students_read_the_same_for_every_command() {
        let student_id = Uuid::new_v4();
        let err = user_facing(RosterError::NotFound { student_id });

        assert_eq!(err.to_string(), "not found");
        assert_eq!(format!("{err:#}"), format!("not found: student {student_id} not found"));
        assert!(matches!(
            err.downcast_ref::<RosterError>(),
            Some(RosterError::NotFound { .. })
        ));
    }
}
