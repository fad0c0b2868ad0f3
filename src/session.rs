use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RosterError, RosterResult};
use crate::models::CohortId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Proctor,
    Admin,
    Student,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "proctor" => Some(Role::Proctor),
            "admin" => Some(Role::Admin),
            "student" => Some(Role::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Proctor => "proctor",
            Role::Admin => "admin",
            Role::Student => "student",
        }
    }

    /// Static role-capability table.
    pub fn capabilities(self) -> &'static [Action] {
        match self {
            Role::Proctor | Role::Admin => &[
                Action::ViewRoster,
                Action::ViewStudentDetail,
                Action::SendMessage,
            ],
            Role::Student => &[Action::ViewStudentDetail],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ViewRoster,
    ViewStudentDetail,
    SendMessage,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::ViewRoster => "view_roster",
            Action::ViewStudentDetail => "view_student_detail",
            Action::SendMessage => "send_message",
        };
        f.write_str(name)
    }
}

/// What an authorization check is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Whatever the actor has been assigned.
    Assigned,
    Cohort(CohortId),
    Student { student_id: Uuid, cohort: CohortId },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Assigned => f.write_str("assigned roster"),
            Scope::Cohort(cohort) => write!(f, "cohort {cohort}"),
            Scope::Student { student_id, .. } => write!(f, "student {student_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub actor_id: String,
    pub role: Role,
    /// Supplied by the authentication collaborator; never derived here.
    pub assigned_cohorts: BTreeSet<CohortId>,
}

impl SessionIdentity {
    pub fn new(
        actor_id: impl Into<String>,
        role: Role,
        cohorts: impl IntoIterator<Item = impl Into<CohortId>>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
            assigned_cohorts: cohorts.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether records in `cohort` belong to this actor's roster.
    pub fn covers_cohort(&self, cohort: &str) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Proctor => self.assigned_cohorts.contains(cohort),
            Role::Student => false,
        }
    }
}

#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    pub fn into_result(self, action: Action, scope: &Scope) -> RosterResult<()> {
        match self {
            Decision::Allowed => Ok(()),
            Decision::Denied(reason) => {
                tracing::warn!(%action, %scope, %reason, "authorization denied");
                Err(RosterError::Forbidden {
                    action,
                    scope: scope.clone(),
                    reason,
                })
            }
        }
    }
}

pub fn authorize(session: &SessionIdentity, action: Action, scope: &Scope) -> Decision {
    if !session.role.capabilities().contains(&action) {
        return Decision::Denied(format!(
            "role {} lacks {action}",
            session.role.as_str()
        ));
    }

    match (session.role, scope) {
        (Role::Admin, _) => Decision::Allowed,
        (Role::Proctor, Scope::Assigned) => Decision::Allowed,
        (Role::Proctor, Scope::Cohort(cohort) | Scope::Student { cohort, .. }) => {
            if session.assigned_cohorts.contains(cohort) {
                Decision::Allowed
            } else {
                Decision::Denied(format!("cohort {cohort} is not assigned to {}", session.actor_id))
            }
        }
        (Role::Student, Scope::Student { student_id, .. })
            if student_id.to_string() == session.actor_id =>
        {
            Decision::Allowed
        }
        (Role::Student, _) => Decision::Denied("students may only view their own record".to_string()),
    }
}

/// Authorizes and converts a denial into `Forbidden`.
pub fn require(session: &SessionIdentity, action: Action, scope: &Scope) -> RosterResult<()> {
    authorize(session, action, scope).into_result(action, scope)
}

struct SessionEntry {
    identity: SessionIdentity,
    expires_at: DateTime<Utc>,
}

/// Live sessions keyed by an opaque token, created at login and dropped at
/// logout or expiry.
pub struct SessionRegistry {
    ttl: Duration,
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn login(&self, identity: SessionIdentity, now: DateTime<Utc>) -> Uuid {
        let token = Uuid::new_v4();
        tracing::debug!(actor_id = %identity.actor_id, role = identity.role.as_str(), "session opened");
        let entry = SessionEntry {
            identity,
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, entry);
        token
    }

    pub fn resolve(&self, token: Uuid, now: DateTime<Utc>) -> Option<SessionIdentity> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        match sessions.get(&token) {
            Some(entry) if entry.expires_at > now => Some(entry.identity.clone()),
            Some(_) => {
                sessions.remove(&token);
                None
            }
            None => None,
        }
    }

    pub fn logout(&self, token: Uuid) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token)
            .is_some()
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        before - sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proctor() -> SessionIdentity {
        SessionIdentity::new("proctor", Role::Proctor, ["SEM-06-C"])
    }

    #[test]
    fn proctor_limited_to_assigned_cohorts() {
        let session = proctor();
        let own = Scope::Cohort("SEM-06-C".to_string());
        let other = Scope::Cohort("SEM-06-D".to_string());

        assert_eq!(authorize(&session, Action::ViewRoster, &own), Decision::Allowed);
        assert!(!authorize(&session, Action::ViewRoster, &other).is_allowed());
        assert!(authorize(&session, Action::ViewRoster, &Scope::Assigned).is_allowed());
    }

    #[test]
    fn student_scope_checks_the_students_cohort() {
        let session = proctor();
        let scope = Scope::Student {
            student_id: Uuid::new_v4(),
            cohort: "SEM-06-D".to_string(),
        };
        let err = require(&session, Action::SendMessage, &scope).unwrap_err();
        assert!(matches!(err, RosterError::Forbidden { action: Action::SendMessage, .. }));
    }

    #[test]
    fn admin_sees_everything() {
        let session = SessionIdentity::new("registrar", Role::Admin, Vec::<String>::new());
        let scope = Scope::Cohort("SEM-02-A".to_string());
        assert!(authorize(&session, Action::ViewRoster, &scope).is_allowed());
        assert!(session.covers_cohort("anything"));
    }

    #[test]
    fn student_role_only_sees_own_detail() {
        let student_id = Uuid::new_v4();
        let session = SessionIdentity::new(student_id.to_string(), Role::Student, ["SEM-06-C"]);
        let own = Scope::Student {
            student_id,
            cohort: "SEM-06-C".to_string(),
        };
        let peer = Scope::Student {
            student_id: Uuid::new_v4(),
            cohort: "SEM-06-C".to_string(),
        };

        assert!(authorize(&session, Action::ViewStudentDetail, &own).is_allowed());
        assert!(!authorize(&session, Action::ViewStudentDetail, &peer).is_allowed());
        assert!(!authorize(&session, Action::ViewRoster, &Scope::Assigned).is_allowed());
        assert!(!authorize(&session, Action::SendMessage, &own).is_allowed());
    }

    #[test]
    fn registry_expires_sessions() {
        let registry = SessionRegistry::new(Duration::minutes(30));
        let now = Utc::now();
        let token = registry.login(proctor(), now);

        assert_eq!(registry.resolve(token, now + Duration::minutes(10)), Some(proctor()));
        assert_eq!(registry.resolve(token, now + Duration::minutes(31)), None);
        assert!(!registry.logout(token));
    }

    #[test]
    fn logout_destroys_session() {
        let registry = SessionRegistry::new(Duration::minutes(30));
        let now = Utc::now();
        let token = registry.login(proctor(), now);
        let stale = registry.login(proctor(), now - Duration::hours(1));

        assert!(registry.logout(token));
        assert_eq!(registry.resolve(token, now), None);
        assert_eq!(registry.purge_expired(now), 1);
        assert_eq!(registry.resolve(stale, now), None);
    }

    #[test]
    fn ttl_past_the_calendar_saturates() {
        let registry = SessionRegistry::new(Duration::days(100_000_000));
        let now = Utc::now();
        let token = registry.login(proctor(), now);

        assert_eq!(registry.resolve(token, now + Duration::days(365)), Some(proctor()));
        assert_eq!(registry.purge_expired(now), 0);
    }
}
