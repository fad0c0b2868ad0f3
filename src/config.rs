use anyhow::{ensure, Context};
use chrono::Duration;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SESSION_TTL_MINUTES: i64 = 480;
const MAX_SESSION_TTL_MINUTES: i64 = 30 * 24 * 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub session_ttl: Duration,
}

fn parse_var<T: std::str::FromStr>(name: &str, value: Option<String>, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a number, got {raw:?}")),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;
        let max_connections = parse_var(
            "ROSTER_DB_MAX_CONNECTIONS",
            lookup("ROSTER_DB_MAX_CONNECTIONS"),
            DEFAULT_MAX_CONNECTIONS,
        )?;
        let ttl_minutes = parse_var(
            "ROSTER_SESSION_TTL_MINUTES",
            lookup("ROSTER_SESSION_TTL_MINUTES"),
            DEFAULT_SESSION_TTL_MINUTES,
        )?;
        ensure!(
            ttl_minutes <= MAX_SESSION_TTL_MINUTES,
            "ROSTER_SESSION_TTL_MINUTES must be at most {MAX_SESSION_TTL_MINUTES}, got {ttl_minutes}"
        );
        let session_ttl = Duration::try_minutes(ttl_minutes.max(1))
            .context("ROSTER_SESSION_TTL_MINUTES is out of range")?;

        Ok(Self {
            database_url,
            max_connections: max_connections.max(1),
            session_ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_optional_vars_missing() {
        let config = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://localhost/roster")]))
            .unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.session_ttl, Duration::minutes(480));
    }

    #[test]
    fn database_url_is_required() {
        assert!(AppConfig::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let result = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/roster"),
            ("ROSTER_DB_MAX_CONNECTIONS", "many"),
        ]));
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("ROSTER_DB_MAX_CONNECTIONS"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/roster"),
            ("ROSTER_DB_MAX_CONNECTIONS", "12"),
            ("ROSTER_SESSION_TTL_MINUTES", "30"),
        ]))
        .unwrap();
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.session_ttl, Duration::minutes(30));
    }

    #[test]
    fn oversized_session_ttl_is_rejected() {
        let result = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/roster"),
            ("ROSTER_SESSION_TTL_MINUTES", "9223372036854775807"),
        ]));
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("at most 43200"));

        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/roster"),
            ("ROSTER_SESSION_TTL_MINUTES", "43200"),
        ]))
        .unwrap();
        assert_eq!(config.session_ttl, Duration::days(30));
    }
}
