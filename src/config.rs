use crate::db;
use anyhow::Context;
use crate::marks::{self, MarkSettings};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ENV_WORKSPACE: &str = "EXPLORANOTES_WORKSPACE";
pub const ENV_SESSION_TTL_HOURS: &str = "EXPLORANOTES_SESSION_TTL_HOURS";
pub const ENV_LOG: &str = "EXPLORANOTES_LOG";

const DEFAULT_SESSION_TTL_HOURS: i64 = 12;
const GRADING_DEFAULTS_KEY: &str = "grading.defaults";

/// Process-level settings, read once at startup.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub workspace: Option<PathBuf>,
    pub session_ttl_hours: i64,
    pub log_filter: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            log_filter: "info".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let workspace = lookup(ENV_WORKSPACE)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let session_ttl_hours = lookup(ENV_SESSION_TTL_HOURS)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|h| *h > 0)
            .unwrap_or(defaults.session_ttl_hours);
        let log_filter = lookup(ENV_LOG)
            .or_else(|| lookup("RUST_LOG"))
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.log_filter);
        Self {
            workspace,
            session_ttl_hours,
            log_filter,
        }
    }
}

/// Per-workspace defaults applied to new evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingDefaults {
    pub mark_scale: f64,
    pub precision: f64,
    pub coefficient: f64,
}

impl Default for GradingDefaults {
    fn default() -> Self {
        Self {
            mark_scale: marks::AVERAGE_SCALE,
            precision: 0.01,
            coefficient: 1.0,
        }
    }
}

impl GradingDefaults {
    pub fn mark_settings(&self) -> MarkSettings {
        MarkSettings {
            mark_scale: self.mark_scale,
            precision: self.precision,
        }
    }

    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        match db::settings_get_json(conn, GRADING_DEFAULTS_KEY)? {
            Some(v) => serde_json::from_value(v)
                .with_context(|| format!("setting {} is malformed", GRADING_DEFAULTS_KEY)),
            None => Ok(Self::default()),
        }
    }

    pub fn store(&self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_set_json(conn, GRADING_DEFAULTS_KEY, &serde_json::to_value(self)?)
    }

    pub fn validate(&self) -> Result<(), marks::MarkError> {
        marks::validate_settings(&self.mark_settings())?;
        marks::validate_coefficient(self.coefficient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_lookup_applies_fallbacks() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_SESSION_TTL_HOURS, "not-a-number"),
            ("RUST_LOG", "exploranotesd=debug"),
            (ENV_WORKSPACE, "  "),
        ]);
        let cfg = DaemonConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.workspace, None);
        assert_eq!(cfg.session_ttl_hours, 12);
        assert_eq!(cfg.log_filter, "exploranotesd=debug");

        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_SESSION_TTL_HOURS, "48"),
            (ENV_LOG, "warn"),
            ("RUST_LOG", "trace"),
            (ENV_WORKSPACE, "/srv/notes"),
        ]);
        let cfg = DaemonConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.workspace, Some(PathBuf::from("/srv/notes")));
        assert_eq!(cfg.session_ttl_hours, 48);
        assert_eq!(cfg.log_filter, "warn");
    }

    #[test]
    fn grading_defaults_round_trip_through_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = db::open_db(dir.path()).expect("open");
        assert_eq!(GradingDefaults::load(&conn).expect("load"), GradingDefaults::default());
        let custom = GradingDefaults {
            mark_scale: 10.0,
            precision: 0.5,
            coefficient: 2.0,
        };
        custom.store(&conn).expect("store");
        assert_eq!(GradingDefaults::load(&conn).expect("load"), custom);
        assert!(GradingDefaults {
            precision: 0.0,
            ..custom
        }
        .validate()
        .is_err());
    }

    #[test]
    fn malformed_grading_defaults_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = db::open_db(dir.path()).expect("open");
        db::settings_set_json(&conn, GRADING_DEFAULTS_KEY, &serde_json::json!({ "markScale": "vingt" }))
            .expect("store");
        let err = GradingDefaults::load(&conn).expect_err("malformed defaults");
        assert!(format!("{:#}", err).contains(GRADING_DEFAULTS_KEY));
    }
}
