//! Target configuration types

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cron;
use crate::config::ConfigError;

/// Largest accepted `maxAge`, one hundred years
pub const MAX_AGE_LIMIT_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// A monitored target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Unique target ID, used in webhook and mute URLs
    pub id: String,
    /// Maximum allowed silence, in seconds
    pub max_age: u64,
    /// Cron expression governing repeat alerts
    pub alert_schedule: String,
    /// Email recipient for this target's alerts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Target {
    pub fn new(id: impl Into<String>, max_age: Duration, alert_schedule: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            max_age: max_age.as_secs(),
            alert_schedule: alert_schedule.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// `maxAge` as a signed duration, saturating at [`MAX_AGE_LIMIT_SECS`].
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_age.min(MAX_AGE_LIMIT_SECS) as i64)
    }
}

/// On-disk target definitions (`{ "targets": [...] }`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetsFile {
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl TargetsFile {
    /// Load and validate a targets file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let file: TargetsFile =
            serde_json::from_slice(&data).map_err(|e| ConfigError::Parse(e.to_string()))?;
        file.validate()?;
        Ok(file)
    }

    /// Load a targets file, treating a missing file as empty
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let data = serde_json::to_vec_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path.as_ref(), data).map_err(|e| ConfigError::Write {
            path: path.as_ref().display().to_string(),
            source: e,
        })
    }

    /// Reject duplicate ids and ages that are zero or above
    /// [`MAX_AGE_LIMIT_SECS`].
    ///
    /// Invalid cron schedules are only warned about: the scheduler skips
    /// such targets per cycle instead of refusing to start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.id.trim().is_empty() {
                return Err(ConfigError::Invalid("target id must not be empty".to_string()));
            }
            if !seen.insert(target.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate target id '{}'",
                    target.id
                )));
            }
            if target.max_age == 0 {
                return Err(ConfigError::Invalid(format!(
                    "target '{}' must have maxAge > 0",
                    target.id
                )));
            }
            if target.max_age > MAX_AGE_LIMIT_SECS {
                return Err(ConfigError::Invalid(format!(
                    "target '{}' has maxAge {} above the limit of {} seconds",
                    target.id, target.max_age, MAX_AGE_LIMIT_SECS
                )));
            }
            if let Err(e) = cron::validate(&target.alert_schedule) {
                tracing::warn!(target_id = %target.id, error = %e, "Invalid alert schedule");
            }
        }
        Ok(())
    }

    /// Insert or update targets by id. Returns the number of targets written.
    pub fn upsert(&mut self, targets: Vec<Target>) -> usize {
        let mut written = 0;
        for target in targets {
            match self.targets.iter_mut().find(|t| t.id == target.id) {
                Some(existing) if *existing == target => {}
                Some(existing) => {
                    *existing = target;
                    written += 1;
                }
                None => {
                    self.targets.push(target);
                    written += 1;
                }
            }
        }
        written
    }

    pub fn get(&self, id: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_targets_json() {
        let json = r#"{
            "targets": [
                {"id": "backup", "maxAge": 86400, "alertSchedule": "0 9 * * *", "email": "ops@example.com"},
                {"id": "heartbeat", "maxAge": 300, "alertSchedule": "@hourly"}
            ]
        }"#;
        let file: TargetsFile = serde_json::from_str(json).unwrap();
        file.validate().unwrap();

        assert_eq!(file.targets.len(), 2);
        assert_eq!(file.targets[0].max_age, 86400);
        assert_eq!(file.targets[0].email.as_deref(), Some("ops@example.com"));
        assert_eq!(file.get("heartbeat").unwrap().alert_schedule, "@hourly");
        assert!(file.get("missing").is_none());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_zero_age() {
        let dup = TargetsFile {
            targets: vec![
                Target::new("a", Duration::from_secs(60), "* * * * *"),
                Target::new("a", Duration::from_secs(60), "* * * * *"),
            ],
        };
        assert!(matches!(dup.validate(), Err(ConfigError::Invalid(_))));

        let zero = TargetsFile {
            targets: vec![Target::new("a", Duration::ZERO, "* * * * *")],
        };
        assert!(zero.validate().is_err());

        let huge: TargetsFile = serde_json::from_str(
            r#"{"targets":[{"id":"a","maxAge":100000000000000000,"alertSchedule":"@hourly"}]}"#,
        )
        .unwrap();
        assert!(matches!(huge.validate(), Err(ConfigError::Invalid(_))));

        let at_limit = TargetsFile {
            targets: vec![Target::new("a", Duration::from_secs(MAX_AGE_LIMIT_SECS), "@hourly")],
        };
        assert!(at_limit.validate().is_ok());

        // A bad schedule is tolerated at load time
        let bad_cron = TargetsFile {
            targets: vec![Target::new("a", Duration::from_secs(60), "nonsense")],
        };
        assert!(bad_cron.validate().is_ok());
    }

    #[test]
    fn test_max_age_saturates() {
        let mut target = Target::new("a", Duration::from_secs(90), "@hourly");
        assert_eq!(target.max_age(), chrono::Duration::seconds(90));

        target.max_age = u64::MAX;
        assert_eq!(
            target.max_age(),
            chrono::Duration::seconds(MAX_AGE_LIMIT_SECS as i64)
        );
    }

    #[test]
    fn test_upsert() {
        let mut file = TargetsFile {
            targets: vec![Target::new("a", Duration::from_secs(60), "@hourly")],
        };

        let written = file.upsert(vec![
            Target::new("a", Duration::from_secs(60), "@hourly"),
            Target::new("b", Duration::from_secs(120), "@daily"),
        ]);
        assert_eq!(written, 1);

        let written = file.upsert(vec![Target::new("a", Duration::from_secs(600), "@hourly")]);
        assert_eq!(written, 1);
        assert_eq!(file.get("a").unwrap().max_age, 600);
        assert_eq!(file.targets.len(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        assert!(TargetsFile::load_or_default(&path).unwrap().targets.is_empty());
        assert!(matches!(TargetsFile::load(&path), Err(ConfigError::Read { .. })));

        let file = TargetsFile {
            targets: vec![Target::new("a", Duration::from_secs(60), "@hourly").with_email("x@y.z")],
        };
        file.save(&path).unwrap();

        let loaded = TargetsFile::load(&path).unwrap();
        assert_eq!(loaded.targets, file.targets);
    }
}
