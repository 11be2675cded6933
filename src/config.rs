//! Queue configuration and file overrides.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{ConfigError, JobQueueError};

/// Configuration for one job queue, fixed at construction.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use keyed_job_queue::JobQueueConfig;
///
/// // Use defaults
/// let config = JobQueueConfig::default();
///
/// // Or customize
/// let config = JobQueueConfig {
///     max_concurrency: 2,
///     max_queue_length: 500,
///     job_timeout: Duration::from_secs(60),
/// };
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobQueueConfig {
    /// Number of jobs allowed to execute at the same time.
    ///
    /// This bounds jobs with I/O in flight, not CPU parallelism.
    pub max_concurrency: usize,

    /// Maximum number of jobs waiting to start.
    ///
    /// When full, admitting a new job evicts the oldest pending one.
    pub max_queue_length: usize,

    /// How long a job may run before it is cancelled and its slot freed.
    pub job_timeout: Duration,
}

impl Default for JobQueueConfig {
    /// - `max_concurrency`: 1
    /// - `max_queue_length`: 100
    /// - `job_timeout`: 60 seconds
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            max_queue_length: 100,
            job_timeout: Duration::from_secs(60),
        }
    }
}

impl JobQueueConfig {
    /// Spreadsheet rewrites: strictly one at a time, generous timeout.
    pub fn spreadsheet_sync() -> Self {
        Self {
            max_concurrency: 1,
            max_queue_length: 100,
            job_timeout: Duration::from_secs(120),
        }
    }

    /// Calendar upserts.
    pub fn calendar_sync() -> Self {
        Self {
            max_concurrency: 1,
            max_queue_length: 200,
            job_timeout: Duration::from_secs(60),
        }
    }

    /// Transactional mail.
    pub fn mail() -> Self {
        Self {
            max_concurrency: 2,
            max_queue_length: 500,
            job_timeout: Duration::from_secs(60),
        }
    }

    /// Check the configuration can back a running queue.
    ///
    /// # Errors
    ///
    /// Returns a [`JobQueueError`] naming the first zero-valued setting.
    pub fn validate(&self) -> Result<(), JobQueueError> {
        if self.max_concurrency == 0 {
            return Err(JobQueueError::ConcurrencyMustBePositive);
        }
        if self.max_queue_length == 0 {
            return Err(JobQueueError::QueueLengthMustBePositive);
        }
        if self.job_timeout.is_zero() {
            return Err(JobQueueError::TimeoutMustBePositive);
        }
        Ok(())
    }
}

/// Queue settings for every subsystem of the back office.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Spreadsheet sync queue (`[sheets]` in the file).
    pub sheets: JobQueueConfig,
    /// Calendar sync queue (`[calendar]` in the file).
    pub calendar: JobQueueConfig,
    /// Transactional mail queue (`[mail]` in the file).
    pub mail: JobQueueConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sheets: JobQueueConfig::spreadsheet_sync(),
            calendar: JobQueueConfig::calendar_sync(),
            mail: JobQueueConfig::mail(),
        }
    }
}

impl SchedulerConfig {
    /// Load overrides from a TOML file on top of the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse overrides from a TOML document on top of the defaults.
    ///
    /// ```toml
    /// [mail]
    /// max_concurrency = 4
    /// job_timeout_ms = 30000
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(content)?;
        let defaults = Self::default();
        let config = Self {
            sheets: file.sheets.apply(defaults.sheets),
            calendar: file.calendar.apply(defaults.calendar),
            mail: file.mail.apply(defaults.mail),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (section, queue) in [
            ("sheets", &self.sheets),
            ("calendar", &self.calendar),
            ("mail", &self.mail),
        ] {
            queue
                .validate()
                .map_err(|source| ConfigError::Invalid { section, source })?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    sheets: QueueFileConfig,
    calendar: QueueFileConfig,
    mail: QueueFileConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct QueueFileConfig {
    max_concurrency: Option<usize>,
    max_queue_length: Option<usize>,
    job_timeout_ms: Option<u64>,
}

impl QueueFileConfig {
    fn apply(self, base: JobQueueConfig) -> JobQueueConfig {
        JobQueueConfig {
            max_concurrency: self.max_concurrency.unwrap_or(base.max_concurrency),
            max_queue_length: self.max_queue_length.unwrap_or(base.max_queue_length),
            job_timeout: self
                .job_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(base.job_timeout),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_has_sensible_values() {
        let config = JobQueueConfig::default();
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.max_queue_length, 100);
        assert_eq!(config.job_timeout, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn presets_follow_subsystem_policies() {
        assert_eq!(JobQueueConfig::spreadsheet_sync().max_concurrency, 1);
        assert_eq!(
            JobQueueConfig::spreadsheet_sync().job_timeout,
            Duration::from_secs(120)
        );
        assert_eq!(JobQueueConfig::mail().max_concurrency, 2);
        assert_eq!(JobQueueConfig::mail().max_queue_length, 500);
    }

    #[test]
    fn validate_rejects_zero_values() {
        let zero_workers = JobQueueConfig {
            max_concurrency: 0,
            ..JobQueueConfig::default()
        };
        assert!(matches!(
            zero_workers.validate(),
            Err(JobQueueError::ConcurrencyMustBePositive)
        ));

        let zero_length = JobQueueConfig {
            max_queue_length: 0,
            ..JobQueueConfig::default()
        };
        assert!(matches!(
            zero_length.validate(),
            Err(JobQueueError::QueueLengthMustBePositive)
        ));

        let zero_timeout = JobQueueConfig {
            job_timeout: Duration::ZERO,
            ..JobQueueConfig::default()
        };
        assert!(matches!(
            zero_timeout.validate(),
            Err(JobQueueError::TimeoutMustBePositive)
        ));
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = SchedulerConfig::from_toml_str("").unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn file_overrides_only_set_keys() {
        let config = SchedulerConfig::from_toml_str(
            r#"
            [mail]
            max_concurrency = 4
            job_timeout_ms = 30000

            [sheets]
            max_queue_length = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.mail.max_concurrency, 4);
        assert_eq!(config.mail.job_timeout, Duration::from_secs(30));
        assert_eq!(config.mail.max_queue_length, 500);
        assert_eq!(config.sheets.max_queue_length, 250);
        assert_eq!(config.sheets.max_concurrency, 1);
        assert_eq!(config.calendar, JobQueueConfig::calendar_sync());
    }

    #[test]
    fn invalid_override_names_the_section() {
        let err = SchedulerConfig::from_toml_str("[calendar]\nmax_concurrency = 0\n").unwrap_err();
        assert!(err.to_string().contains("[calendar]"));
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = SchedulerConfig::from_toml_str("[mail]\nworkers = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = SchedulerConfig::load(Path::new("/nonexistent/scheduler.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
