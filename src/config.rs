// Engine configuration
// Defaults < optional config file < JOBCARD_* environment variables

//! # Configuration
//!
//! Loaded with the `config` crate. Every section has defaults, so an empty environment
//! yields a working engine:
//!
//! ```toml
//! [auto_progression]
//! enabled = true
//! delay_ms = 3000
//!
//! [concurrency]
//! max_retries = 3
//! backoff_base_ms = 10
//! backoff_jitter_ms = 15
//!
//! [materials]
//! coverage_threshold = 100
//!
//! [notifications]
//! job_lifecycle_roles = ["ADMIN", "HOD_PREPRESS", "PRODUCTION_MANAGER"]
//! prepress_roles = ["HOD_PREPRESS", "DESIGNER"]
//!
//! [reactions]
//! link_prepress_to_job = true
//! ```
//!
//! Environment overrides use a double underscore between section and key, e.g.
//! `JOBCARD_AUTO_PROGRESSION__DELAY_MS=500`.

use ::config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::models::WorkflowKind;
use crate::{JobCardError, Result};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "JOBCARD";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub auto_progression: AutoProgressionConfig,
    pub concurrency: ConcurrencyConfig,
    pub materials: MaterialsConfig,
    pub notifications: NotificationConfig,
    pub reactions: ReactionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoProgressionConfig {
    pub enabled: bool,
    /// Delay before a follow-up transition fires
    pub delay_ms: u64,
}

impl Default for AutoProgressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 3_000,
        }
    }
}

impl AutoProgressionConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Extra attempts after a failed compare-and-set
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_jitter_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 10,
            backoff_jitter_ms: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaterialsConfig {
    /// Coverage percentage at or above which a job may proceed
    pub coverage_threshold: u8,
}

impl Default for MaterialsConfig {
    fn default() -> Self {
        Self {
            coverage_threshold: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Supervisory roles notified about every job lifecycle event
    pub job_lifecycle_roles: Vec<String>,
    /// Supervisory roles notified about every prepress event
    pub prepress_roles: Vec<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            job_lifecycle_roles: vec![
                "ADMIN".to_string(),
                "HOD_PREPRESS".to_string(),
                "PRODUCTION_MANAGER".to_string(),
            ],
            prepress_roles: vec!["HOD_PREPRESS".to_string(), "DESIGNER".to_string()],
        }
    }
}

impl NotificationConfig {
    pub fn roles_for(&self, kind: WorkflowKind) -> &[String] {
        match kind {
            WorkflowKind::JobLifecycle => &self.job_lifecycle_roles,
            WorkflowKind::Prepress => &self.prepress_roles,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReactionConfig {
    /// Let prepress progress drive the job lifecycle
    pub link_prepress_to_job: bool,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            link_prepress_to_job: true,
        }
    }
}

impl WorkflowConfig {
    /// Load defaults, then `path` (if given and present), then `JOBCARD_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let config: WorkflowConfig = builder
            .add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    pub fn validate(&self) -> Result<()> {
        if self.materials.coverage_threshold > 100 {
            return Err(JobCardError::Configuration(format!(
                "materials.coverage_threshold must be 0..=100, got {}",
                self.materials.coverage_threshold
            )));
        }
        if self.concurrency.max_retries == 0 {
            return Err(JobCardError::Configuration(
                "concurrency.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder-style override used by tests and the CLI
    pub fn with_auto_progression_delay(mut self, delay: Duration) -> Self {
        self.auto_progression.delay_ms = delay.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_usable() {
        let config = WorkflowConfig::default();

        assert!(config.validate().is_ok());
        assert!(config.auto_progression.enabled);
        assert_eq!(config.auto_progression.delay(), Duration::from_secs(3));
        assert_eq!(config.concurrency.max_retries, 3);
        assert_eq!(config.materials.coverage_threshold, 100);
        assert_eq!(
            config.notifications.roles_for(WorkflowKind::Prepress),
            &["HOD_PREPRESS".to_string(), "DESIGNER".to_string()]
        );
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = std::env::temp_dir().join(format!("jobcard-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("jobcard.toml");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[auto_progression]\ndelay_ms = 250\n\n[materials]\ncoverage_threshold = 80\n\n\
             [notifications]\nprepress_roles = [\"QA\"]"
        )
        .unwrap();

        let config = WorkflowConfig::load(Some(&path)).unwrap();
        assert_eq!(config.auto_progression.delay_ms, 250);
        assert!(config.auto_progression.enabled);
        assert_eq!(config.materials.coverage_threshold, 80);
        assert_eq!(config.notifications.prepress_roles, vec!["QA".to_string()]);
        // untouched section keeps its defaults
        assert_eq!(config.concurrency.max_retries, 3);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn environment_overrides_file_and_defaults() {
        // own prefix so parallel tests calling `load` don't see these
        let prefix = "JOBCARDENVTEST";
        let dir = std::env::temp_dir().join(format!("jobcard-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("jobcard.toml");
        std::fs::write(&path, "[auto_progression]\ndelay_ms = 250\n").unwrap();

        std::env::set_var("JOBCARDENVTEST_AUTO_PROGRESSION__DELAY_MS", "5");
        std::env::set_var("JOBCARDENVTEST_AUTO_PROGRESSION__ENABLED", "false");
        std::env::set_var("JOBCARDENVTEST_MATERIALS__COVERAGE_THRESHOLD", "70");

        let config = WorkflowConfig::load_with_prefix(Some(&path), prefix);

        std::env::remove_var("JOBCARDENVTEST_AUTO_PROGRESSION__DELAY_MS");
        std::env::remove_var("JOBCARDENVTEST_AUTO_PROGRESSION__ENABLED");
        std::env::remove_var("JOBCARDENVTEST_MATERIALS__COVERAGE_THRESHOLD");
        std::fs::remove_dir_all(&dir).unwrap();

        let config = config.unwrap();
        assert_eq!(config.auto_progression.delay_ms, 5);
        assert!(!config.auto_progression.enabled);
        assert_eq!(config.materials.coverage_threshold, 70);
        assert_eq!(config.concurrency.max_retries, 3);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = WorkflowConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(config.is_ok());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut config = WorkflowConfig::default();
        config.materials.coverage_threshold = 120;

        assert!(matches!(
            config.validate(),
            Err(JobCardError::Configuration(_))
        ));
    }
}
