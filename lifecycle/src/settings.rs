use crate::constants::{
    DEFAULT_DELETE_TIMEOUT, DEFAULT_LOG_ERROR_PATTERNS, DEFAULT_POLL_INTERVAL,
    DEFAULT_STABILITY_POLL_INTERVAL, DEFAULT_STABILITY_WINDOW, DEFAULT_TIMEOUT, ENV_PREFIX,
};
use crate::error::{self, Result};
use crate::WaitSpec;
use serde::{Deserialize, Deserializer};
use snafu::ResultExt;
use std::path::PathBuf;
use std::time::Duration;

/// Settings provide a way to tune waits and the log scan with environment variables, each
/// prefixed with `LIFECYCLE_`.
///
/// # Example
///
/// ```text
/// LIFECYCLE_TIMEOUT_SECS=1200
/// LIFECYCLE_LOG_IGNORE_PATTERNS='Reconciler error.*not found
/// ERROR.*leader election'
/// ```
///
/// Pattern lists hold one regular expression per line, so commas inside a pattern, e.g. in a
/// `{2,5}` quantifier, are kept.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Settings {
    /// Seconds between two evaluations of a readiness predicate.
    #[serde(default = "poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds a create-and-wait or a rollout may take.
    #[serde(default = "timeout_secs")]
    pub timeout_secs: u64,

    /// Seconds teardown waits for each deleted object to disappear.
    #[serde(default = "delete_timeout_secs")]
    pub delete_timeout_secs: u64,

    /// Seconds between two checks during a stability window.
    #[serde(default = "stability_poll_secs")]
    pub stability_poll_secs: u64,

    /// Length in seconds of the window during which pods must stay ready.
    #[serde(default = "stability_window_secs")]
    pub stability_window_secs: u64,

    /// Regular expressions marking a log line as an error, one per line in the environment.
    #[serde(default = "log_error_patterns", deserialize_with = "one_per_line")]
    pub log_error_patterns: Vec<String>,

    /// Regular expressions marking an error line as expected, one per line in the environment.
    #[serde(default, deserialize_with = "one_per_line")]
    pub log_ignore_patterns: Vec<String>,

    /// Path to a kubeconfig file. When unset the default kube configuration is inferred.
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
}

impl Settings {
    /// Read the settings from `LIFECYCLE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_env::<Settings>()
            .context(error::SettingsSnafu)
    }

    /// Read the settings from an iterator of `(name, value)` pairs, with names already stripped of
    /// the `LIFECYCLE_` prefix and lowercased.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(vars).context(error::SettingsSnafu)
    }

    /// The wait used when creating objects and waiting for rollouts.
    pub fn wait_spec(&self) -> WaitSpec {
        WaitSpec::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.timeout_secs),
        )
    }

    /// The wait used for each object during teardown.
    pub fn delete_wait_spec(&self) -> WaitSpec {
        WaitSpec::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.delete_timeout_secs),
        )
    }

    pub fn stability_poll_interval(&self) -> Duration {
        Duration::from_secs(self.stability_poll_secs)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_secs(self.stability_window_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: poll_interval_secs(),
            timeout_secs: timeout_secs(),
            delete_timeout_secs: delete_timeout_secs(),
            stability_poll_secs: stability_poll_secs(),
            stability_window_secs: stability_window_secs(),
            log_error_patterns: log_error_patterns(),
            log_ignore_patterns: Vec::new(),
            kubeconfig: None,
        }
    }
}

// We need these to provide defaults for serde.

fn poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

fn timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn delete_timeout_secs() -> u64 {
    DEFAULT_DELETE_TIMEOUT.as_secs()
}

fn stability_poll_secs() -> u64 {
    DEFAULT_STABILITY_POLL_INTERVAL.as_secs()
}

fn stability_window_secs() -> u64 {
    DEFAULT_STABILITY_WINDOW.as_secs()
}

fn log_error_patterns() -> Vec<String> {
    DEFAULT_LOG_ERROR_PATTERNS
        .iter()
        .map(|pattern| pattern.to_string())
        .collect()
}

fn one_per_line<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(String::deserialize(deserializer)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        let settings = Settings::from_vars(Vec::new()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.wait_spec(), WaitSpec::default());
        assert_eq!(settings.stability_window(), DEFAULT_STABILITY_WINDOW);
    }

    #[test]
    fn overrides() {
        let settings = Settings::from_vars(vec![
            ("timeout_secs".to_string(), "30".to_string()),
            (
                "log_ignore_patterns".to_string(),
                "leader election\ncache sync\n".to_string(),
            ),
            ("kubeconfig".to_string(), "/tmp/kubeconfig.yaml".to_string()),
        ])
        .unwrap();
        assert_eq!(settings.wait_spec().timeout(), Duration::from_secs(30));
        assert_eq!(
            settings.log_ignore_patterns,
            vec!["leader election".to_string(), "cache sync".to_string()]
        );
        assert_eq!(settings.kubeconfig, Some(PathBuf::from("/tmp/kubeconfig.yaml")));
    }

    #[test]
    fn commas_stay_inside_a_pattern() {
        let settings = Settings::from_vars(vec![(
            "log_error_patterns".to_string(),
            r"E\d{2,4}: .*".to_string(),
        )])
        .unwrap();
        assert_eq!(settings.log_error_patterns, vec![r"E\d{2,4}: .*".to_string()]);
        assert!(crate::LogErrorPatterns::from_settings(&settings).is_ok());
    }

    #[test]
    fn invalid_number() {
        let result = Settings::from_vars(vec![(
            "poll_interval_secs".to_string(),
            "soon".to_string(),
        )]);
        assert!(matches!(result, Err(crate::Error::Settings { .. })));
    }
}
