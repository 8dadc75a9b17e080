/*!

Post-change log checks. Mark a [`LogCursor`] before changing something, then hand it to
[`LogScanner::check_no_errors_since`] once the change has settled. Which lines count as errors is
configuration, see [`LogErrorPatterns`].

!*/

use crate::clients::LogClient;
use crate::error::{self, Result};
use crate::wait::retry_transient;
use crate::{Context, Settings, WaitSpec};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use regex::Regex;
use snafu::ResultExt;
use std::sync::Arc;

/// The point in time from which a log should be scanned. A cursor is consumed by the check it is
/// handed to.
#[derive(Debug)]
pub struct LogCursor(DateTime<Utc>);

impl LogCursor {
    /// Mark the current time.
    pub fn mark() -> Self {
        Self(Utc::now())
    }

    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self(timestamp)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }
}

/// A line is an error when it matches at least one error pattern and none of the ignore patterns.
#[derive(Debug, Clone)]
pub struct LogErrorPatterns {
    errors: Vec<Regex>,
    ignores: Vec<Regex>,
}

impl LogErrorPatterns {
    pub fn new<I1, I2, S1, S2>(errors: I1, ignores: I2) -> Result<Self>
    where
        I1: IntoIterator<Item = S1>,
        I2: IntoIterator<Item = S2>,
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        Ok(Self {
            errors: compile(errors)?,
            ignores: compile(ignores)?,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(&settings.log_error_patterns, &settings.log_ignore_patterns)
    }

    pub fn is_error(&self, line: &str) -> bool {
        self.errors.iter().any(|pattern| pattern.is_match(line))
            && !self.ignores.iter().any(|pattern| pattern.is_match(line))
    }

    /// The error lines of `log`, in order.
    pub fn scan(&self, log: &str) -> Vec<String> {
        log.lines()
            .filter(|line| self.is_error(line))
            .map(str::to_string)
            .collect()
    }
}

fn compile<I, S>(patterns: I) -> Result<Vec<Regex>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|pattern| {
            Regex::new(pattern.as_ref()).context(error::PatternSnafu {
                pattern: pattern.as_ref(),
            })
        })
        .collect()
}

pub struct LogScanner {
    logs: Arc<dyn LogClient>,
    patterns: LogErrorPatterns,
    wait_spec: WaitSpec,
}

impl LogScanner {
    /// A scanner using the patterns configured in the context's settings.
    pub fn new(context: &Context) -> Result<Self> {
        Ok(Self {
            logs: context.logs(),
            patterns: LogErrorPatterns::from_settings(context.settings())?,
            wait_spec: context.settings().wait_spec(),
        })
    }

    pub fn with_patterns(self, patterns: LogErrorPatterns) -> Self {
        Self { patterns, ..self }
    }

    /// Fail with `UnexpectedLogErrors` if the deployment logged an error since `cursor` was marked.
    pub async fn check_no_errors_since(
        &self,
        namespace: &str,
        deployment: &str,
        cursor: LogCursor,
    ) -> Result<()> {
        self.deployment_log_is_error_empty(namespace, deployment, Some(cursor))
            .await
    }

    /// Fail with `UnexpectedLogErrors` if the deployment's log, or the part of it written since
    /// `since`, contains an error line.
    pub async fn deployment_log_is_error_empty(
        &self,
        namespace: &str,
        deployment: &str,
        since: Option<LogCursor>,
    ) -> Result<()> {
        let since = since.map(|cursor| cursor.timestamp());
        debug!(
            "Scanning the log of deployment '{}/{}' since {:?}",
            namespace, deployment, since
        );
        let description = format!("the log of deployment '{}/{}'", namespace, deployment);
        let log = retry_transient(&description, &self.wait_spec, || {
            self.logs.deployment_logs(namespace, deployment, since)
        })
        .await?;
        let lines = self.patterns.scan(&log);
        if lines.is_empty() {
            info!("The log of deployment '{}/{}' is free of errors", namespace, deployment);
            return Ok(());
        }
        for line in &lines {
            warn!("{}/{}: {}", namespace, deployment, line);
        }
        error::UnexpectedLogErrorsSnafu {
            deployment: format!("{}/{}", namespace, deployment),
            lines,
        }
        .fail()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn defaults() -> LogErrorPatterns {
        LogErrorPatterns::from_settings(&Settings::default()).unwrap()
    }

    #[test]
    fn default_patterns() {
        let patterns = defaults();
        let log = [
            r#"{"level":"info","msg":"Starting workers"}"#,
            r#"{"level":"error","msg":"Reconciler error"}"#,
            "2024-01-01T00:00:00Z\tERROR\tcontroller\tfailed to update status",
            "time=now level=error msg=boom",
            "panic: runtime error: invalid memory address",
            "java.lang.NullPointerException",
            "ERRORS are counted by this metric",
            "level=info msg=ready",
        ]
        .join("\n");
        assert_eq!(
            patterns.scan(&log),
            vec![
                r#"{"level":"error","msg":"Reconciler error"}"#.to_string(),
                "2024-01-01T00:00:00Z\tERROR\tcontroller\tfailed to update status".to_string(),
                "time=now level=error msg=boom".to_string(),
                "panic: runtime error: invalid memory address".to_string(),
                "java.lang.NullPointerException".to_string(),
            ]
        );
    }

    #[test]
    fn ignored_lines() {
        let patterns =
            LogErrorPatterns::new([r"\bERROR\b"], ["leader election"]).unwrap();
        assert!(!patterns.is_error("ERROR lost leader election, retrying"));
        assert!(patterns.is_error("ERROR unable to reconcile"));
    }

    #[test]
    fn invalid_pattern() {
        let err = LogErrorPatterns::new(["level=(error"], Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, crate::Error::Pattern { ref pattern, .. } if pattern == "level=(error"));
    }
}
