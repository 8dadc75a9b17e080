use std::time::Duration;

// Waiting
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(3 * 60);
pub const DEFAULT_STABILITY_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_STABILITY_WINDOW: Duration = Duration::from_secs(60);

// Operator Lifecycle Manager
pub const INSTALL_PLAN: &str = "InstallPlan";
pub const INSTALL_PLAN_API_VERSION: &str = "operators.coreos.com/v1alpha1";
pub const OPERATOR_GROUP: &str = "OperatorGroup";
pub const SUBSCRIPTION: &str = "Subscription";

// Condition types and reasons
pub const CONDITION_ESTABLISHED: &str = "Established";
pub const CONDITION_NAMES_ACCEPTED: &str = "NamesAccepted";
pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_READY: &str = "Ready";
pub const REASON_PROGRESS_DEADLINE_EXCEEDED: &str = "ProgressDeadlineExceeded";

// Environment variables
pub const ENV_PREFIX: &str = "LIFECYCLE_";

/// Log lines matching any of these are treated as unexpected errors unless an ignore pattern also
/// matches.
pub const DEFAULT_LOG_ERROR_PATTERNS: &[&str] = &[
    r#""level"\s*:\s*"error""#,
    r"\blevel=error\b",
    r"\tERROR\t",
    r"\bERROR\b",
    r"^panic:",
    r"Exception\b",
];
