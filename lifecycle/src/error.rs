use crate::ObjectRef;
use snafu::Snafu;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// The error type for the lifecycle manager.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to {}: {}", action, source))]
    Client {
        action: String,
        source: crate::clients::Error,
    },

    #[snafu(display(
        "Some resources could not be torn down: {}",
        failed.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(", ")
    ))]
    TeardownPartialFailure { failed: Vec<TeardownFailure> },

    #[snafu(display("'{}' is unusable: {}", what, reason))]
    InvalidObject { what: String, reason: String },

    #[snafu(display("Unable to create client from kubeconfig: {}", source))]
    Kubeconfig {
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("Unable to create the Kubernetes client: {}", source))]
    KubeClient { source: kube::Error },

    #[snafu(display(
        "{} became unstable during the {:?} observation window: {}",
        selector,
        window,
        reason
    ))]
    Flapping {
        selector: String,
        window: Duration,
        reason: String,
    },

    #[snafu(display("{} has no pod template to fingerprint", reference))]
    NoPodTemplate { reference: ObjectRef },

    #[snafu(display("No readiness predicate is registered for kind '{}'", kind))]
    NoPredicateRegistered { kind: String },

    #[snafu(display("Unable to find {}", what))]
    NotFound { what: String },

    #[snafu(display("Invalid log pattern '{}': {}", pattern, source))]
    Pattern {
        pattern: String,
        source: regex::Error,
    },

    #[snafu(display("Waiting for {} failed: {}", description, reason))]
    PredicateFailed { description: String, reason: String },

    #[snafu(display(
        "The rollout of {} reverted to its previous configuration before settling",
        reference
    ))]
    RegressionDetected { reference: ObjectRef },

    #[snafu(display("Unable to read settings from the environment: {}", source))]
    Settings { source: envy::Error },

    #[snafu(display("Timed out after {:?} waiting for {}", timeout, description))]
    TimeoutExceeded {
        description: String,
        timeout: Duration,
    },

    #[snafu(display(
        "The log of deployment '{}' contains {} unexpected error line(s):\n{}",
        deployment,
        lines.len(),
        lines.join("\n")
    ))]
    UnexpectedLogErrors {
        deployment: String,
        lines: Vec<String>,
    },
}

/// One entry of the teardown stack that could not be removed from the cluster.
#[derive(Debug)]
pub struct TeardownFailure {
    pub reference: ObjectRef,
    pub reason: String,
}

impl std::fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.reference, self.reason)
    }
}
