use crate::clients::http_status_code::is_transient_status;
use crate::clients::{HttpStatusCode, StatusCode};
use snafu::Snafu;

/// The `Result` type returned by `clients`.
pub type Result<T> = std::result::Result<T, Error>;

/// The public error type returned by `clients`.
#[derive(Debug, Snafu)]
pub struct Error(InnerError);

/// The private error type returned by `clients`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum InnerError {
    #[snafu(display("Error initializing the Kubernetes client: {}", source))]
    Initialization { source: kube::Error },

    #[snafu(display("Unable to {} {}: {}", method, what, source))]
    KubeApiCall {
        method: String,
        what: String,
        source: kube::Error,
    },

    #[snafu(display("The {} is unusable: {}", what, reason))]
    InvalidObject { what: String, reason: String },
}

impl Error {
    /// Wrap an error returned by the Kubernetes API. `method` is the verb that was attempted, e.g.
    /// `get`, and `what` describes the object, e.g. `Deployment default/operator`.
    pub fn kube_api_call<S1, S2>(method: S1, what: S2, source: kube::Error) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Error(InnerError::KubeApiCall {
            method: method.into(),
            what: what.into(),
            source,
        })
    }

    /// Whether retrying the same call later may succeed. Not-found, conflicts, throttling, server
    /// errors and broken connections are transient; authorization and validation failures are not.
    pub fn is_transient(&self) -> bool {
        match &self.0 {
            InnerError::KubeApiCall { source, .. } | InnerError::Initialization { source } => {
                match source.status_code() {
                    Some(status_code) => is_transient_status(status_code),
                    None => matches!(
                        source,
                        kube::Error::HyperError(_) | kube::Error::Service(_)
                    ),
                }
            }
            InnerError::InvalidObject { .. } => false,
        }
    }
}

impl HttpStatusCode for InnerError {
    fn status_code(&self) -> Option<StatusCode> {
        match self {
            InnerError::InvalidObject { .. } => None,
            InnerError::Initialization { source: e } => e.status_code(),
            InnerError::KubeApiCall {
                method: _,
                source: e,
                what: _,
            } => e.status_code(),
        }
    }
}

impl HttpStatusCode for Error {
    fn status_code(&self) -> Option<StatusCode> {
        self.0.status_code()
    }
}
