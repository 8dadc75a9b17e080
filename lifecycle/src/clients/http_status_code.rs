pub use http::StatusCode;
use kube::Error;

pub trait HttpStatusCode {
    fn status_code(&self) -> Option<StatusCode>;

    fn is_status_code(&self, status_code: StatusCode) -> bool {
        self.status_code()
            .map(|some| some == status_code)
            .unwrap_or_default()
    }
}

impl HttpStatusCode for kube::Error {
    fn status_code(&self) -> Option<StatusCode> {
        if let Error::Api(error_response) = self {
            StatusCode::from_u16(error_response.code).ok()
        } else {
            None
        }
    }
}

impl<T, E> HttpStatusCode for std::result::Result<T, E>
where
    E: HttpStatusCode,
{
    fn status_code(&self) -> Option<StatusCode> {
        self.as_ref().err().and_then(|e| e.status_code())
    }
}

/// Converts a `NOT_FOUND` error into `Ok(None)`, handing the swallowed error to `f` first.
pub trait AllowNotFound<T, E> {
    fn allow_not_found<F>(self, f: F) -> std::result::Result<Option<T>, E>
    where
        F: FnOnce(E);
}

impl<T, E> AllowNotFound<T, E> for std::result::Result<T, E>
where
    E: HttpStatusCode,
{
    fn allow_not_found<F>(self, f: F) -> std::result::Result<Option<T>, E>
    where
        F: FnOnce(E),
    {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_status_code(StatusCode::NOT_FOUND) => {
                f(e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Whether a status code describes a condition that may clear up on its own, e.g. an object that
/// is not visible yet right after creation or an API server that is briefly overloaded.
pub(crate) fn is_transient_status(status_code: StatusCode) -> bool {
    status_code == StatusCode::NOT_FOUND
        || status_code == StatusCode::CONFLICT
        || status_code == StatusCode::TOO_MANY_REQUESTS
        || status_code.is_server_error()
}
