use crate::retry::is_retryable_status;

/// Errors produced by this library. They are returned wrapped in an `anyhow::Error`; use
/// `err.downcast_ref::<ApiError>()` to tell them apart.
#[derive(Debug)]
pub enum ApiError {
    /// The API returned a status that is neither successful nor 308 Resume Incomplete.
    HTTPResponseError(hyper::StatusCode, String),
    /// Invalid data was supplied to the library.
    InputDataError(String),
    /// The request couldn't be sent, or no response was received in time.
    TransportError(String),
    /// The server's answer doesn't fit the resumable upload protocol, e.g. a malformed `Range:`
    /// header or an acknowledged offset we never sent.
    ProtocolError(String),
    /// The upload's cancellation token was triggered.
    Canceled,
}

impl ApiError {
    /// Whether sending the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::TransportError(_) => true,
            ApiError::HTTPResponseError(status, _) => is_retryable_status(*status),
            _ => false,
        }
    }
}

impl std::error::Error for ApiError {}
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// True if `e` wraps an `ApiError` that may go away on retry.
pub(crate) fn is_retryable(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ApiError>()
        .map(ApiError::is_retryable)
        .unwrap_or(false)
}

pub(crate) fn is_canceled(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<ApiError>(), Some(ApiError::Canceled))
}
