use thiserror::Error;

/// Classified failure of a single backend request.
///
/// Stored verbatim in the scheduler's observable state, so it has to stay
/// cheap to clone and comparable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The transport could not reach the backend (refused, DNS, timeout).
    #[error("backend unreachable: {message}")]
    NetworkUnavailable { message: String },
    /// The backend answered with a non-2xx status.
    #[error("backend returned HTTP {status}")]
    HttpError { status: u16 },
    /// The body was not the JSON shape we expected.
    #[error("malformed response body: {message}")]
    DecodeError { message: String },
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkUnavailable {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::DecodeError {
            message: message.into(),
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::HttpError {
                status: status.as_u16(),
            };
        }
        if err.is_decode() {
            return Self::decode(err.to_string());
        }
        // Body read failures surface mid-transfer; they mean the connection dropped.
        Self::network(err.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetworkUnavailable { .. } => "network_unavailable",
            Self::HttpError { .. } => "http_error",
            Self::DecodeError { .. } => "decode_error",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_reqwest(err)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err.to_string())
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_errors_classify_as_decode() {
        let err = serde_json::from_str::<Vec<u8>>("{not json").unwrap_err();
        let fetch: FetchError = err.into();
        assert_eq!(fetch.kind(), "decode_error");
    }

    #[test]
    fn http_error_display_includes_status() {
        let err = FetchError::HttpError { status: 503 };
        assert_eq!(err.to_string(), "backend returned HTTP 503");
    }
}
