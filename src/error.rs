use thiserror::Error;

/// Failures talking to the CRM backend.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("cannot reach {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ApiError {
    /// Transport hiccups, timeouts, throttling and server faults.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport { source, .. } => source.is_timeout() || source.is_connect(),
            ApiError::Status { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            ApiError::Decode(_) | ApiError::Validation(_) => false,
        }
    }
}

/// A payload rejected before any request was sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {entity}: {}", .problems.join("; "))]
pub struct ValidationError {
    pub entity: &'static str,
    pub problems: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_statuses_retry() {
        let status = |status| ApiError::Status {
            status,
            message: String::new(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(408).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(422).is_retryable());
        assert!(!ApiError::Decode("x".into()).is_retryable());
    }

    #[test]
    fn validation_message_lists_problems() {
        let err = ValidationError {
            entity: "contact",
            problems: vec!["name is required".into(), "email is malformed".into()],
        };
        assert_eq!(
            err.to_string(),
            "invalid contact: name is required; email is malformed"
        );
    }
}
