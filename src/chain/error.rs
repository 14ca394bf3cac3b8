use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("HTTP request failed: {0}")]
    Network(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response body: {0}")]
    Decode(String),

    /// The provider answered and refused the request; retrying will not help
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ChainError>,
    },

    #[error("Client configuration error: {0}")]
    Config(String),
}

impl ChainError {
    /// Transient errors are worth another attempt; anything else fails immediately
    pub fn is_transient(&self) -> bool {
        match self {
            ChainError::Network(_) | ChainError::Timeout(_) | ChainError::Decode(_) => true,
            // 4xx other than throttling means our request is wrong
            ChainError::Status { status, .. } => *status >= 500 || *status == 429,
            ChainError::Rejected(_)
            | ChainError::RetriesExhausted { .. }
            | ChainError::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ChainError::Network("reset".into()).is_transient());
        assert!(ChainError::Timeout(10_000).is_transient());
        assert!(ChainError::Decode("eof".into()).is_transient());
        assert!(
            ChainError::Status {
                status: 500,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            ChainError::Status {
                status: 429,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !ChainError::Status {
                status: 400,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!ChainError::Rejected("bad address".into()).is_transient());
    }
}
