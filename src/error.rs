use std::path::PathBuf;

use thiserror::Error;

use crate::generation::GenerationError;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid payload: {0}")]
    Validation(String),

    #[error("Path {} escapes root {}", .path.display(), .root.display())]
    PathEscape { root: PathBuf, path: PathBuf },

    #[error("Unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("Unknown stage {stage} for {pipeline} pipeline")]
    UnknownStage { pipeline: String, stage: String },

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Activity {activity} failed after {attempts} attempt(s): {reason}")]
    ActivityExhausted {
        activity: String,
        attempts: u32,
        reason: FailureKind,
    },

    #[error("Pipeline terminated: {0}")]
    Terminated(String),

    #[error("Text generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    /// Validation-class errors reject the triggering call and are never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PipelineError::Validation(_)
                | PipelineError::PathEscape { .. }
                | PipelineError::UnsupportedFormat(_)
                | PipelineError::UnknownStage { .. }
        )
    }

    /// Failures another attempt cannot fix: validation errors, undecodable
    /// input and termination. Activities stop on these at once.
    pub fn is_permanent(&self) -> bool {
        self.is_validation()
            || matches!(
                self,
                PipelineError::Connector(ConnectorError::MalformedResponse(_))
                    | PipelineError::Json(_)
                    | PipelineError::Csv(_)
                    | PipelineError::Terminated(_)
            )
    }
}

/// Connector failures abort extraction wholesale; no partial results survive.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("token environment variable {0} is missing or empty")]
    TokenMissing(String),

    #[error("token from {env} is too short ({len} chars, need at least 8)")]
    TokenTooShort { env: String, len: usize },

    #[error("endpoint {0} is not a valid URL")]
    InvalidEndpoint(String),

    #[error("protocol {scheme} is not allowed for {endpoint} (https required)")]
    DisallowedProtocol { scheme: String, endpoint: String },

    #[error("endpoint returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed connector response: {0}")]
    MalformedResponse(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Distinguishes between logic failures and infrastructure failures inside an
/// activity. Both are retried until the policy is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// Work logic failed (bad record, collaborator rejected the input).
    Business(String),
    /// Infrastructure failed (timeout, network, filesystem).
    System(String),
}

impl FailureKind {
    pub fn message(&self) -> &str {
        match self {
            FailureKind::Business(msg) | FailureKind::System(msg) => msg,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Business(msg) => write!(f, "Business failure: {msg}"),
            FailureKind::System(msg) => write!(f, "System failure: {msg}"),
        }
    }
}

impl From<PipelineError> for FailureKind {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Io(_) | PipelineError::Generation(_) => {
                FailureKind::System(err.to_string())
            }
            PipelineError::Connector(ConnectorError::Network(_)) => {
                FailureKind::System(err.to_string())
            }
            other => FailureKind::Business(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kind_display() {
        let biz = FailureKind::Business("bad record".into());
        assert_eq!(biz.to_string(), "Business failure: bad record");

        let sys = FailureKind::System("timed out".into());
        assert_eq!(sys.to_string(), "System failure: timed out");
        assert_eq!(sys.message(), "timed out");
    }

    #[test]
    fn validation_errors_are_classified() {
        assert!(PipelineError::Validation("x".into()).is_validation());
        assert!(PipelineError::UnsupportedFormat("xml".into()).is_validation());
        assert!(
            PipelineError::PathEscape {
                root: PathBuf::from("/repo"),
                path: PathBuf::from("/etc"),
            }
            .is_validation()
        );
        assert!(!PipelineError::Terminated("stop".into()).is_validation());
    }

    #[test]
    fn permanent_errors_cover_validation_and_bad_input() {
        assert!(PipelineError::UnsupportedFormat("xml".into()).is_permanent());
        assert!(
            PipelineError::Connector(ConnectorError::MalformedResponse("scalar".into()))
                .is_permanent()
        );
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(PipelineError::Json(json).is_permanent());

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "absent");
        assert!(!PipelineError::Io(io).is_permanent());
        assert!(
            !PipelineError::Connector(ConnectorError::Status {
                status: 503,
                message: "busy".into(),
            })
            .is_permanent()
        );
    }

    #[test]
    fn activity_exhausted_display() {
        let err = PipelineError::ActivityExhausted {
            activity: "extract".into(),
            attempts: 3,
            reason: FailureKind::System("timed out after 30s".into()),
        };
        assert_eq!(
            err.to_string(),
            "Activity extract failed after 3 attempt(s): System failure: timed out after 30s"
        );
    }

    #[test]
    fn connector_token_too_short_display() {
        let err = ConnectorError::TokenTooShort {
            env: "TOKEN".into(),
            len: 3,
        };
        assert_eq!(
            err.to_string(),
            "token from TOKEN is too short (3 chars, need at least 8)"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PipelineError>();
    }
}
