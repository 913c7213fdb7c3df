use crate::types::{TrainingStage, WorkerKey};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a single worker call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerErrorKind {
    Unreachable,
    Timeout,
    Http(u16),
    Malformed,
}

impl fmt::Display for WorkerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErrorKind::Unreachable => f.write_str("Unreachable"),
            WorkerErrorKind::Timeout => f.write_str("Timeout"),
            WorkerErrorKind::Http(code) => write!(f, "HTTP({})", code),
            WorkerErrorKind::Malformed => f.write_str("Malformed"),
        }
    }
}

impl Serialize for WorkerErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One failed worker inside a fan-out, reported in response metadata.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerFailure {
    pub worker: WorkerKey,
    pub kind: WorkerErrorKind,
    pub detail: String,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("unauthorised: {0}")]
    Unauthorised(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limit exceeded, retry in {retry_after_s}s")]
    RateLimited { remaining: u32, retry_after_s: u64 },

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("no workers currently available for this plan")]
    NoBackends,

    #[error("worker {worker} failed: {kind}: {detail}")]
    Worker {
        worker: WorkerKey,
        kind: WorkerErrorKind,
        detail: String,
    },

    #[error("token expired")]
    TokenExpired,

    #[error("invalid token")]
    TokenInvalid,

    #[error("training stage {stage} failed: {detail}")]
    Stage {
        stage: TrainingStage,
        detail: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn worker(worker: WorkerKey, kind: WorkerErrorKind, detail: impl Into<String>) -> Self {
        Error::Worker {
            worker,
            kind,
            detail: detail.into(),
        }
    }

    /// Structural copy of the error. `Io` and `Serialization` carry
    /// non-clonable sources and collapse to `Internal` with the same
    /// message; every taxonomy variant survives intact.
    pub fn duplicate(&self) -> Error {
        match self {
            Error::Unauthorised(msg) => Error::Unauthorised(msg.clone()),
            Error::Forbidden(msg) => Error::Forbidden(msg.clone()),
            Error::RateLimited {
                remaining,
                retry_after_s,
            } => Error::RateLimited {
                remaining: *remaining,
                retry_after_s: *retry_after_s,
            },
            Error::Malformed(msg) => Error::Malformed(msg.clone()),
            Error::NoBackends => Error::NoBackends,
            Error::Worker {
                worker,
                kind,
                detail,
            } => Error::Worker {
                worker: *worker,
                kind: *kind,
                detail: detail.clone(),
            },
            Error::TokenExpired => Error::TokenExpired,
            Error::TokenInvalid => Error::TokenInvalid,
            Error::Stage { stage, detail } => Error::Stage {
                stage: *stage,
                detail: detail.clone(),
            },
            Error::Config(msg) => Error::Config(msg.clone()),
            Error::Io(e) => Error::Internal(e.to_string()),
            Error::Serialization(e) => Error::Internal(e.to_string()),
            Error::Internal(msg) => Error::Internal(msg.clone()),
        }
    }

    /// Flatten a worker error into its metadata form. `None` for other
    /// error variants.
    pub fn as_worker_failure(&self) -> Option<WorkerFailure> {
        match self {
            Error::Worker {
                worker,
                kind,
                detail,
            } => Some(WorkerFailure {
                worker: *worker,
                kind: *kind,
                detail: detail.clone(),
            }),
            _ => None,
        }
    }
}

// Config errors bubble out of the `config` crate during layered loading.
impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

// Deserialize is only needed for round-tripping reports in tests.
impl<'de> Deserialize<'de> for WorkerErrorKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "Unreachable" => Ok(WorkerErrorKind::Unreachable),
            "Timeout" => Ok(WorkerErrorKind::Timeout),
            "Malformed" => Ok(WorkerErrorKind::Malformed),
            other => {
                if let Some(code) = other
                    .strip_prefix("HTTP(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|code| code.parse::<u16>().ok())
                {
                    Ok(WorkerErrorKind::Http(code))
                } else {
                    Err(serde::de::Error::custom(format!(
                        "invalid worker error kind: {}",
                        other
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_error_kind_formats_like_wire() {
        assert_eq!(WorkerErrorKind::Unreachable.to_string(), "Unreachable");
        assert_eq!(WorkerErrorKind::Http(500).to_string(), "HTTP(500)");
        let json = serde_json::to_string(&WorkerErrorKind::Http(503)).unwrap();
        assert_eq!(json, "\"HTTP(503)\"");
    }

    #[test]
    fn worker_error_kind_parses_back() {
        let kind: WorkerErrorKind = serde_json::from_str("\"HTTP(429)\"").unwrap();
        assert_eq!(kind, WorkerErrorKind::Http(429));
        let kind: WorkerErrorKind = serde_json::from_str("\"Timeout\"").unwrap();
        assert_eq!(kind, WorkerErrorKind::Timeout);
        assert!(serde_json::from_str::<WorkerErrorKind>("\"HTTP(x)\"").is_err());
    }
}
