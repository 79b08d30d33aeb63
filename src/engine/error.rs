use std::fmt::Display;

use ulid::Ulid;

use crate::model::BookingStatus;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed or rule-breaking input.
    #[error("{0}")]
    Validation(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },
    /// Slot taken, duplicate transition, double payment, stale write.
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("cannot move booking from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    /// Storage failure. Detail is logged, not returned.
    #[error("{0}")]
    Infrastructure(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        EngineError::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        EngineError::Forbidden(msg.into())
    }

    /// Log `detail` and return a generic failure naming the operation.
    pub fn infrastructure(op: &'static str, detail: impl Display) -> Self {
        tracing::error!("storage failure during {op}: {detail}");
        metrics::counter!(crate::observability::STORAGE_ERRORS_TOTAL, "op" => op).increment(1);
        EngineError::Infrastructure(format!("failed to {op}"))
    }

    /// Map a store error raised while performing `op`.
    pub fn from_store(op: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            StoreError::AlreadyExists { entity, .. } => {
                EngineError::Conflict(format!("{entity} already recorded"))
            }
            StoreError::VersionMismatch { .. } => {
                EngineError::Conflict("booking was modified concurrently, reload and retry".into())
            }
            other @ StoreError::Journal(_) => EngineError::infrastructure(op, other),
        }
    }

    /// Deterministic client-side failures, as opposed to infrastructure.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, EngineError::Infrastructure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_specific() {
        let e = EngineError::InvalidTransition {
            from: BookingStatus::Completed,
            to: BookingStatus::Pending,
        };
        assert_eq!(e.to_string(), "cannot move booking from completed to pending");

        let e = EngineError::NotFound { entity: "studio", id: Ulid::nil() };
        assert!(e.to_string().starts_with("studio not found: "));
    }

    #[test]
    fn store_errors_map_to_taxonomy() {
        let id = Ulid::new();
        let e = EngineError::from_store(
            "update booking",
            StoreError::VersionMismatch { id, expected: 1, stored: 2 },
        );
        assert!(matches!(e, EngineError::Conflict(_)));

        let io = std::io::Error::other("disk full");
        let e = EngineError::from_store("update booking", StoreError::Journal(io));
        assert_eq!(e.to_string(), "failed to update booking");
        assert!(!e.is_client_error());
    }
}
