//! Errors surfaced to callers of [`crate::ChargerClient`].
//!
//! Frame level problems ([`crate::message::DecodeError`]) never reach a caller: a bad frame is
//! logged and dropped by the dispatcher. What a caller can see is limited to correlation
//! failures and failures of the transport itself.

use std::time::Duration;
use thiserror::Error;

use crate::message::RecordKind;
use crate::ChargerId;

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    #[error("A {kind} request for charger {charger_id} is already in flight")]
    AlreadyPending { charger_id: ChargerId, kind: RecordKind },

    #[error("No {kind} frame from charger {charger_id} within {timeout:?}")]
    RequestTimeout { charger_id: ChargerId, kind: RecordKind, timeout: Duration },

    #[error("Transport disconnected")]
    TransportDisconnected,

    #[error("Transport error: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("Expected a {expected} frame, got {actual}")]
    UnexpectedRecord { expected: RecordKind, actual: RecordKind },
}

impl ClientError {
    /// Whether repeating the same request might succeed.
    ///
    /// A timeout usually means the charger is offline or the broker is slow.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::RequestTimeout { .. } | ClientError::Transport(_))
    }
}

#[test]
fn test_retryable() {
    let timeout = ClientError::RequestTimeout {
        charger_id: ChargerId::from("C1"),
        kind: RecordKind::Status,
        timeout: Duration::from_secs(5),
    };
    assert!(timeout.is_retryable());
    assert_eq!(timeout.to_string(), "No status frame from charger C1 within 5s");

    let pending = ClientError::AlreadyPending { charger_id: ChargerId::from("C1"), kind: RecordKind::Metrics };
    assert!(!pending.is_retryable());
    assert!(!ClientError::TransportDisconnected.is_retryable());
}
