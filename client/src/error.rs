use shared::CodecError;
use std::time::Duration;
use thiserror::Error;

/// Failures inside the RCON client. None of these cross out of the driver
/// task; they are logged and surfaced as `ClientEvent::Error`.
#[derive(Debug, Error)]
pub enum RconError {
    /// Malformed, undersized or unrecognised frame. Never fatal.
    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),
    #[error("login rejected by server")]
    Auth,
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("no response to `{command}` within {secs}s")]
    Timeout { command: String, secs: u64 },
    #[error("no traffic from server for {0:?}")]
    Watchdog(Duration),
    #[error("session is not logged in")]
    NotLoggedIn,
}

impl RconError {
    /// Whether the session has to be torn down after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RconError::Auth | RconError::Transport(_) | RconError::Watchdog(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(!RconError::Protocol(CodecError::TooShort { len: 3 }).is_fatal());
        assert!(!RconError::NotLoggedIn.is_fatal());
        assert!(RconError::Auth.is_fatal());
        assert!(RconError::Watchdog(Duration::from_secs(60)).is_fatal());
        assert!(
            RconError::Transport(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
                .is_fatal()
        );
    }

    #[test]
    fn test_error_message_formatting() {
        let err = RconError::Timeout {
            command: "players".to_string(),
            secs: 5,
        };
        assert_eq!(err.to_string(), "no response to `players` within 5s");

        let err = RconError::from(CodecError::UnknownType(9));
        assert_eq!(err.to_string(), "protocol error: unknown message type 0x09");
    }
}
