use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmuError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Not connected: {0}")]
    NotConnected(String),
    #[error("Script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),
    #[error("Transport busy: {0}")]
    TransportBusy(String),
    #[error("Measurement cancelled")]
    Cancelled,
    #[error("Unknown instrument fault: {0}")]
    Unknown(String),
    #[error("No response within {0:?}")]
    Timeout(Duration),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("IO error: {context}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SmuError {
    /// Classify an I/O error raised by an instrument transport
    pub fn from_transport(err: std::io::Error, context: &str) -> Self {
        match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::ResourceBusy => {
                SmuError::TransportBusy(format!("{context}: {err}"))
            }
            ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof => {
                SmuError::NotConnected(format!("{context}: {err}"))
            }
            _ => SmuError::Unknown(format!("{context}: {err}")),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SmuError::Cancelled)
    }

    /// True when the session can no longer be used for further I/O
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(
            self,
            SmuError::NotConnected(_) | SmuError::ConnectionFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_classification() {
        let busy = SmuError::from_transport(
            std::io::Error::new(ErrorKind::WouldBlock, "locked"),
            "write",
        );
        assert!(matches!(busy, SmuError::TransportBusy(_)));

        let gone = SmuError::from_transport(
            std::io::Error::new(ErrorKind::BrokenPipe, "unplugged"),
            "read",
        );
        assert!(matches!(gone, SmuError::NotConnected(_)));
        assert!(gone.is_fatal_for_session());

        let other = SmuError::from_transport(std::io::Error::other("framing"), "read");
        assert!(matches!(other, SmuError::Unknown(_)));
    }

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(SmuError::Cancelled.is_cancelled());
        assert!(!SmuError::Unknown("x".into()).is_cancelled());
        assert_eq!(SmuError::Cancelled.to_string(), "Measurement cancelled");
    }
}
