use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorralError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No data received for {0:?}")]
    Timeout(Duration),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Frame body of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Failed to encode {type_name}: {source}")]
    Encode {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode {type_name}: {source}")]
    Decode {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Registration handshake failed: {0}")]
    Handshake(String),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("No private ports left above {0}")]
    PortsExhausted(u16),

    #[error("Job failed: {0}")]
    Job(String),
}

impl CorralError {
    /// Whether the connection this error came from should be discarded.
    ///
    /// A frame that failed half-way leaves the stream at an unknown offset, so
    /// framing and transport failures are terminal. Codec and command errors
    /// happen after a whole frame was consumed and leave the stream usable, as
    /// does an outbound body refused before any byte was written.
    pub fn is_connection_terminal(&self) -> bool {
        matches!(
            self,
            CorralError::Io(_)
                | CorralError::Timeout(_)
                | CorralError::MalformedMessage(_)
                | CorralError::ConnectionClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, CorralError>;

/// Render an error followed by every cause that its message does not already
/// include, separated by `: `.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !rendered.contains(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_and_transport_errors_are_terminal() {
        assert!(CorralError::Timeout(Duration::from_secs(10)).is_connection_terminal());
        assert!(CorralError::MalformedMessage("bad magic".into()).is_connection_terminal());
        assert!(CorralError::ConnectionClosed.is_connection_terminal());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(CorralError::from(io).is_connection_terminal());
    }

    #[test]
    fn command_errors_keep_the_connection() {
        assert!(!CorralError::Protocol("unknown command".into()).is_connection_terminal());
        assert!(!CorralError::WorkerNotFound("worker-9".into()).is_connection_terminal());
        assert!(!CorralError::FrameTooLarge(usize::MAX).is_connection_terminal());
    }

    #[test]
    fn error_chain_skips_causes_already_in_the_message() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = CorralError::from(io);
        assert_eq!(error_chain(&err), "I/O error: address in use");
    }

    #[test]
    fn error_chain_appends_hidden_causes() {
        #[derive(Debug, Error)]
        #[error("handshake for {0} abandoned")]
        struct Abandoned(String, #[source] CorralError);

        let err = Abandoned("worker-1".into(), CorralError::ConnectionClosed);
        assert_eq!(
            error_chain(&err),
            "handshake for worker-1 abandoned: Connection closed by peer"
        );
    }

    #[test]
    fn timeout_message_names_the_wait() {
        let err = CorralError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "No data received for 10s");
    }
}
