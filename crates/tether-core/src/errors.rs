/// Close-reason codes attached to disconnect events.
pub mod codes {
    /// The account unlinked this device.
    pub const LOGGED_OUT: u16 = 401;
    /// Stored credentials no longer accepted by the network.
    pub const STALE_CREDENTIALS: u16 = 405;
    /// Session state is corrupt on the server side.
    pub const BAD_SESSION: u16 = 500;
}

/// Why a connection ended, classified for the retry decision.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    // Terminal, no retry
    #[error("logged out")]
    LoggedOut,

    // Invalidate credentials, retry with reset backoff
    #[error("authentication rejected (code {code})")]
    AuthenticationRejected { code: u16 },

    // Retry with backoff
    #[error("transient connection error: {0}")]
    Transient(String),
}

impl ConnectionError {
    /// Classify a close event from the protocol library.
    pub fn from_close(code: Option<u16>, reason: &str) -> Self {
        match code {
            Some(codes::LOGGED_OUT) => Self::LoggedOut,
            Some(code @ (codes::STALE_CREDENTIALS | codes::BAD_SESSION)) => {
                Self::AuthenticationRejected { code }
            }
            Some(code) => Self::Transient(format!("code {code}: {reason}")),
            None => Self::Transient(reason.to_string()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::LoggedOut)
    }

    /// Whether the stored session is permanently void.
    pub fn invalidates_credentials(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::AuthenticationRejected { .. })
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::LoggedOut => "logged_out",
            Self::AuthenticationRejected { .. } => "authentication_rejected",
            Self::Transient(_) => "transient",
        }
    }
}

/// Errors surfaced by the protocol library.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    Closed,
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Errors from the outbound path.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors calling the external message processor.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("processor request failed: {0}")]
    Http(String),
    #[error("processor returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid processor response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_out_classification() {
        let err = ConnectionError::from_close(Some(401), "logged out");
        assert_eq!(err, ConnectionError::LoggedOut);
        assert!(!err.is_retryable());
        assert!(err.invalidates_credentials());
    }

    #[test]
    fn auth_rejected_codes() {
        for code in [405, 500] {
            let err = ConnectionError::from_close(Some(code), "");
            assert_eq!(err, ConnectionError::AuthenticationRejected { code });
            assert!(err.is_retryable());
            assert!(err.invalidates_credentials());
        }
    }

    #[test]
    fn other_codes_are_transient() {
        for code in [408, 428, 440, 503, 515] {
            let err = ConnectionError::from_close(Some(code), "lost");
            assert!(matches!(err, ConnectionError::Transient(_)), "code {code}");
            assert!(err.is_retryable());
            assert!(!err.invalidates_credentials());
        }
    }

    #[test]
    fn missing_code_is_transient() {
        let err = ConnectionError::from_close(None, "socket hang up");
        assert_eq!(err, ConnectionError::Transient("socket hang up".into()));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(ConnectionError::LoggedOut.error_kind(), "logged_out");
        assert_eq!(
            ConnectionError::AuthenticationRejected { code: 405 }.error_kind(),
            "authentication_rejected"
        );
        assert_eq!(ConnectionError::Transient("x".into()).error_kind(), "transient");
    }

    #[test]
    fn send_error_wraps_protocol() {
        let err: SendError = ProtocolError::Timeout.into();
        assert_eq!(err.to_string(), "request timed out");
        assert_eq!(SendError::NotConnected.to_string(), "not connected");
    }
}
