use serde::{Deserialize, Serialize};

/// Lifecycle phase of the single live connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Disconnected,
    Connecting,
    AwaitingScan,
    Connected,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingScan => "awaiting_scan",
            Self::Connected => "connected",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide connection state.
///
/// Fields are private: every mutation goes through a transition method so
/// that `identity` is set iff the phase is `Connected` and the scan payload
/// only exists while `AwaitingScan`.
#[derive(Clone, Debug, Default)]
pub struct ConnectionState {
    phase: Phase,
    scan_payload: Option<String>,
    identity: Option<String>,
    reconnect_attempts: u32,
    in_flight: bool,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn scan_payload(&self) -> Option<&str> {
        self.scan_payload.as_deref()
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    /// Accept a connect request. Returns `false` when another attempt is
    /// executing or the connection is not idle.
    pub fn begin_connect(&mut self) -> bool {
        if self.in_flight || self.phase != Phase::Disconnected {
            return false;
        }
        self.in_flight = true;
        self.phase = Phase::Connecting;
        true
    }

    /// A fresh scan token was issued. Valid from `Connecting` or while
    /// already awaiting a scan (tokens rotate).
    pub fn enter_awaiting_scan(&mut self, token: String) -> bool {
        if !matches!(self.phase, Phase::Connecting | Phase::AwaitingScan) {
            return false;
        }
        self.phase = Phase::AwaitingScan;
        self.scan_payload = Some(token);
        self.identity = None;
        self.reconnect_attempts = 0;
        true
    }

    /// Session opened.
    pub fn enter_connected(&mut self, identity: String) -> bool {
        if !matches!(self.phase, Phase::Connecting | Phase::AwaitingScan) {
            return false;
        }
        self.phase = Phase::Connected;
        self.identity = Some(identity);
        self.scan_payload = None;
        self.reconnect_attempts = 0;
        self.in_flight = false;
        true
    }

    /// Connection closed or the attempt failed. Always allowed.
    pub fn enter_disconnected(&mut self) {
        self.phase = Phase::Disconnected;
        self.identity = None;
        self.scan_payload = None;
        self.in_flight = false;
    }

    /// Count one more failed attempt and return the new total.
    pub fn record_failure(&mut self) -> u32 {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.reconnect_attempts
    }

    pub fn reset_attempts(&mut self) {
        self.reconnect_attempts = 0;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            phase: self.phase,
            identity: self.identity.clone(),
            scan_payload: self.scan_payload.clone(),
            reconnect_attempts: self.reconnect_attempts,
            in_flight: self.in_flight,
        }
    }
}

/// Point-in-time copy of [`ConnectionState`] handed to readers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub phase: Phase,
    pub identity: Option<String>,
    #[serde(skip)]
    pub scan_payload: Option<String>,
    pub reconnect_attempts: u32,
    pub in_flight: bool,
}

impl StatusSnapshot {
    pub fn has_scan_payload(&self) -> bool {
        self.scan_payload.is_some()
    }
}
