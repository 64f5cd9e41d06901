use thiserror::Error;

/// Main error type for DNP3 outstation operations
#[derive(Error, Debug)]
pub enum Dnp3Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Malformed APDU: {0}")]
    MalformedApdu(String),

    #[error("Unknown function code: 0x{0:02X}")]
    UnknownFunction(u8),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An application-layer callback arrived in a session state that cannot
    /// accept it. The state machine treats this as a programming error on the
    /// caller's side, never as a recoverable protocol condition.
    #[error("Event {event} is invalid in state {state}")]
    InvalidState {
        state: &'static str,
        event: &'static str,
    },
}

/// Result type alias for DNP3 outstation operations
pub type Dnp3Result<T> = Result<T, Dnp3Error>;
