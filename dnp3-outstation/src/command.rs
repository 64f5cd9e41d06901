//! Binary output commands
//!
//! SELECT/OPERATE and the direct-operate variants carry control relay
//! output blocks (group 12 variation 1). The session parses them, consults
//! the [`ControlHandler`] collaborator and echoes each block back with its
//! command status.

use dnp3_core::{Dnp3Error, Dnp3Result};

/// Status echoed per control object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Timeout,
    NoSelect,
    FormatError,
    NotSupported,
    AlreadyActive,
    HardwareError,
    Local,
    TooManyOps,
    NotAuthorized,
}

impl CommandStatus {
    /// Encode to the wire value
    #[must_use]
    pub const fn as_u8(&self) -> u8 {
        match self {
            CommandStatus::Success => 0,
            CommandStatus::Timeout => 1,
            CommandStatus::NoSelect => 2,
            CommandStatus::FormatError => 3,
            CommandStatus::NotSupported => 4,
            CommandStatus::AlreadyActive => 5,
            CommandStatus::HardwareError => 6,
            CommandStatus::Local => 7,
            CommandStatus::TooManyOps => 8,
            CommandStatus::NotAuthorized => 9,
        }
    }

    /// Decode from the wire value
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CommandStatus::Success),
            1 => Some(CommandStatus::Timeout),
            2 => Some(CommandStatus::NoSelect),
            3 => Some(CommandStatus::FormatError),
            4 => Some(CommandStatus::NotSupported),
            5 => Some(CommandStatus::AlreadyActive),
            6 => Some(CommandStatus::HardwareError),
            7 => Some(CommandStatus::Local),
            8 => Some(CommandStatus::TooManyOps),
            9 => Some(CommandStatus::NotAuthorized),
            _ => None,
        }
    }
}

/// Control relay output block, group 12 variation 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crob {
    /// Control code (operation type, trip/close, queue/clear bits)
    pub code: u8,
    /// Number of times to execute the operation
    pub count: u8,
    pub on_time_ms: u32,
    pub off_time_ms: u32,
    pub status: CommandStatus,
}

impl Crob {
    /// Encoded size in octets
    pub const SIZE: usize = 11;

    /// Decode from the 11-octet wire form
    ///
    /// # Errors
    /// Fails on a short slice or an unknown status value.
    pub fn decode(bytes: &[u8]) -> Dnp3Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Dnp3Error::MalformedApdu(format!(
                "CROB payload of {} octets is too short",
                bytes.len()
            )));
        }
        let status = CommandStatus::from_u8(bytes[10]).ok_or_else(|| {
            Dnp3Error::MalformedApdu(format!("unknown command status {}", bytes[10]))
        })?;
        Ok(Self {
            code: bytes[0],
            count: bytes[1],
            on_time_ms: u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
            off_time_ms: u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
            status,
        })
    }

    /// Encode to the 11-octet wire form
    pub fn encode(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), Self::SIZE);
        out[0] = self.code;
        out[1] = self.count;
        out[2..6].copy_from_slice(&self.on_time_ms.to_le_bytes());
        out[6..10].copy_from_slice(&self.off_time_ms.to_le_bytes());
        out[10] = self.status.as_u8();
    }
}

/// Collaborator that executes controls against the physical process
pub trait ControlHandler: Send {
    /// Validate a control without executing it
    fn select(&mut self, crob: &Crob, index: u16) -> CommandStatus;

    /// Execute a control
    fn operate(&mut self, crob: &Crob, index: u16) -> CommandStatus;
}

/// Handler that rejects every control
#[derive(Debug, Default)]
pub struct NullControlHandler;

impl ControlHandler for NullControlHandler {
    fn select(&mut self, _crob: &Crob, _index: u16) -> CommandStatus {
        CommandStatus::NotSupported
    }

    fn operate(&mut self, _crob: &Crob, _index: u16) -> CommandStatus {
        CommandStatus::NotSupported
    }
}
