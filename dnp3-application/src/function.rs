//! DNP3 application-layer function codes
//!
//! Only the codes the outstation engine dispatches on are modelled; any
//! other value decodes to an error and is answered with FUNC_NOT_SUPPORTED
//! by the session.

use dnp3_core::{Dnp3Error, Dnp3Result};
use std::fmt::{self, Display};

/// Application-layer function code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    Read,
    Write,
    Select,
    Operate,
    DirectOperate,
    DirectOperateNoAck,
    EnableUnsolicited,
    DisableUnsolicited,
    DelayMeasure,
    Response,
    UnsolicitedResponse,
}

impl FunctionCode {
    /// Encode to the wire value
    #[must_use]
    pub const fn as_u8(&self) -> u8 {
        match self {
            FunctionCode::Read => 1,
            FunctionCode::Write => 2,
            FunctionCode::Select => 3,
            FunctionCode::Operate => 4,
            FunctionCode::DirectOperate => 5,
            FunctionCode::DirectOperateNoAck => 6,
            FunctionCode::EnableUnsolicited => 20,
            FunctionCode::DisableUnsolicited => 21,
            FunctionCode::DelayMeasure => 23,
            FunctionCode::Response => 129,
            FunctionCode::UnsolicitedResponse => 130,
        }
    }

    /// Decode from the wire value
    ///
    /// # Errors
    /// Returns `Dnp3Error::UnknownFunction` for codes the engine does not
    /// dispatch on.
    pub fn from_u8(value: u8) -> Dnp3Result<Self> {
        match value {
            1 => Ok(FunctionCode::Read),
            2 => Ok(FunctionCode::Write),
            3 => Ok(FunctionCode::Select),
            4 => Ok(FunctionCode::Operate),
            5 => Ok(FunctionCode::DirectOperate),
            6 => Ok(FunctionCode::DirectOperateNoAck),
            20 => Ok(FunctionCode::EnableUnsolicited),
            21 => Ok(FunctionCode::DisableUnsolicited),
            23 => Ok(FunctionCode::DelayMeasure),
            129 => Ok(FunctionCode::Response),
            130 => Ok(FunctionCode::UnsolicitedResponse),
            other => Err(Dnp3Error::UnknownFunction(other)),
        }
    }

    /// Whether this is one of the two response function codes, which carry
    /// an IIN field after the function code
    #[must_use]
    pub const fn is_response(&self) -> bool {
        matches!(
            self,
            FunctionCode::Response | FunctionCode::UnsolicitedResponse
        )
    }
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Where an inbound request's sequence number sits relative to the previous
/// request, as classified by the application layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceInfo {
    /// Unrelated to the previous exchange
    Other,
    /// Retransmission of the previous request
    Previous,
    /// The expected next sequence number
    Correct,
}
