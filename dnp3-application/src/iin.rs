//! Internal Indications field
//!
//! Every response carries two IIN octets after the function code. The
//! outstation merges session-held bits (device restart, need time, pending
//! class data) with per-request bits (parameter error, function not
//! supported, event buffer overflow) when it finalizes a fragment.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// 16-bit Internal Indications field
///
/// Stored as the two wire octets. Bit positions follow IEEE 1815.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IINField {
    pub iin1: u8,
    pub iin2: u8,
}

const IIN1_CLASS1_EVENTS: u8 = 0x02;
const IIN1_CLASS2_EVENTS: u8 = 0x04;
const IIN1_CLASS3_EVENTS: u8 = 0x08;
const IIN1_NEED_TIME: u8 = 0x10;
const IIN1_DEVICE_RESTART: u8 = 0x80;

const IIN2_FUNC_NOT_SUPPORTED: u8 = 0x01;
const IIN2_OBJECT_UNKNOWN: u8 = 0x02;
const IIN2_PARAMETER_ERROR: u8 = 0x04;
const IIN2_EVENT_BUFFER_OVERFLOW: u8 = 0x08;

macro_rules! iin_bit {
    ($field:ident, $mask:ident, $set:ident, $get:ident) => {
        pub fn $set(&mut self, value: bool) {
            if value {
                self.$field |= $mask;
            } else {
                self.$field &= !$mask;
            }
        }

        #[must_use]
        pub const fn $get(&self) -> bool {
            self.$field & $mask != 0
        }
    };
}

impl IINField {
    /// An all-zero field
    #[must_use]
    pub const fn empty() -> Self {
        Self { iin1: 0, iin2: 0 }
    }

    /// Clear every bit
    pub fn zero(&mut self) {
        self.iin1 = 0;
        self.iin2 = 0;
    }

    /// Whether any bit is set
    #[must_use]
    pub const fn any(&self) -> bool {
        self.iin1 != 0 || self.iin2 != 0
    }

    iin_bit!(iin1, IIN1_CLASS1_EVENTS, set_class1_events, class1_events);
    iin_bit!(iin1, IIN1_CLASS2_EVENTS, set_class2_events, class2_events);
    iin_bit!(iin1, IIN1_CLASS3_EVENTS, set_class3_events, class3_events);
    iin_bit!(iin1, IIN1_NEED_TIME, set_need_time, need_time);
    iin_bit!(iin1, IIN1_DEVICE_RESTART, set_device_restart, device_restart);

    iin_bit!(
        iin2,
        IIN2_FUNC_NOT_SUPPORTED,
        set_func_not_supported,
        func_not_supported
    );
    iin_bit!(iin2, IIN2_OBJECT_UNKNOWN, set_object_unknown, object_unknown);
    iin_bit!(
        iin2,
        IIN2_PARAMETER_ERROR,
        set_parameter_error,
        parameter_error
    );
    iin_bit!(
        iin2,
        IIN2_EVENT_BUFFER_OVERFLOW,
        set_event_buffer_overflow,
        event_buffer_overflow
    );

    /// Encode to the two wire octets, IIN1 first
    #[must_use]
    pub const fn encode(&self) -> [u8; 2] {
        [self.iin1, self.iin2]
    }

    /// Decode from the two wire octets
    #[must_use]
    pub const fn decode(bytes: [u8; 2]) -> Self {
        Self {
            iin1: bytes[0],
            iin2: bytes[1],
        }
    }
}

impl BitOr for IINField {
    type Output = IINField;

    fn bitor(self, rhs: IINField) -> IINField {
        IINField {
            iin1: self.iin1 | rhs.iin1,
            iin2: self.iin2 | rhs.iin2,
        }
    }
}

impl BitOrAssign for IINField {
    fn bitor_assign(&mut self, rhs: IINField) {
        self.iin1 |= rhs.iin1;
        self.iin2 |= rhs.iin2;
    }
}

impl fmt::Display for IINField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IIN[{:02X} {:02X}]", self.iin1, self.iin2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_positions() {
        let mut iin = IINField::empty();
        iin.set_device_restart(true);
        iin.set_need_time(true);
        assert_eq!(iin.encode(), [0x90, 0x00]);

        let mut iin = IINField::empty();
        iin.set_func_not_supported(true);
        iin.set_parameter_error(true);
        iin.set_event_buffer_overflow(true);
        assert_eq!(iin.encode(), [0x00, 0x0D]);
    }

    #[test]
    fn test_merge() {
        let mut a = IINField::empty();
        a.set_class1_events(true);
        let mut b = IINField::empty();
        b.set_parameter_error(true);
        let merged = a | b;
        assert!(merged.class1_events());
        assert!(merged.parameter_error());
        assert!(merged.any());
    }

    #[test]
    fn test_clear_bit() {
        let mut iin = IINField::empty();
        iin.set_need_time(true);
        assert!(iin.need_time());
        iin.set_need_time(false);
        assert!(!iin.any());
    }
}
