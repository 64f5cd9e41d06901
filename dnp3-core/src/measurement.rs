//! Measurement model for the outstation point database
//!
//! A DNP3 outstation exposes five kinds of points to a master. Binary,
//! analog and counter inputs additionally produce timestamped events when
//! their value changes; control-status and setpoint-status points are
//! static-only.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Quality flag bits shared by all point kinds
///
/// The flag byte travels on the wire exactly as stored here. For binary
/// points the top bit carries the current state and must not be set in the
/// stored quality.
pub mod quality {
    /// Point is online and the value is usable
    pub const ONLINE: u8 = 0x01;
    /// Device restarted since the point was last reported
    pub const RESTART: u8 = 0x02;
    /// Communication with the originating device is lost
    pub const COMM_LOST: u8 = 0x04;
    /// Value forced at a remote station
    pub const REMOTE_FORCED: u8 = 0x08;
    /// Value forced at the local station
    pub const LOCAL_FORCED: u8 = 0x10;
    /// Binary point changed state too quickly to report every transition
    pub const CHATTER_FILTER: u8 = 0x20;
    /// State bit position used by packed binary variations
    pub const STATE: u8 = 0x80;
}

/// Millisecond timestamp since the UNIX epoch
///
/// DNP3 carries absolute time as a 48-bit millisecond count; the upper two
/// bytes of the inner value are ignored on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Dnp3Time(u64);

impl Dnp3Time {
    /// Create a timestamp from milliseconds since the UNIX epoch
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Get the timestamp in milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

/// The five DNP3 point kinds served by an outstation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointKind {
    Binary,
    Analog,
    Counter,
    ControlStatus,
    SetpointStatus,
}

impl PointKind {
    /// Kinds that produce events, in the order events are loaded into a
    /// response fragment
    pub const EVENT_KINDS: [PointKind; 3] =
        [PointKind::Binary, PointKind::Analog, PointKind::Counter];

    /// All static kinds, in the order static data is loaded into a response
    /// fragment
    pub const STATIC_KINDS: [PointKind; 5] = [
        PointKind::Binary,
        PointKind::Counter,
        PointKind::Analog,
        PointKind::ControlStatus,
        PointKind::SetpointStatus,
    ];

    /// Whether points of this kind produce events on change
    #[must_use]
    pub const fn produces_events(&self) -> bool {
        matches!(
            self,
            PointKind::Binary | PointKind::Analog | PointKind::Counter
        )
    }

    /// Get human-readable kind name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PointKind::Binary => "Binary",
            PointKind::Analog => "Analog",
            PointKind::Counter => "Counter",
            PointKind::ControlStatus => "ControlStatus",
            PointKind::SetpointStatus => "SetpointStatus",
        }
    }
}

impl Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event class assigned to an event-producing point at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventClass {
    Class1,
    Class2,
    Class3,
}

/// Set of event classes, used for unsolicited masks and class polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMask {
    pub class1: bool,
    pub class2: bool,
    pub class3: bool,
}

impl ClassMask {
    /// Mask matching no class, used for the startup null unsolicited
    /// response
    pub const NONE: ClassMask = ClassMask::new(false, false, false);

    /// Mask matching every class
    pub const ALL: ClassMask = ClassMask::new(true, true, true);

    #[must_use]
    pub const fn new(class1: bool, class2: bool, class3: bool) -> Self {
        Self {
            class1,
            class2,
            class3,
        }
    }

    /// Whether any class is included
    #[must_use]
    pub const fn any(&self) -> bool {
        self.class1 || self.class2 || self.class3
    }

    /// Whether the given class is included
    #[must_use]
    pub const fn contains(&self, class: EventClass) -> bool {
        match class {
            EventClass::Class1 => self.class1,
            EventClass::Class2 => self.class2,
            EventClass::Class3 => self.class3,
        }
    }

    /// Set or clear membership of one class
    pub fn set(&mut self, class: EventClass, enabled: bool) {
        match class {
            EventClass::Class1 => self.class1 = enabled,
            EventClass::Class2 => self.class2 = enabled,
            EventClass::Class3 => self.class3 = enabled,
        }
    }
}

impl Default for ClassMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Current value of a point, tagged by kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointValue {
    Binary(bool),
    Analog(f64),
    Counter(u32),
    ControlStatus(bool),
    SetpointStatus(f64),
}

impl PointValue {
    /// Kind of point this value belongs to
    #[must_use]
    pub const fn kind(&self) -> PointKind {
        match self {
            PointValue::Binary(_) => PointKind::Binary,
            PointValue::Analog(_) => PointKind::Analog,
            PointValue::Counter(_) => PointKind::Counter,
            PointValue::ControlStatus(_) => PointKind::ControlStatus,
            PointValue::SetpointStatus(_) => PointKind::SetpointStatus,
        }
    }
}

/// A single static point: current value, quality and time of last change
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticPoint {
    pub value: PointValue,
    pub quality: u8,
    pub time: Dnp3Time,
    /// Event class for event-producing kinds; ignored for static-only kinds
    pub class: EventClass,
}

impl StaticPoint {
    /// Create a point with a restart quality and the given initial value
    #[must_use]
    pub fn new(value: PointValue) -> Self {
        Self {
            value,
            quality: quality::RESTART,
            time: Dnp3Time::default(),
            class: EventClass::Class1,
        }
    }
}

/// A timestamped change to an event-producing point
///
/// The event buffer assigns each inserted event a monotonically increasing
/// sequence number; selection order is strictly by that sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub kind: PointKind,
    pub index: u16,
    pub value: PointValue,
    pub quality: u8,
    pub time: Dnp3Time,
    pub class: EventClass,
}

/// A staged change to a point, applied by the database on flush
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Update {
    pub index: u16,
    pub value: PointValue,
    pub quality: u8,
    pub time: Dnp3Time,
}

impl Update {
    #[must_use]
    pub fn new(index: u16, value: PointValue, quality: u8, time: Dnp3Time) -> Self {
        Self {
            index,
            value,
            quality,
            time,
        }
    }

    /// Kind of point this update targets
    #[must_use]
    pub const fn kind(&self) -> PointKind {
        self.value.kind()
    }
}
