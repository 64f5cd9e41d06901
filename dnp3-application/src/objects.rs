//! Object group/variation registry
//!
//! Maps a `(group, variation)` pair to a descriptor carrying the encoded
//! object size, and hosts the fixed-size encoders for every variation the
//! outstation can emit. One generic contiguous-range routine in the APDU
//! writer is parameterized over these descriptors; there is no per-variation
//! write path.

use dnp3_core::measurement::quality;
use dnp3_core::{Dnp3Time, Event, PointKind, PointValue, StaticPoint};

/// Descriptor for one concrete object variation
#[derive(Debug, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub group: u8,
    pub variation: u8,
    /// Encoded size in octets, excluding any index prefix
    pub size: usize,
}

const fn desc(group: u8, variation: u8, size: usize) -> ObjectDescriptor {
    ObjectDescriptor {
        group,
        variation,
        size,
    }
}

/// Binary input with flags
pub static GROUP1_VAR2: ObjectDescriptor = desc(1, 2, 1);
/// Binary input change without time
pub static GROUP2_VAR1: ObjectDescriptor = desc(2, 1, 1);
/// Binary input change with absolute time
pub static GROUP2_VAR2: ObjectDescriptor = desc(2, 2, 7);
/// Binary input change with relative time
pub static GROUP2_VAR3: ObjectDescriptor = desc(2, 3, 3);
/// Control status with flags
pub static GROUP10_VAR2: ObjectDescriptor = desc(10, 2, 1);
/// Binary output command (CROB)
pub static GROUP12_VAR1: ObjectDescriptor = desc(12, 1, 11);
/// 32-bit counter with flag
pub static GROUP20_VAR1: ObjectDescriptor = desc(20, 1, 5);
/// 16-bit counter with flag
pub static GROUP20_VAR2: ObjectDescriptor = desc(20, 2, 3);
/// 32-bit counter without flag
pub static GROUP20_VAR5: ObjectDescriptor = desc(20, 5, 4);
/// 16-bit counter without flag
pub static GROUP20_VAR6: ObjectDescriptor = desc(20, 6, 2);
/// 32-bit counter change with flag
pub static GROUP22_VAR1: ObjectDescriptor = desc(22, 1, 5);
/// 16-bit counter change with flag
pub static GROUP22_VAR2: ObjectDescriptor = desc(22, 2, 3);
/// 32-bit analog input with flag
pub static GROUP30_VAR1: ObjectDescriptor = desc(30, 1, 5);
/// 16-bit analog input with flag
pub static GROUP30_VAR2: ObjectDescriptor = desc(30, 2, 3);
/// 32-bit analog input without flag
pub static GROUP30_VAR3: ObjectDescriptor = desc(30, 3, 4);
/// 16-bit analog input without flag
pub static GROUP30_VAR4: ObjectDescriptor = desc(30, 4, 2);
/// Single-precision analog input with flag
pub static GROUP30_VAR5: ObjectDescriptor = desc(30, 5, 5);
/// Double-precision analog input with flag
pub static GROUP30_VAR6: ObjectDescriptor = desc(30, 6, 9);
/// 32-bit analog change with flag
pub static GROUP32_VAR1: ObjectDescriptor = desc(32, 1, 5);
/// 16-bit analog change with flag
pub static GROUP32_VAR2: ObjectDescriptor = desc(32, 2, 3);
/// 32-bit setpoint status with flag
pub static GROUP40_VAR1: ObjectDescriptor = desc(40, 1, 5);
/// 16-bit setpoint status with flag
pub static GROUP40_VAR2: ObjectDescriptor = desc(40, 2, 3);
/// Single-precision setpoint status with flag
pub static GROUP40_VAR3: ObjectDescriptor = desc(40, 3, 5);
/// Double-precision setpoint status with flag
pub static GROUP40_VAR4: ObjectDescriptor = desc(40, 4, 9);
/// Absolute time
pub static GROUP50_VAR1: ObjectDescriptor = desc(50, 1, 6);
/// Time delay, fine (milliseconds)
pub static GROUP52_VAR2: ObjectDescriptor = desc(52, 2, 2);
/// Internal indications (packed bits)
pub static GROUP80_VAR1: ObjectDescriptor = desc(80, 1, 0);

/// Look up the static descriptor for a point kind and variation
#[must_use]
pub fn static_descriptor(kind: PointKind, variation: u8) -> Option<&'static ObjectDescriptor> {
    match (kind, variation) {
        (PointKind::Binary, 2) => Some(&GROUP1_VAR2),
        (PointKind::ControlStatus, 2) => Some(&GROUP10_VAR2),
        (PointKind::Counter, 1) => Some(&GROUP20_VAR1),
        (PointKind::Counter, 2) => Some(&GROUP20_VAR2),
        (PointKind::Counter, 5) => Some(&GROUP20_VAR5),
        (PointKind::Counter, 6) => Some(&GROUP20_VAR6),
        (PointKind::Analog, 1) => Some(&GROUP30_VAR1),
        (PointKind::Analog, 2) => Some(&GROUP30_VAR2),
        (PointKind::Analog, 3) => Some(&GROUP30_VAR3),
        (PointKind::Analog, 4) => Some(&GROUP30_VAR4),
        (PointKind::Analog, 5) => Some(&GROUP30_VAR5),
        (PointKind::Analog, 6) => Some(&GROUP30_VAR6),
        (PointKind::SetpointStatus, 1) => Some(&GROUP40_VAR1),
        (PointKind::SetpointStatus, 2) => Some(&GROUP40_VAR2),
        (PointKind::SetpointStatus, 3) => Some(&GROUP40_VAR3),
        (PointKind::SetpointStatus, 4) => Some(&GROUP40_VAR4),
        _ => None,
    }
}

/// Look up the event descriptor for a point kind and variation
#[must_use]
pub fn event_descriptor(kind: PointKind, variation: u8) -> Option<&'static ObjectDescriptor> {
    match (kind, variation) {
        (PointKind::Binary, 1) => Some(&GROUP2_VAR1),
        (PointKind::Binary, 2) => Some(&GROUP2_VAR2),
        (PointKind::Binary, 3) => Some(&GROUP2_VAR3),
        (PointKind::Counter, 1) => Some(&GROUP22_VAR1),
        (PointKind::Counter, 2) => Some(&GROUP22_VAR2),
        (PointKind::Analog, 1) => Some(&GROUP32_VAR1),
        (PointKind::Analog, 2) => Some(&GROUP32_VAR2),
        _ => None,
    }
}

/// Encoded object size for header parsing, excluding index prefixes
///
/// Variation 0 of the readable groups, the class objects and the virtual
/// terminal groups carry no object data in a request and report size zero.
/// `None` means the pair is unknown to this implementation.
#[must_use]
pub fn object_size(group: u8, variation: u8) -> Option<usize> {
    match (group, variation) {
        (1 | 2 | 10 | 20 | 22 | 30 | 32 | 40, 0) => Some(0),
        (60, 1..=4) => Some(0),
        (112 | 113, _) => Some(0),
        (1, 2) => Some(GROUP1_VAR2.size),
        (2, 1) => Some(GROUP2_VAR1.size),
        (2, 2) => Some(GROUP2_VAR2.size),
        (2, 3) => Some(GROUP2_VAR3.size),
        (10, 2) => Some(GROUP10_VAR2.size),
        (12, 1) => Some(GROUP12_VAR1.size),
        (20, 1) => Some(GROUP20_VAR1.size),
        (20, 2) => Some(GROUP20_VAR2.size),
        (20, 5) => Some(GROUP20_VAR5.size),
        (20, 6) => Some(GROUP20_VAR6.size),
        (22, 1) => Some(GROUP22_VAR1.size),
        (22, 2) => Some(GROUP22_VAR2.size),
        (30, 1) => Some(GROUP30_VAR1.size),
        (30, 2) => Some(GROUP30_VAR2.size),
        (30, 3) => Some(GROUP30_VAR3.size),
        (30, 4) => Some(GROUP30_VAR4.size),
        (30, 5) => Some(GROUP30_VAR5.size),
        (30, 6) => Some(GROUP30_VAR6.size),
        (32, 1) => Some(GROUP32_VAR1.size),
        (32, 2) => Some(GROUP32_VAR2.size),
        (40, 1) => Some(GROUP40_VAR1.size),
        (40, 2) => Some(GROUP40_VAR2.size),
        (40, 3) => Some(GROUP40_VAR3.size),
        (40, 4) => Some(GROUP40_VAR4.size),
        (50, 1) => Some(GROUP50_VAR1.size),
        (52, 2) => Some(GROUP52_VAR2.size),
        (80, 1) => Some(0),
        _ => None,
    }
}

fn flags_with_state(flags: u8, state: bool) -> u8 {
    let base = flags & !quality::STATE;
    if state {
        base | quality::STATE
    } else {
        base
    }
}

fn write_i32_clamped(value: f64, out: &mut [u8]) {
    let v = value.clamp(i32::MIN as f64, i32::MAX as f64) as i32;
    out.copy_from_slice(&v.to_le_bytes());
}

fn write_i16_clamped(value: f64, out: &mut [u8]) {
    let v = value.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
    out.copy_from_slice(&v.to_le_bytes());
}

fn write_time48(time: Dnp3Time, out: &mut [u8]) {
    out.copy_from_slice(&time.as_millis().to_le_bytes()[..6]);
}

/// Encode one static point into `out`, which must be exactly `desc.size`
/// octets
///
/// The descriptor and value kinds must agree; mismatches are a programming
/// error in the response context and are caught by a debug assertion.
pub fn encode_static(desc: &ObjectDescriptor, point: &StaticPoint, out: &mut [u8]) {
    debug_assert_eq!(out.len(), desc.size);
    match (desc.group, desc.variation, point.value) {
        (1, 2, PointValue::Binary(state)) => out[0] = flags_with_state(point.quality, state),
        (10, 2, PointValue::ControlStatus(state)) => {
            out[0] = flags_with_state(point.quality, state);
        }
        (20, 1, PointValue::Counter(v)) => {
            out[0] = point.quality;
            out[1..5].copy_from_slice(&v.to_le_bytes());
        }
        (20, 2, PointValue::Counter(v)) => {
            out[0] = point.quality;
            out[1..3].copy_from_slice(&(v.min(u16::MAX as u32) as u16).to_le_bytes());
        }
        (20, 5, PointValue::Counter(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (20, 6, PointValue::Counter(v)) => {
            out.copy_from_slice(&(v.min(u16::MAX as u32) as u16).to_le_bytes());
        }
        (30, 1, PointValue::Analog(v)) => {
            out[0] = point.quality;
            write_i32_clamped(v, &mut out[1..5]);
        }
        (30, 2, PointValue::Analog(v)) => {
            out[0] = point.quality;
            write_i16_clamped(v, &mut out[1..3]);
        }
        (30, 3, PointValue::Analog(v)) => write_i32_clamped(v, out),
        (30, 4, PointValue::Analog(v)) => write_i16_clamped(v, out),
        (30, 5, PointValue::Analog(v)) => {
            out[0] = point.quality;
            out[1..5].copy_from_slice(&(v as f32).to_le_bytes());
        }
        (30, 6, PointValue::Analog(v)) => {
            out[0] = point.quality;
            out[1..9].copy_from_slice(&v.to_le_bytes());
        }
        (40, 1, PointValue::SetpointStatus(v)) => {
            out[0] = point.quality;
            write_i32_clamped(v, &mut out[1..5]);
        }
        (40, 2, PointValue::SetpointStatus(v)) => {
            out[0] = point.quality;
            write_i16_clamped(v, &mut out[1..3]);
        }
        (40, 3, PointValue::SetpointStatus(v)) => {
            out[0] = point.quality;
            out[1..5].copy_from_slice(&(v as f32).to_le_bytes());
        }
        (40, 4, PointValue::SetpointStatus(v)) => {
            out[0] = point.quality;
            out[1..9].copy_from_slice(&v.to_le_bytes());
        }
        _ => debug_assert!(false, "descriptor/value mismatch"),
    }
}

/// Encode one event into `out`, which must be exactly `desc.size` octets
///
/// Group 2 variation 3 carries a relative time; without a common time
/// object in the fragment the low 16 bits of the absolute time are written.
pub fn encode_event(desc: &ObjectDescriptor, event: &Event, out: &mut [u8]) {
    debug_assert_eq!(out.len(), desc.size);
    match (desc.group, desc.variation, event.value) {
        (2, 1, PointValue::Binary(state)) => out[0] = flags_with_state(event.quality, state),
        (2, 2, PointValue::Binary(state)) => {
            out[0] = flags_with_state(event.quality, state);
            write_time48(event.time, &mut out[1..7]);
        }
        (2, 3, PointValue::Binary(state)) => {
            out[0] = flags_with_state(event.quality, state);
            out[1..3].copy_from_slice(&(event.time.as_millis() as u16).to_le_bytes());
        }
        (22, 1, PointValue::Counter(v)) => {
            out[0] = event.quality;
            out[1..5].copy_from_slice(&v.to_le_bytes());
        }
        (22, 2, PointValue::Counter(v)) => {
            out[0] = event.quality;
            out[1..3].copy_from_slice(&(v.min(u16::MAX as u32) as u16).to_le_bytes());
        }
        (32, 1, PointValue::Analog(v)) => {
            out[0] = event.quality;
            write_i32_clamped(v, &mut out[1..5]);
        }
        (32, 2, PointValue::Analog(v)) => {
            out[0] = event.quality;
            write_i16_clamped(v, &mut out[1..3]);
        }
        _ => debug_assert!(false, "descriptor/value mismatch"),
    }
}
