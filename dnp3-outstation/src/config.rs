//! Outstation configuration

use dnp3_core::ClassMask;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-kind capacity of the event buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMaxConfig {
    pub max_binary_events: usize,
    pub max_analog_events: usize,
    pub max_counter_events: usize,
}

impl Default for EventMaxConfig {
    fn default() -> Self {
        Self {
            max_binary_events: 1000,
            max_analog_events: 1000,
            max_counter_events: 1000,
        }
    }
}

/// Point counts of the static database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub num_binaries: u16,
    pub num_analogs: u16,
    pub num_counters: u16,
    pub num_control_statuses: u16,
    pub num_setpoint_statuses: u16,
}

/// Default object variations used when a request does not force one
///
/// Validated against the object registry when the session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultVariations {
    pub static_binary: u8,
    pub static_analog: u8,
    pub static_counter: u8,
    pub static_control_status: u8,
    pub static_setpoint_status: u8,
    pub event_binary: u8,
    pub event_analog: u8,
    pub event_counter: u8,
}

impl Default for DefaultVariations {
    fn default() -> Self {
        Self {
            static_binary: 2,
            static_analog: 1,
            static_counter: 1,
            static_control_status: 2,
            static_setpoint_status: 1,
            event_binary: 1,
            event_analog: 1,
            event_counter: 1,
        }
    }
}

/// Outstation session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutstationConfig {
    /// Assert the need-time IIN bit on link up and keep re-asserting it
    pub allow_time_sync: bool,
    /// Interval after which the need-time bit is asserted again
    pub time_sync_period: Duration,
    /// Disable all unsolicited traffic, including the startup null
    pub disable_unsol: bool,
    /// Event classes initially reported unsolicited
    pub unsol_mask: ClassMask,
    /// Batching delay from the first pending event to the unsolicited send;
    /// zero sends immediately
    pub unsol_pack_delay: Duration,
    /// Delay before retrying a failed unsolicited response
    pub unsol_retry_delay: Duration,
    /// How long a SELECT stays armed for the matching OPERATE
    pub select_timeout: Duration,
    /// Maximum size of one APDU fragment
    pub max_fragment_size: usize,
    pub variations: DefaultVariations,
    pub event_buffer: EventMaxConfig,
}

impl Default for OutstationConfig {
    fn default() -> Self {
        Self {
            allow_time_sync: false,
            time_sync_period: Duration::from_secs(600),
            disable_unsol: false,
            unsol_mask: ClassMask::ALL,
            unsol_pack_delay: Duration::from_millis(500),
            unsol_retry_delay: Duration::from_secs(5),
            select_timeout: Duration::from_secs(5),
            max_fragment_size: 2048,
            variations: DefaultVariations::default(),
            event_buffer: EventMaxConfig::default(),
        }
    }
}
