//! Core types for the DNP3 outstation stack
//!
//! This crate holds the error type and the measurement model shared by the
//! application-layer codec and the outstation engine.

pub mod error;
pub mod measurement;

pub use error::{Dnp3Error, Dnp3Result};
pub use measurement::{
    quality, ClassMask, Dnp3Time, Event, EventClass, PointKind, PointValue, StaticPoint, Update,
};
