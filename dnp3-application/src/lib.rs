//! DNP3 application-layer APDU model
//!
//! This crate provides the wire-facing half of the outstation stack:
//!
//! - **Headers**: application control field, function codes, IIN field
//! - **Objects**: the `(group, variation)` descriptor registry and the
//!   fixed-size encoders the registry dispatches to
//! - **Fragments**: the bounded [`apdu::Apdu`] write buffer with its
//!   contiguous-range and index-prefixed cursors, plus the parsing side
//!   ([`apdu::ParsedApdu`], [`apdu::HeaderReadIterator`])
//!
//! Everything below the application layer (link framing, transport
//! reassembly) is outside this crate.

pub mod apdu;
pub mod control;
pub mod function;
pub mod iin;
pub mod objects;

pub use apdu::{Apdu, Header, HeaderRange, HeaderReadIterator, ParsedApdu};
pub use control::ControlField;
pub use function::{FunctionCode, SequenceInfo};
pub use iin::IINField;
pub use objects::ObjectDescriptor;
