//! DNP3 outstation engine
//!
//! The engine multiplexes solicited and unsolicited traffic on a single
//! application-layer session and assembles response fragments from a live
//! point database:
//!
//! - [`buffer`]: bounded event buffer with select/clear-written semantics
//! - [`database`]: typed point database with staged updates
//! - [`context`]: response context driving fragment assembly and
//!   multi-fragment continuation
//! - [`session`]: the five-state session machine and its collaborator
//!   traits (application layer, timer source)
//! - [`command`]: CROB parsing and the control handler seam
//! - [`runner`]: tokio event loop binding a session to a transport
//!
//! The session machine itself is synchronous; everything asynchronous
//! lives in [`runner`].

pub mod buffer;
pub mod command;
pub mod config;
pub mod context;
pub mod database;
pub mod runner;
pub mod session;

pub use buffer::EventBuffer;
pub use command::{CommandStatus, ControlHandler, Crob, NullControlHandler};
pub use config::{DatabaseConfig, DefaultVariations, EventMaxConfig, OutstationConfig};
pub use context::{ResponseContext, ResponseMode, ResponseTypes};
pub use database::Database;
pub use runner::{LowerLayer, OutstationHandle, OutstationTask, SessionEvent};
pub use session::{
    ApplicationLayer, LastRequest, Session, SlaveState, TimerHandle, TimerSource, TimerTask,
};
