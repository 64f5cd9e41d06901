//! DNP3 outstation protocol engine
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `dnp3-core`: error handling and the measurement model
//! - `dnp3-application`: application-layer APDU codec (headers, IIN,
//!   object registry, fragment cursors)
//! - `dnp3-outstation`: the outstation engine (event buffer, point
//!   database, response context, session state machine, tokio runner)
//!
//! # Usage
//!
//! ```no_run
//! use dnp3::outstation::{
//!     Database, DatabaseConfig, NullControlHandler, OutstationConfig, OutstationTask,
//! };
//!
//! # async fn run(lower: impl dnp3::outstation::LowerLayer) -> dnp3::Dnp3Result<()> {
//! let config = OutstationConfig::default();
//! let db = Database::new(
//!     &DatabaseConfig { num_binaries: 10, ..DatabaseConfig::default() },
//!     &config.event_buffer,
//! );
//! let (task, handle) = OutstationTask::new(config, db, Box::new(NullControlHandler), lower)?;
//! handle.lower_layer_up()?;
//! task.run().await;
//! # Ok(())
//! # }
//! ```

// Re-export core types
pub use dnp3_core::{
    quality, ClassMask, Dnp3Error, Dnp3Result, Dnp3Time, Event, EventClass, PointKind, PointValue,
    StaticPoint, Update,
};

// Re-export the application-layer codec
pub mod application {
    pub use dnp3_application::*;
}

// Re-export the outstation engine
pub mod outstation {
    pub use dnp3_outstation::*;
}
