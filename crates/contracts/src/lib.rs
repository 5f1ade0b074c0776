//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the log-shipping sidecar.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - All timestamps are nanoseconds since the Unix epoch (`i64`), matching the
//!   `time_nano` field of the wire record

mod config;
mod error;
mod frame;
mod handle;
mod identity;
mod sink;

pub use config::*;
pub use error::*;
pub use frame::*;
pub use handle::StreamHandle;
pub use identity::{ContainerIdentity, ContainerInfo};
pub use sink::*;
