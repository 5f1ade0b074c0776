//! Command implementations.

mod replay;
mod serve;
mod validate;

pub use replay::run_replay;
pub use serve::run_serve;
pub use validate::run_validate;
