//! Streamvisor Core - Platform-independent stream supervision
//!
//! This crate provides the process abstractions, the per-owner stream
//! registry, exit monitoring and the supervisor that ties them together.
//! Platform crates supply the concrete process manager.

mod command;
mod config;
mod diagnostics;
mod error;
mod monitor;
mod notify;
mod process;
mod registry;
mod stream;
mod supervisor;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::*;
pub use config::*;
pub use diagnostics::*;
pub use error::*;
pub use notify::*;
pub use process::*;
pub use registry::*;
pub use stream::*;
pub use supervisor::*;
