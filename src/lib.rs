//! fixpoint library crate
//!
//! Validates a generated web project stage by stage and repairs it until it
//! type-checks, builds, passes its tests and serves, or the retry budget runs
//! out. The binary is a thin wrapper over [`pipeline::repair`].

#[macro_use]
pub mod util;

pub mod apply;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod fixers;
pub mod logging;
pub mod oracle;
pub mod parsers;
pub mod pipeline;
pub mod stages;
pub mod supervisor;
