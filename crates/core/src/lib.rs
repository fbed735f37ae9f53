//! cbtoolbox-core
//!
//! Core library for postmortem analysis of database core dumps.
//!
//! This crate defines the crash data model, the explicit analysis configuration,
//! and the pipeline stages that turn a pile of core files into structured crash
//! records and recurring crash patterns:
//!
//! - classify candidate paths with the `file` tool,
//! - drive gdb against each validated core,
//! - parse the gdb transcript into a [`model::CrashRecord`],
//! - normalize its threads,
//! - cluster records into [`model::CoreComparison`] patterns.
//!
//! All substantive logic lives here so it is testable without gdb installed and
//! reusable from the CLI or any other frontend.

pub mod config;
pub mod model;
pub mod services;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
