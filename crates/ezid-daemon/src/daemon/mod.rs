//! The `ezid-daemon` process.
//!
//! - [`config`]: command line and environment settings.
//! - [`telemetry`]: logging, trace and metric exporters.
//! - [`pool`] and [`queue`]: per-destination worker pools draining the
//!   outbound queues.
//! - [`linkcheck`]: the target URL checker.
//! - [`sweep`]: test identifier expunging and queue cleanup.
//! - [`admin`]: minter and queue maintenance subcommands.

pub mod admin;
pub mod config;
pub mod linkcheck;
pub mod pool;
pub mod queue;
pub mod sweep;
pub mod telemetry;
