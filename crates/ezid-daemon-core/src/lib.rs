#![doc = include_str!("../README.md")]

mod common;
mod destination;

pub use common::*;
pub use destination::*;
// Public re-export so downstream crates can access `ezid` via
// `ezid_daemon_core::ezid`
pub use ezid;
