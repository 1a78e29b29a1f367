//! romswitch library exports.
//!
//! The binary is a thin clap front end over these modules; integration tests
//! drive them directly with the fakes in `test_utils` (feature `test-utils`).

pub mod android;
pub mod boot;
pub mod bootimg;
pub mod commands;
pub mod common;
pub mod config;
pub mod initrc;
pub mod kexec;
pub mod mount;
pub mod partition;
pub mod preflight;
pub mod process;
pub mod registry;
pub mod rom;
pub mod status;
pub mod swap;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
