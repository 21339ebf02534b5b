//! Common utilities and types shared across drivelink crates.
//!
//! This module provides the error type every operation reports through and
//! the path type used to address items in a drive.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::DrivePath;
