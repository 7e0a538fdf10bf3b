//! Common utilities for opendash
//!
//! This crate provides functionality shared by the server binary and its
//! tests: error handling, logging setup and test helpers.

pub mod error;
pub mod logging;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::setup_logging;
