//! Common utilities for rust-usbnet
//!
//! This crate provides functionality shared by the shim library, its
//! command-line tool and the test suites: the common error type, logging
//! setup, and test tooling (a scripted fake agent plus a topology builder
//! that encodes find-devices replies).

pub mod error;
pub mod logging;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::setup_logging;
