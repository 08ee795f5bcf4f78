//! Test utilities shared by unit and integration tests
//!
//! Mock protocol and notifier implementations plus async helpers.

pub mod async_helpers;
pub mod mocks;

pub use async_helpers::*;
pub use mocks::*;
