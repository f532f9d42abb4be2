//! Shared test utilities for amibackup
//!
//! Helpers for the `#[ignore]`d integration tests that talk to real AWS.
//!
//! ## Modules
//!
//! - [`aws`]: Region selection, test target lookup and unique run IDs

pub mod aws;

// Re-export commonly used items
pub use aws::{get_test_dest_region, get_test_instance_name, get_test_region, test_run_id};
